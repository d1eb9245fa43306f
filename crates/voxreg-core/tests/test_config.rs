use voxreg_core::metric::{MetricKind, RobustEstimator};
use voxreg_core::registration::linear::LinearConfig;
use voxreg_core::registration::syn::SynConfig;
use voxreg_core::transform::init::TransformInit;

#[test]
fn test_linear_config_defaults() {
    let config = LinearConfig::default();
    assert_eq!(config.scale_factors, vec![0.25, 0.5, 1.0]);
    assert_eq!(config.max_iter, vec![300]);
    assert_eq!(config.loop_density, vec![1.0]);
    assert_eq!(config.metric, MetricKind::MeanSquared);
    assert_eq!(config.init, TransformInit::Mass);
    assert_eq!(config.lmax, Some(4));
    assert!(!config.global_search);
    assert!(config.init_transform.is_none());
}

#[test]
fn test_linear_config_json_roundtrip() {
    let config = LinearConfig {
        scale_factors: vec![0.5, 1.0],
        max_iter: vec![100, 50],
        metric: MetricKind::CrossCorrelation,
        cc_extent: Some(5),
        global_search: true,
        ..LinearConfig::default()
    };

    let json = serde_json::to_string(&config).unwrap();
    let parsed: LinearConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.scale_factors, config.scale_factors);
    assert_eq!(parsed.max_iter, config.max_iter);
    assert_eq!(parsed.metric, config.metric);
    assert_eq!(parsed.cc_extent, config.cc_extent);
    assert!(parsed.global_search);
}

#[test]
fn test_partial_json_uses_defaults() {
    let parsed: LinearConfig =
        serde_json::from_str(r#"{ "metric": "mean_squared", "estimator": "l2" }"#).unwrap();
    assert_eq!(parsed.metric, MetricKind::MeanSquared);
    assert_eq!(parsed.estimator, Some(RobustEstimator::L2));
    assert_eq!(parsed.scale_factors, vec![0.25, 0.5, 1.0]);
    assert_eq!(parsed.lmax, Some(4));
}

#[test]
fn test_init_names_are_snake_case() {
    let parsed: LinearConfig = serde_json::from_str(r#"{ "init": "geometric" }"#).unwrap();
    assert_eq!(parsed.init, TransformInit::Geometric);
}

#[test]
fn test_syn_config_defaults() {
    let config = SynConfig::default();
    assert_eq!(config.scale_factors, vec![0.25, 0.5, 1.0]);
    assert_eq!(config.max_iter, vec![40, 40, 20]);
    assert!((config.grad_step - 0.5).abs() < 1e-12);
    assert_eq!(config.lmax, Some(4));
    assert!(config.init_warp.is_none());
}

#[test]
fn test_syn_config_json_roundtrip() {
    let config = SynConfig {
        scale_factors: vec![1.0],
        max_iter: vec![15],
        grad_step: 0.25,
        update_smoothing: 3.0,
        disp_smoothing: 0.5,
        lmax: Some(6),
        init_warp: None,
    };

    let json = serde_json::to_string(&config).unwrap();
    let parsed: SynConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.scale_factors, config.scale_factors);
    assert_eq!(parsed.max_iter, config.max_iter);
    assert!((parsed.grad_step - 0.25).abs() < 1e-12);
    assert!((parsed.update_smoothing - 3.0).abs() < 1e-12);
    assert_eq!(parsed.lmax, Some(6));
}
