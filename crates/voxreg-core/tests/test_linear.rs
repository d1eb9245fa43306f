mod common;

use common::{gaussian_blob, multi_volume_blob};
use voxreg_core::error::RegistrationError;
use voxreg_core::metric::MetricKind;
use voxreg_core::registration::linear::{LinearConfig, LinearRegistration};
use voxreg_core::transform::init::TransformInit;
use voxreg_core::transform::model::TransformModel;
use voxreg_core::volume::Volume;

#[test]
fn test_zero_iterations_returns_the_initial_transform() {
    let target = gaussian_blob([24, 24, 24], [12.0, 12.0, 12.0], 3.0);
    let moving = gaussian_blob([24, 24, 24], [14.0, 12.0, 12.0], 3.0);

    let config = LinearConfig {
        scale_factors: vec![1.0],
        max_iter: vec![0],
        init: TransformInit::Mass,
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    let t = reg.run(&moving, &target, None, None).unwrap();

    // The mass initialisation already aligns the centroids.
    assert!(
        (t.translation()[0] - 2.0).abs() < 0.2,
        "tx={} should be ~2 from the centroid alignment",
        t.translation()[0]
    );
}

#[test]
fn test_identical_images_stay_put() {
    let img = gaussian_blob([64, 64, 64], [32.0, 32.0, 32.0], 10.0);

    let config = LinearConfig {
        scale_factors: vec![1.0],
        max_iter: vec![10],
        init: TransformInit::Mass,
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    let t = reg.run(&img, &img, None, None).unwrap();

    for i in 0..3 {
        assert!(
            t.translation()[i].abs() < 0.1,
            "translation[{}]={} should stay near zero",
            i,
            t.translation()[i]
        );
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!(
                (t.matrix()[(i, j)] - expected).abs() < 0.05,
                "matrix[({},{})]={}",
                i,
                j,
                t.matrix()[(i, j)]
            );
        }
    }
}

#[test]
fn test_rigid_recovers_a_translation() {
    let target = gaussian_blob([32, 32, 32], [16.0, 16.0, 16.0], 4.0);
    let moving = gaussian_blob([32, 32, 32], [18.0, 16.0, 16.0], 4.0);

    let config = LinearConfig {
        scale_factors: vec![1.0],
        max_iter: vec![100],
        init: TransformInit::Mass,
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    let t = reg.run(&moving, &target, None, None).unwrap();

    // Target voxels map 2 voxels toward +x to land on the moving blob.
    let centre = t.apply([16.0, 16.0, 16.0]);
    assert!(
        (centre[0] - 18.0).abs() < 0.5,
        "mapped centre x={} should be ~18",
        centre[0]
    );
    assert!((centre[1] - 16.0).abs() < 0.5);
    assert!((centre[2] - 16.0).abs() < 0.5);
}

#[test]
fn test_affine_recovers_a_translation() {
    let target = gaussian_blob([32, 32, 32], [16.0, 16.0, 16.0], 4.0);
    let moving = gaussian_blob([32, 32, 32], [16.0, 18.0, 16.0], 4.0);

    let config = LinearConfig {
        scale_factors: vec![0.5, 1.0],
        max_iter: vec![50],
        init: TransformInit::Mass,
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Affine, config);
    let t = reg.run(&moving, &target, None, None).unwrap();

    let centre = t.apply([16.0, 16.0, 16.0]);
    assert!(
        (centre[1] - 18.0).abs() < 0.5,
        "mapped centre y={} should be ~18",
        centre[1]
    );
}

#[test]
fn test_loop_density_still_converges() {
    let target = gaussian_blob([32, 32, 32], [16.0, 16.0, 16.0], 4.0);
    let moving = gaussian_blob([32, 32, 32], [18.0, 16.0, 16.0], 4.0);

    let config = LinearConfig {
        scale_factors: vec![1.0],
        max_iter: vec![80],
        loop_density: vec![0.5],
        init: TransformInit::Mass,
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    let t = reg.run(&moving, &target, None, None).unwrap();

    let centre = t.apply([16.0, 16.0, 16.0]);
    assert!(
        (centre[0] - 18.0).abs() < 0.75,
        "mapped centre x={} should be ~18",
        centre[0]
    );
}

#[test]
fn test_rigid_registers_multi_volume_images() {
    let target = multi_volume_blob([32, 32, 32], [16.0, 16.0, 16.0], 4.0, 2);
    let moving = multi_volume_blob([32, 32, 32], [18.0, 16.0, 16.0], 4.0, 2);

    let config = LinearConfig {
        scale_factors: vec![1.0],
        max_iter: vec![100],
        init: TransformInit::Mass,
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    let t = reg.run(&moving, &target, None, None).unwrap();

    let centre = t.apply([16.0, 16.0, 16.0]);
    assert!(
        (centre[0] - 18.0).abs() < 0.5,
        "mapped centre x={} should be ~18",
        centre[0]
    );
}

#[test]
fn test_band_limit_cap_truncates_harmonic_series() {
    // Two lmax-8 coefficient series (45 volumes). With the cap lowered to
    // lmax 0 only the first coefficient survives, so the images become
    // scalar and the 3D-only cross-correlation metric is accepted.
    let target = multi_volume_blob([16, 16, 16], [8.0, 8.0, 8.0], 3.0, 45);
    let moving = multi_volume_blob([16, 16, 16], [9.0, 8.0, 8.0], 3.0, 45);

    let config = LinearConfig {
        scale_factors: vec![1.0],
        max_iter: vec![0],
        metric: MetricKind::CrossCorrelation,
        lmax: Some(0),
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    assert!(reg.run(&moving, &target, None, None).is_ok());
}

#[test]
fn test_disabled_band_limit_cap_keeps_every_volume() {
    // With the cap disabled the 45-volume series stays 4D, which the
    // cross-correlation metric rejects.
    let target = multi_volume_blob([16, 16, 16], [8.0, 8.0, 8.0], 3.0, 45);
    let moving = multi_volume_blob([16, 16, 16], [9.0, 8.0, 8.0], 3.0, 45);

    let config = LinearConfig {
        scale_factors: vec![1.0],
        max_iter: vec![0],
        metric: MetricKind::CrossCorrelation,
        lmax: None,
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    assert!(matches!(
        reg.run(&moving, &target, None, None),
        Err(RegistrationError::Unsupported(_))
    ));
}

#[test]
fn test_odd_band_limit_is_rejected() {
    let img = gaussian_blob([8, 8, 8], [4.0, 4.0, 4.0], 2.0);
    let config = LinearConfig {
        lmax: Some(3),
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    assert!(matches!(
        reg.run(&img, &img, None, None),
        Err(RegistrationError::Configuration(_))
    ));
}

#[test]
fn test_invalid_scale_factor_is_rejected() {
    let img = gaussian_blob([8, 8, 8], [4.0, 4.0, 4.0], 2.0);
    let config = LinearConfig {
        scale_factors: vec![1.5],
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    assert!(matches!(
        reg.run(&img, &img, None, None),
        Err(RegistrationError::Configuration(_))
    ));
}

#[test]
fn test_mismatched_per_level_vector_is_rejected() {
    let img = gaussian_blob([8, 8, 8], [4.0, 4.0, 4.0], 2.0);
    let config = LinearConfig {
        scale_factors: vec![0.5, 1.0],
        max_iter: vec![10, 20, 30],
        ..LinearConfig::default()
    };
    let reg = LinearRegistration::new(TransformModel::Rigid, config);
    assert!(matches!(
        reg.run(&img, &img, None, None),
        Err(RegistrationError::Configuration(_))
    ));
}

#[test]
fn test_non_harmonic_volume_mismatch_is_rejected() {
    let a = Volume::zeros([8, 8, 8], 2);
    let b = Volume::zeros([8, 8, 8], 3);
    let reg = LinearRegistration::new(TransformModel::Rigid, LinearConfig::default());
    assert!(matches!(
        reg.run(&a, &b, None, None),
        Err(RegistrationError::DimensionMismatch(_))
    ));
}
