use nalgebra::{Matrix3, Vector3};

use voxreg_core::error::RegistrationError;
use voxreg_core::transform::linear::LinearTransform;
use voxreg_core::transform::model::euler_matrix;
use voxreg_core::warp::field::DisplacementField;
use voxreg_core::warp::io::{load_warp, save_warp};
use voxreg_core::warp::WarpBundle;

fn example_bundle() -> WarpBundle {
    let shape = [4, 5, 6];
    let mut d1 = DisplacementField::zeros(shape);
    let mut d2 = DisplacementField::zeros(shape);
    for x in 0..shape[0] {
        for y in 0..shape[1] {
            for z in 0..shape[2] {
                d1.set(x, y, z, [0.1 * x as f64, -0.2 * y as f64, 0.05 * z as f64]);
                d2.set(x, y, z, [-0.1 * x as f64, 0.2 * y as f64, -0.05 * z as f64]);
            }
        }
    }
    let linear = LinearTransform::new(
        euler_matrix(0.1, 0.0, -0.2),
        Vector3::new(1.0, 2.0, 3.0),
        Vector3::new(2.0, 2.5, 3.0),
    )
    .unwrap();

    WarpBundle {
        d1_inv: d1.negated(),
        d2_inv: d2.negated(),
        d1,
        d2,
        linear,
        spacing: [1.0, 1.25, 2.0],
    }
}

#[test]
fn test_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warp.bin");

    let bundle = example_bundle();
    save_warp(&path, &bundle).unwrap();
    let loaded = load_warp(&path).unwrap();

    assert_eq!(loaded.d1.shape(), bundle.d1.shape());
    assert_eq!(loaded.spacing, bundle.spacing);
    assert_eq!(loaded.d1.data, bundle.d1.data);
    assert_eq!(loaded.d1_inv.data, bundle.d1_inv.data);
    assert_eq!(loaded.d2.data, bundle.d2.data);
    assert_eq!(loaded.d2_inv.data, bundle.d2_inv.data);

    let h_orig = bundle.linear.homogeneous();
    let h_loaded = loaded.linear.homogeneous();
    for i in 0..4 {
        for j in 0..4 {
            assert!(
                (h_orig[(i, j)] - h_loaded[(i, j)]).abs() < 1e-12,
                "linear[({},{})] drifted",
                i,
                j
            );
        }
    }
}

#[test]
fn test_wrong_magic_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not_a_warp.bin");
    std::fs::write(&path, b"PNG\x89 definitely not a warp file").unwrap();
    assert!(matches!(
        load_warp(&path),
        Err(RegistrationError::InvalidFile(_))
    ));
}

#[test]
fn test_truncated_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warp.bin");

    let bundle = example_bundle();
    save_warp(&path, &bundle).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(load_warp(&path).is_err());
}

#[test]
fn test_linear_transform_survives_with_its_halves() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warp.bin");

    let bundle = example_bundle();
    save_warp(&path, &bundle).unwrap();
    let loaded = load_warp(&path).unwrap();

    let p = [1.0, 2.0, 3.0];
    let full = loaded.linear.apply(p);
    let halved = loaded.linear.apply_half(loaded.linear.apply_half(p));
    for i in 0..3 {
        assert!((full[i] - halved[i]).abs() < 1e-9);
    }

    let matrix: &Matrix3<f64> = loaded.linear.matrix();
    assert!(matrix.determinant() > 0.0);
}
