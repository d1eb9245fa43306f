use approx::assert_relative_eq;
use nalgebra::{Matrix3, Vector3};

use voxreg_core::error::RegistrationError;
use voxreg_core::transform::io::{load_transform, save_transform};
use voxreg_core::transform::linear::LinearTransform;
use voxreg_core::transform::model::{
    euler_from_matrix, euler_matrix, params_from_transform, transform_from_params, TransformModel,
};

fn example_transform() -> LinearTransform {
    let matrix = euler_matrix(0.1, -0.2, 0.3) * 1.1;
    LinearTransform::new(matrix, Vector3::new(2.0, -1.5, 0.5), Vector3::new(16.0, 16.0, 16.0))
        .unwrap()
}

#[test]
fn test_identity_maps_points_to_themselves() {
    let t = LinearTransform::identity();
    let p = [3.0, -4.0, 5.5];
    assert_eq!(t.apply(p), p);
    assert_eq!(t.apply_half(p), p);
    assert_eq!(t.apply_half_inverse(p), p);
}

#[test]
fn test_offset_accounts_for_centre() {
    let t = LinearTransform::new(
        euler_matrix(0.0, 0.0, std::f64::consts::FRAC_PI_2),
        Vector3::zeros(),
        Vector3::new(10.0, 10.0, 0.0),
    )
    .unwrap();

    // The centre itself only moves by the translation (here, zero).
    let c = t.apply([10.0, 10.0, 0.0]);
    assert_relative_eq!(c[0], 10.0, epsilon = 1e-12);
    assert_relative_eq!(c[1], 10.0, epsilon = 1e-12);
}

#[test]
fn test_half_composed_twice_matches_full_transform() {
    let t = example_transform();
    for p in [[0.0, 0.0, 0.0], [5.0, 7.0, -3.0], [31.0, 2.0, 18.0]] {
        let full = t.apply(p);
        let halved = t.apply_half(t.apply_half(p));
        for i in 0..3 {
            assert_relative_eq!(full[i], halved[i], epsilon = 1e-9);
        }
    }
}

#[test]
fn test_half_inverse_undoes_half() {
    let t = example_transform();
    let p = [12.0, 3.0, -7.0];
    let roundtrip = t.apply_half_inverse(t.apply_half(p));
    for i in 0..3 {
        assert_relative_eq!(roundtrip[i], p[i], epsilon = 1e-9);
    }
}

#[test]
fn test_inverse_roundtrip() {
    let t = example_transform();
    let inv = t.inverse().unwrap();
    let p = [4.0, -9.0, 2.0];
    let roundtrip = inv.apply(t.apply(p));
    for i in 0..3 {
        assert_relative_eq!(roundtrip[i], p[i], epsilon = 1e-9);
    }
}

#[test]
fn test_negative_determinant_is_rejected() {
    let mut matrix = Matrix3::identity();
    matrix[(0, 0)] = -1.0;
    let result = LinearTransform::new(matrix, Vector3::zeros(), Vector3::zeros());
    assert!(matches!(result, Err(RegistrationError::Numerical(_))));
}

#[test]
fn test_euler_angles_roundtrip() {
    for angles in [[0.1, 0.2, 0.3], [-0.7, 0.4, -1.2], [0.0, 0.0, 0.0]] {
        let m = euler_matrix(angles[0], angles[1], angles[2]);
        let recovered = euler_from_matrix(&m);
        for i in 0..3 {
            assert_relative_eq!(recovered[i], angles[i], epsilon = 1e-10);
        }
    }
}

#[test]
fn test_rigid_params_roundtrip() {
    let t = LinearTransform::new(
        euler_matrix(0.2, -0.1, 0.4),
        Vector3::new(1.0, 2.0, 3.0),
        Vector3::new(8.0, 8.0, 8.0),
    )
    .unwrap();
    let params = params_from_transform(TransformModel::Rigid, &t);
    let rebuilt = transform_from_params(TransformModel::Rigid, &params, *t.centre()).unwrap();

    let p = [5.0, 6.0, 7.0];
    let a = t.apply(p);
    let b = rebuilt.apply(p);
    for i in 0..3 {
        assert_relative_eq!(a[i], b[i], epsilon = 1e-9);
    }
}

#[test]
fn test_scaled_offset_keeps_linear_part() {
    let t = example_transform();
    let scaled = t.with_scaled_offset(0.5).unwrap();
    assert_eq!(scaled.matrix(), t.matrix());
    assert_relative_eq!(scaled.offset()[0], t.offset()[0] * 0.5, epsilon = 1e-12);
}

#[test]
fn test_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("transform.txt");

    let t = example_transform();
    save_transform(&path, &t).unwrap();
    let loaded = load_transform(&path).unwrap();

    let p = [1.0, 2.0, 3.0];
    let a = t.apply(p);
    let b = loaded.apply(p);
    for i in 0..3 {
        assert_relative_eq!(a[i], b[i], epsilon = 1e-9);
    }
}

#[test]
fn test_load_rejects_malformed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.txt");
    std::fs::write(&path, "1 0 0\n0 1 0\n").unwrap();
    assert!(matches!(
        load_transform(&path),
        Err(RegistrationError::InvalidFile(_))
    ));
}
