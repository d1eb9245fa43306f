use ndarray::Array3;

use voxreg_core::volume::Volume;

/// A smooth Gaussian blob, the workhorse phantom of these tests: its
/// intensity gradient is nonzero almost everywhere, so misalignments are
/// visible to every metric.
pub fn gaussian_blob(shape: [usize; 3], centre: [f64; 3], sigma: f64) -> Volume {
    let mut data = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));
    let s2 = 2.0 * sigma * sigma;
    for x in 0..shape[0] {
        for y in 0..shape[1] {
            for z in 0..shape[2] {
                let dx = x as f64 - centre[0];
                let dy = y as f64 - centre[1];
                let dz = z as f64 - centre[2];
                data[[x, y, z]] = (-(dx * dx + dy * dy + dz * dz) / s2).exp() as f32;
            }
        }
    }
    Volume::from_scalar(data)
}

/// The blob stacked along the volume axis, each volume scaled by
/// 1 / (v + 1) so the volumes stay distinguishable.
#[allow(dead_code)]
pub fn multi_volume_blob(
    shape: [usize; 3],
    centre: [f64; 3],
    sigma: f64,
    volumes: usize,
) -> Volume {
    let blob = gaussian_blob(shape, centre, sigma);
    let mut vol = Volume::zeros(shape, volumes);
    for x in 0..shape[0] {
        for y in 0..shape[1] {
            for z in 0..shape[2] {
                for v in 0..volumes {
                    vol.data[[x, y, z, v]] = blob.data[[x, y, z, 0]] / (v + 1) as f32;
                }
            }
        }
    }
    vol
}

/// A ones mask covering a centred box of the given half-width.
#[allow(dead_code)]
pub fn box_mask(shape: [usize; 3], half_width: usize) -> Volume {
    let mut data = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));
    let c = [shape[0] / 2, shape[1] / 2, shape[2] / 2];
    for x in 0..shape[0] {
        for y in 0..shape[1] {
            for z in 0..shape[2] {
                if x.abs_diff(c[0]) <= half_width
                    && y.abs_diff(c[1]) <= half_width
                    && z.abs_diff(c[2]) <= half_width
                {
                    data[[x, y, z]] = 1.0;
                }
            }
        }
    }
    Volume::from_scalar(data)
}
