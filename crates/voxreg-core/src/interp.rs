//! Voxel-space interpolation primitives.
//!
//! Trilinear sampling drives the optimization inner loops; Catmull-Rom cubic
//! sampling is used when reslicing final outputs. Coordinates are continuous
//! voxel indices; samples outside the grid return zero.

use ndarray::Array4;

/// Trilinear sample of one volume at a continuous voxel coordinate.
/// Returns 0.0 outside the grid.
pub fn trilinear(data: &Array4<f32>, vol: usize, x: f64, y: f64, z: f64) -> f32 {
    let (nx, ny, nz, _) = data.dim();
    if x < 0.0 || y < 0.0 || z < 0.0 {
        return 0.0;
    }
    if x > (nx - 1) as f64 || y > (ny - 1) as f64 || z > (nz - 1) as f64 {
        return 0.0;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let z0 = z.floor() as usize;
    let x1 = (x0 + 1).min(nx - 1);
    let y1 = (y0 + 1).min(ny - 1);
    let z1 = (z0 + 1).min(nz - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;
    let fz = (z - z0 as f64) as f32;

    let c00 = data[[x0, y0, z0, vol]] * (1.0 - fx) + data[[x1, y0, z0, vol]] * fx;
    let c10 = data[[x0, y1, z0, vol]] * (1.0 - fx) + data[[x1, y1, z0, vol]] * fx;
    let c01 = data[[x0, y0, z1, vol]] * (1.0 - fx) + data[[x1, y0, z1, vol]] * fx;
    let c11 = data[[x0, y1, z1, vol]] * (1.0 - fx) + data[[x1, y1, z1, vol]] * fx;

    let c0 = c00 * (1.0 - fy) + c10 * fy;
    let c1 = c01 * (1.0 - fy) + c11 * fy;
    c0 * (1.0 - fz) + c1 * fz
}

/// Whether a continuous coordinate lies inside the sampling support.
pub fn in_bounds(data: &Array4<f32>, x: f64, y: f64, z: f64) -> bool {
    let (nx, ny, nz, _) = data.dim();
    x >= 0.0
        && y >= 0.0
        && z >= 0.0
        && x <= (nx - 1) as f64
        && y <= (ny - 1) as f64
        && z <= (nz - 1) as f64
}

/// Central-difference intensity gradient at a continuous voxel coordinate,
/// in voxel units of the sampled grid.
pub fn gradient(data: &Array4<f32>, vol: usize, x: f64, y: f64, z: f64) -> [f64; 3] {
    [
        0.5 * (trilinear(data, vol, x + 1.0, y, z) - trilinear(data, vol, x - 1.0, y, z)) as f64,
        0.5 * (trilinear(data, vol, x, y + 1.0, z) - trilinear(data, vol, x, y - 1.0, z)) as f64,
        0.5 * (trilinear(data, vol, x, y, z + 1.0) - trilinear(data, vol, x, y, z - 1.0)) as f64,
    ]
}

fn catmull_rom_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

/// Catmull-Rom cubic sample of one volume at a continuous voxel coordinate.
/// Returns 0.0 outside the grid; near the border, out-of-range taps read as zero.
pub fn cubic(data: &Array4<f32>, vol: usize, x: f64, y: f64, z: f64) -> f32 {
    let (nx, ny, nz, _) = data.dim();
    if !in_bounds(data, x, y, z) {
        return 0.0;
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let z0 = z.floor();
    let wx = catmull_rom_weights(x - x0);
    let wy = catmull_rom_weights(y - y0);
    let wz = catmull_rom_weights(z - z0);

    let mut sum = 0.0f64;
    for (kz, &wkz) in wz.iter().enumerate() {
        let zi = z0 as isize + kz as isize - 1;
        if zi < 0 || zi >= nz as isize {
            continue;
        }
        for (ky, &wky) in wy.iter().enumerate() {
            let yi = y0 as isize + ky as isize - 1;
            if yi < 0 || yi >= ny as isize {
                continue;
            }
            for (kx, &wkx) in wx.iter().enumerate() {
                let xi = x0 as isize + kx as isize - 1;
                if xi < 0 || xi >= nx as isize {
                    continue;
                }
                sum += wkz
                    * wky
                    * wkx
                    * data[[xi as usize, yi as usize, zi as usize, vol]] as f64;
            }
        }
    }
    sum as f32
}
