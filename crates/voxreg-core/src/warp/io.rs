use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::{Matrix3, Vector3};
use ndarray::Array4;

use crate::error::{RegistrationError, Result};
use crate::transform::linear::LinearTransform;
use crate::warp::field::DisplacementField;
use crate::warp::WarpBundle;

const WARP_MAGIC: &[u8; 8] = b"VOXWARP\0";
const WARP_VERSION: u32 = 1;

/// Serialise a warp bundle: header, linear transform, then the four
/// displacement fields as little-endian f32 in array iteration order.
pub fn save_warp(path: &Path, bundle: &WarpBundle) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    w.write_all(WARP_MAGIC)?;
    w.write_u32::<LittleEndian>(WARP_VERSION)?;

    let [nx, ny, nz] = bundle.d1.shape();
    w.write_u64::<LittleEndian>(nx as u64)?;
    w.write_u64::<LittleEndian>(ny as u64)?;
    w.write_u64::<LittleEndian>(nz as u64)?;
    for s in bundle.spacing {
        w.write_f64::<LittleEndian>(s)?;
    }

    let h = bundle.linear.homogeneous();
    for i in 0..4 {
        for j in 0..4 {
            w.write_f64::<LittleEndian>(h[(i, j)])?;
        }
    }

    for field in [&bundle.d1, &bundle.d1_inv, &bundle.d2, &bundle.d2_inv] {
        for &v in field.data.iter() {
            w.write_f32::<LittleEndian>(v)?;
        }
    }

    w.flush()?;
    Ok(())
}

pub fn load_warp(path: &Path) -> Result<WarpBundle> {
    let mut r = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != WARP_MAGIC {
        return Err(RegistrationError::InvalidFile(format!(
            "{}: not a warp bundle",
            path.display()
        )));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != WARP_VERSION {
        return Err(RegistrationError::InvalidFile(format!(
            "{}: unsupported warp version {}",
            path.display(),
            version
        )));
    }

    let nx = r.read_u64::<LittleEndian>()? as usize;
    let ny = r.read_u64::<LittleEndian>()? as usize;
    let nz = r.read_u64::<LittleEndian>()? as usize;
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(RegistrationError::InvalidFile(format!(
            "{}: empty field dimensions",
            path.display()
        )));
    }

    let mut spacing = [0.0f64; 3];
    for s in &mut spacing {
        *s = r.read_f64::<LittleEndian>()?;
    }

    let mut h = [[0.0f64; 4]; 4];
    for row in &mut h {
        for v in row.iter_mut() {
            *v = r.read_f64::<LittleEndian>()?;
        }
    }
    let matrix = Matrix3::new(
        h[0][0], h[0][1], h[0][2], h[1][0], h[1][1], h[1][2], h[2][0], h[2][1], h[2][2],
    );
    let offset = Vector3::new(h[0][3], h[1][3], h[2][3]);
    let linear = LinearTransform::from_compact(matrix, offset)?;

    let mut read_field = || -> Result<DisplacementField> {
        let count = nx * ny * nz * 3;
        let mut values = vec![0.0f32; count];
        r.read_f32_into::<LittleEndian>(&mut values)?;
        let data = Array4::from_shape_vec((nx, ny, nz, 3), values).map_err(|e| {
            RegistrationError::InvalidFile(format!("{}: {}", path.display(), e))
        })?;
        Ok(DisplacementField { data })
    };

    let d1 = read_field()?;
    let d1_inv = read_field()?;
    let d2 = read_field()?;
    let d2_inv = read_field()?;

    Ok(WarpBundle {
        d1,
        d1_inv,
        d2,
        d2_inv,
        linear,
        spacing,
    })
}
