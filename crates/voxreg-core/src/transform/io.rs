use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use nalgebra::{Matrix3, Vector3};

use crate::error::{RegistrationError, Result};
use crate::transform::linear::LinearTransform;

/// Write a transform as a 4x4 homogeneous matrix, one row per line. The
/// rotation centre is folded into the translation column, so the file is a
/// plain affine map.
pub fn save_transform(path: &Path, transform: &LinearTransform) -> Result<()> {
    let h = transform.homogeneous();
    let mut file = File::create(path)?;
    for i in 0..4 {
        writeln!(
            file,
            "{:.12} {:.12} {:.12} {:.12}",
            h[(i, 0)],
            h[(i, 1)],
            h[(i, 2)],
            h[(i, 3)]
        )?;
    }
    Ok(())
}

/// Read a transform from a text file of 3 or 4 rows of 4 numbers. Lines
/// starting with '#' are ignored. A fourth row, when present, must be the
/// homogeneous row `0 0 0 1`.
pub fn load_transform(path: &Path) -> Result<LinearTransform> {
    let file = File::open(path)?;
    let mut rows: Vec<[f64; 4]> = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let values: Vec<f64> = trimmed
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>().map_err(|_| {
                    RegistrationError::InvalidFile(format!(
                        "{}: invalid number '{}'",
                        path.display(),
                        tok
                    ))
                })
            })
            .collect::<Result<_>>()?;
        if values.len() != 4 {
            return Err(RegistrationError::InvalidFile(format!(
                "{}: expected 4 values per row, found {}",
                path.display(),
                values.len()
            )));
        }
        rows.push([values[0], values[1], values[2], values[3]]);
    }

    if rows.len() != 3 && rows.len() != 4 {
        return Err(RegistrationError::InvalidFile(format!(
            "{}: expected 3 or 4 matrix rows, found {}",
            path.display(),
            rows.len()
        )));
    }
    if rows.len() == 4 {
        let last = rows[3];
        if last != [0.0, 0.0, 0.0, 1.0] {
            return Err(RegistrationError::InvalidFile(format!(
                "{}: last row of a homogeneous matrix must be 0 0 0 1",
                path.display()
            )));
        }
    }

    let matrix = Matrix3::new(
        rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
        rows[2][1], rows[2][2],
    );
    let offset = Vector3::new(rows[0][3], rows[1][3], rows[2][3]);
    LinearTransform::from_compact(matrix, offset)
}
