use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use nalgebra::{Matrix3, Vector3};

use crate::consts::DEFAULT_DIRECTION_COUNT;
use crate::error::{RegistrationError, Result};

/// A set of unit directions on the hemisphere, used to sample and refit
/// spherical-harmonic series during reorientation.
#[derive(Clone, Debug)]
pub struct DirectionSet {
    dirs: Vec<[f64; 3]>,
}

impl DirectionSet {
    /// The built-in set: a spherical Fibonacci spiral over the upper
    /// hemisphere, near-uniform for any count.
    pub fn default_set() -> Self {
        Self::fibonacci(DEFAULT_DIRECTION_COUNT)
    }

    pub fn fibonacci(n: usize) -> Self {
        let golden_angle = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        let dirs = (0..n)
            .map(|i| {
                let z = (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).max(0.0).sqrt();
                let phi = golden_angle * i as f64;
                [r * phi.cos(), r * phi.sin(), z]
            })
            .collect();
        Self { dirs }
    }

    /// Read directions from a text file: either three Cartesian components
    /// per line (normalised on load) or two spherical angles (azimuth and
    /// elevation, radians). Lines starting with '#' are ignored.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut dirs = Vec::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let values: Vec<f64> = trimmed
                .split([' ', '\t', ','])
                .filter(|tok| !tok.is_empty())
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

            match values.len() {
                3 => {
                    let norm =
                        (values[0].powi(2) + values[1].powi(2) + values[2].powi(2)).sqrt();
                    if norm == 0.0 {
                        return Err(RegistrationError::InvalidFile(format!(
                            "{}: zero-length direction",
                            path.display()
                        )));
                    }
                    dirs.push([values[0] / norm, values[1] / norm, values[2] / norm]);
                }
                2 => {
                    let (az, el) = (values[0], values[1]);
                    dirs.push([
                        az.cos() * el.sin(),
                        az.sin() * el.sin(),
                        el.cos(),
                    ]);
                }
                n => {
                    return Err(RegistrationError::InvalidFile(format!(
                        "{}: expected 2 or 3 values per direction, found {}",
                        path.display(),
                        n
                    )));
                }
            }
        }

        if dirs.is_empty() {
            return Err(RegistrationError::InvalidFile(format!(
                "{}: no directions found",
                path.display()
            )));
        }
        Ok(Self { dirs })
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn directions(&self) -> &[[f64; 3]] {
        &self.dirs
    }

    /// The same directions carried through a rotation.
    pub fn rotated(&self, r: &Matrix3<f64>) -> Vec<[f64; 3]> {
        self.dirs
            .iter()
            .map(|d| {
                let v = r * Vector3::new(d[0], d[1], d[2]);
                [v.x, v.y, v.z]
            })
            .collect()
    }
}
