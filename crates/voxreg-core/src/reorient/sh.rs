use nalgebra::DMatrix;

/// Number of coefficients in an even spherical-harmonic series of degree `l`.
pub fn n_for_l(l: usize) -> usize {
    (l + 1) * (l + 2) / 2
}

/// Degree of an even series with `n` coefficients, if `n` is a valid count
/// (1, 6, 15, 28, ...).
pub fn l_for_n(n: usize) -> Option<usize> {
    let mut l = 0;
    loop {
        let count = n_for_l(l);
        if count == n {
            return Some(l);
        }
        if count > n {
            return None;
        }
        l += 2;
    }
}

/// Evaluation matrix of the real, antipodally symmetric spherical-harmonic
/// basis: one row per direction, one column per (l, m) coefficient with even
/// l ascending and m from -l to l.
pub fn basis_matrix(dirs: &[[f64; 3]], lmax: usize) -> DMatrix<f64> {
    let n = n_for_l(lmax);
    let mut basis = DMatrix::<f64>::zeros(dirs.len(), n);

    for (row, d) in dirs.iter().enumerate() {
        let theta = d[2].clamp(-1.0, 1.0).acos();
        let phi = d[1].atan2(d[0]);
        let cos_theta = theta.cos();

        let mut col = 0;
        for l in (0..=lmax).step_by(2) {
            for m in -(l as isize)..=(l as isize) {
                basis[(row, col)] = evaluate(l, m, cos_theta, phi);
                col += 1;
            }
        }
    }
    basis
}

/// Degree of the coefficient at a given column of the basis.
pub fn l_for_column(col: usize) -> usize {
    let mut l = 0;
    let mut start = 0;
    loop {
        let width = 2 * l + 1;
        if col < start + width {
            return l;
        }
        start += width;
        l += 2;
    }
}

fn evaluate(l: usize, m: isize, cos_theta: f64, phi: f64) -> f64 {
    let m_abs = m.unsigned_abs();
    let p = normalised_legendre(l, m_abs, cos_theta);
    if m == 0 {
        p
    } else if m > 0 {
        std::f64::consts::SQRT_2 * p * (m as f64 * phi).cos()
    } else {
        std::f64::consts::SQRT_2 * p * (m_abs as f64 * phi).sin()
    }
}

/// Associated Legendre function with the full orthonormalisation factor
/// folded in, computed by the standard upward recurrences.
fn normalised_legendre(l: usize, m: usize, x: f64) -> f64 {
    // P_m^m with normalisation accumulated along the way to avoid huge
    // intermediate factorials.
    let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
    let mut pmm = (1.0 / (4.0 * std::f64::consts::PI)).sqrt();
    for k in 1..=m {
        pmm *= -somx2 * ((2.0 * k as f64 + 1.0) / (2.0 * k as f64)).sqrt();
    }
    if l == m {
        return pmm;
    }

    let mut pm1 = pmm;
    let mut pl = x * ((2 * m + 3) as f64).sqrt() * pmm;
    if l == m + 1 {
        return pl;
    }

    for ll in (m + 2)..=l {
        let lf = ll as f64;
        let mf = m as f64;
        let a = (((2.0 * lf + 1.0) * (2.0 * lf - 1.0)) / ((lf - mf) * (lf + mf))).sqrt();
        let b = (((2.0 * lf + 1.0) * (lf - mf - 1.0) * (lf + mf - 1.0))
            / ((2.0 * lf - 3.0) * (lf - mf) * (lf + mf)))
            .sqrt();
        let next = a * x * pl - b * pm1;
        pm1 = pl;
        pl = next;
    }
    pl
}
