//! Sampling helpers for step shapes: gamma-distributed longitudinal
//! offsets and the angular spread of cascade light.

use glam::DVec3;

use crate::parameterization::{angular_dist_norm, ANGULAR_DIST_A, ANGULAR_DIST_B};
use crate::random::RandomService;

/// Draw from a unit-scale gamma distribution with shape `a > 0`.
///
/// Uses Marsaglia & Tsang's squeeze method for `a >= 1` and the
/// `Gamma(a+1)·U^(1/a)` boost for `a < 1`. Non-positive or NaN shapes
/// return 0.
pub fn gamma_distributed(shape: f64, rng: &mut dyn RandomService) -> f64 {
    if !(shape > 0.0) || !shape.is_finite() {
        return 0.0;
    }
    if shape < 1.0 {
        let u = rng.uniform();
        return gamma_distributed(shape + 1.0, rng) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = rng.gaussian(0.0, 1.0);
        let v = 1.0 + c * x;
        if v <= 0.0 {
            continue;
        }
        let v = v * v * v;
        let u = rng.uniform();
        if u < 1.0 - 0.0331 * x * x * x * x {
            return d * v;
        }
        if u > 0.0 && u.ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Cosine of the emission angle of a cascade step relative to the cascade axis.
pub fn cascade_emission_cos(rng: &mut dyn RandomService) -> f64 {
    let norm = angular_dist_norm();
    let u = rng.uniform();
    let cos = 1.0 - (-(1.0 - u * norm).ln() / ANGULAR_DIST_B).powf(1.0 / ANGULAR_DIST_A);
    cos.max(-1.0)
}

/// Rotate `dir` by the polar angle with the given cosine around a uniformly
/// random azimuth.
pub fn scatter_direction(dir: DVec3, cos_theta: f64, rng: &mut dyn RandomService) -> DVec3 {
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = std::f64::consts::TAU * rng.uniform();
    let (u, v) = dir.any_orthonormal_pair();
    (dir * cos_theta + (u * phi.cos() + v * phi.sin()) * sin_theta).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::StdRandomService;

    #[test]
    fn test_gamma_mean_and_variance() {
        let mut rng = StdRandomService::new(11);
        for &shape in &[0.5, 1.0, 2.7, 7.0] {
            let n = 20_000;
            let xs: Vec<f64> = (0..n).map(|_| gamma_distributed(shape, &mut rng)).collect();
            assert!(xs.iter().all(|&x| x >= 0.0));
            let mean = xs.iter().sum::<f64>() / n as f64;
            let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
            // Gamma(a, 1): mean = a, var = a
            assert!((mean - shape).abs() < 0.05 * shape + 0.05, "a={} mean={}", shape, mean);
            assert!((var - shape).abs() < 0.1 * shape + 0.05, "a={} var={}", shape, var);
        }
    }

    #[test]
    fn test_emission_cos_in_range() {
        let mut rng = StdRandomService::new(5);
        let mut forward = 0;
        for _ in 0..10_000 {
            let c = cascade_emission_cos(&mut rng);
            assert!((-1.0..=1.0).contains(&c), "cos = {}", c);
            if c > 0.0 {
                forward += 1;
            }
        }
        // Cascade light is strongly forward peaked
        assert!(forward > 6_000, "forward fraction {}", forward);
    }

    #[test]
    fn test_scatter_keeps_angle() {
        let mut rng = StdRandomService::new(2);
        let dir = DVec3::new(1.0, 2.0, -0.5).normalize();
        for &cos in &[1.0, 0.75, 0.0, -0.3, -1.0] {
            let out = scatter_direction(dir, cos, &mut rng);
            assert!((out.length() - 1.0).abs() < 1e-12);
            assert!((out.dot(dir) - cos).abs() < 1e-9, "cos {} got {}", cos, out.dot(dir));
        }
    }
}
