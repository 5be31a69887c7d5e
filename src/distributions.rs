//! Service-time distributions, ported from
//! `common/distributions.py::ServiceTimeGenerator`.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTimeType {
    Fixed,
    Uniform,
    Exponential,
    Normal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceTimeConfig {
    pub kind: ServiceTimeType,
    /// FIXED: the constant. UNIFORM: lower bound `a`. EXPONENTIAL: `lambda`.
    /// NORMAL: mean.
    pub param_a: f64,
    /// UNIFORM: upper bound `b`. NORMAL: std-dev. Unused otherwise.
    pub param_b: f64,
}

impl Default for ServiceTimeConfig {
    fn default() -> Self {
        Self {
            kind: ServiceTimeType::Fixed,
            param_a: 1.0,
            param_b: 0.2,
        }
    }
}

/// `EXPONENTIAL` uses inverse-CDF `-ln(U)/lambda` with `U in (0,1]`;
/// `NORMAL` uses Box-Muller, clamped to a 0.01s floor.
pub fn generate(config: &ServiceTimeConfig, rng: &mut impl Rng) -> f64 {
    match config.kind {
        ServiceTimeType::Fixed => config.param_a,
        ServiceTimeType::Uniform => rng.gen_range(config.param_a..=config.param_b),
        ServiceTimeType::Exponential => {
            let lambda = config.param_a;
            let mut chi: f64 = rng.gen();
            while chi == 0.0 {
                chi = rng.gen();
            }
            (-1.0 / lambda) * chi.ln()
        }
        ServiceTimeType::Normal => {
            let mean = config.param_a;
            let std = config.param_b;
            let mut chi1: f64 = rng.gen();
            while chi1 == 0.0 {
                chi1 = rng.gen();
            }
            let chi2: f64 = rng.gen();
            let z = (-2.0 * chi1.ln()).sqrt() * (2.0 * std::f64::consts::PI * chi2).cos();
            (mean + std * z).max(0.01)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn fixed_is_constant() {
        let cfg = ServiceTimeConfig {
            kind: ServiceTimeType::Fixed,
            param_a: 0.1,
            param_b: 0.0,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        assert_eq!(generate(&cfg, &mut rng), 0.1);
    }

    #[test]
    fn normal_never_goes_below_floor() {
        let cfg = ServiceTimeConfig {
            kind: ServiceTimeType::Normal,
            param_a: 0.0,
            param_b: 10.0,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            assert!(generate(&cfg, &mut rng) >= 0.01);
        }
    }

    #[test]
    fn exponential_is_nonnegative() {
        let cfg = ServiceTimeConfig {
            kind: ServiceTimeType::Exponential,
            param_a: 1.0,
            param_b: 0.0,
        };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(generate(&cfg, &mut rng) >= 0.0);
        }
    }
}
