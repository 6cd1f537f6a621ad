// meridian_core/src/graph/loss.rs

//! Robust loss functions.
//!
//! A loss `rho(s)` reshapes the squared norm `s = |r|^2` of a residual block.
//! The solver works with the derivative `rho'(s)` as an iteratively
//! re-weighted least squares weight.

use dyn_clone::DynClone;
use std::fmt::Debug;

pub trait RobustLoss: DynClone + Debug + Send + Sync {
    /// `rho(s)`: the cost contributed by a block with squared residual norm `s`.
    fn cost(&self, squared_norm: f64) -> f64;

    /// `rho'(s)`: the weight applied to the block's residual and Jacobian.
    fn weight(&self, squared_norm: f64) -> f64;
}

dyn_clone::clone_trait_object!(RobustLoss);

/// Plain least squares, `rho(s) = s`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialLoss;

impl RobustLoss for TrivialLoss {
    fn cost(&self, squared_norm: f64) -> f64 {
        squared_norm
    }

    fn weight(&self, _squared_norm: f64) -> f64 {
        1.0
    }
}

/// Cauchy loss: `rho(s) = c^2 log(1 + s / c^2)`.
///
/// Influence decays smoothly but never reaches zero, so a noisy measurement
/// is down-weighted without being discarded.
#[derive(Debug, Clone, Copy)]
pub struct CauchyLoss {
    pub scale: f64,
}

impl CauchyLoss {
    /// Create new Cauchy loss. Panics if scale <= 0.
    pub fn new(scale: f64) -> Self {
        assert!(scale > 0.0, "Cauchy scale must be positive, got {}", scale);
        Self { scale }
    }
}

impl RobustLoss for CauchyLoss {
    fn cost(&self, squared_norm: f64) -> f64 {
        let c2 = self.scale * self.scale;
        c2 * (1.0 + squared_norm / c2).ln()
    }

    fn weight(&self, squared_norm: f64) -> f64 {
        let c2 = self.scale * self.scale;
        1.0 / (1.0 + squared_norm / c2)
    }
}

/// Tukey's biweight: `rho(s) = c^2/3 (1 - (1 - s/c^2)^3)` for `s <= c^2`,
/// constant beyond.
///
/// Residuals past the threshold get zero weight, which fully rejects a
/// confidently wrong measurement.
#[derive(Debug, Clone, Copy)]
pub struct TukeyLoss {
    pub scale: f64,
}

impl TukeyLoss {
    /// Create new Tukey loss. Panics if scale <= 0.
    pub fn new(scale: f64) -> Self {
        assert!(scale > 0.0, "Tukey scale must be positive, got {}", scale);
        Self { scale }
    }
}

impl RobustLoss for TukeyLoss {
    fn cost(&self, squared_norm: f64) -> f64 {
        let c2 = self.scale * self.scale;
        if squared_norm <= c2 {
            let v = 1.0 - squared_norm / c2;
            c2 / 3.0 * (1.0 - v * v * v)
        } else {
            c2 / 3.0
        }
    }

    fn weight(&self, squared_norm: f64) -> f64 {
        let c2 = self.scale * self.scale;
        if squared_norm <= c2 {
            let v = 1.0 - squared_norm / c2;
            v * v
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_trivial_loss_is_identity() {
        assert_eq!(TrivialLoss.cost(3.5), 3.5);
        assert_eq!(TrivialLoss.weight(100.0), 1.0);
    }

    #[test]
    fn test_cauchy_loss_weights() {
        let cauchy = CauchyLoss::new(1.0);
        assert_eq!(cauchy.weight(0.0), 1.0);
        assert_abs_diff_eq!(cauchy.weight(10.0), 1.0 / 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cauchy.cost(1.0), 2.0_f64.ln(), epsilon = 1e-12);
        assert!(cauchy.weight(1e6) > 0.0);
    }

    #[test]
    fn test_tukey_rejects_outliers() {
        let tukey = TukeyLoss::new(1.0);
        assert_eq!(tukey.weight(0.0), 1.0);
        assert_abs_diff_eq!(tukey.weight(0.5), 0.25, epsilon = 1e-12);
        assert_eq!(tukey.weight(1.5), 0.0);
        // Cost saturates at c^2 / 3.
        assert_abs_diff_eq!(tukey.cost(1.0), 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tukey.cost(50.0), 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_losses_agree_with_least_squares_near_zero() {
        let s = 1e-6;
        assert_abs_diff_eq!(CauchyLoss::new(1.0).cost(s), s, epsilon = 1e-11);
        assert_abs_diff_eq!(TukeyLoss::new(1.0).cost(s), s, epsilon = 1e-11);
    }

    #[test]
    #[should_panic(expected = "Tukey scale must be positive")]
    fn test_tukey_zero_scale_panics() {
        TukeyLoss::new(0.0);
    }
}
