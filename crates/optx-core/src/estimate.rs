//! # Estimates With an Explicit Unknown
//!
//! Statistics and cost estimates are frequently incomplete: a connector may not
//! report column statistics, or an operator may have no derivation formula yet.
//! Treating such gaps as `0.0` would make an unanalyzed table look free, so every
//! estimated quantity in this crate is an [`Estimate`]: either a finite number or
//! the explicit *unknown* sentinel.
//!
//! ## Propagation
//!
//! Arithmetic on estimates is closed: any operation with an unknown operand yields
//! unknown. A parent operator whose cost depends on an unknown child size is
//! therefore itself unknown in that component, rather than a misleading
//! approximation.
//!
//! ```text
//! known(3) + known(4) = known(7)
//! known(3) + unknown  = unknown
//! unknown  * 0.0      = unknown
//! ```
//!
//! On the wire an unknown estimate is encoded as JSON `null`.
//!
//! ## Finite Values Only
//!
//! A known estimate is always finite. NaN and both infinities become unknown,
//! whether they are passed to [`Estimate::of`] or produced by arithmetic
//! (`x / 0`, an overflowing product). Consequences:
//!
//! - An open-ended column range (`low = -inf` or `high = +inf`) is stored as an
//!   unknown bound, so range predicates on it use the configured default
//!   selectivity instead of interpolating.
//! - A cost too large for `f64` is reported as unknown rather than as an
//!   infinitely expensive plan, and ranks after every known cost.
//!
//! JSON has no encoding for infinity either, so this keeps an estimate
//! unchanged across a round trip through the HTTP service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Estimate(Option<f64>);

impl Estimate {
    pub const UNKNOWN: Estimate = Estimate(None);
    pub const ZERO: Estimate = Estimate(Some(0.0));

    /// A known value. Non-finite inputs are folded into unknown.
    pub fn of(value: f64) -> Self {
        if value.is_finite() {
            Estimate(Some(value))
        } else {
            Estimate::UNKNOWN
        }
    }

    pub fn unknown() -> Self {
        Estimate::UNKNOWN
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_known(&self) -> bool {
        self.0.is_some()
    }

    pub fn value(&self) -> Option<f64> {
        self.0
    }

    /// The known value, or `default` when unknown.
    pub fn or(&self, default: f64) -> f64 {
        self.0.unwrap_or(default)
    }

    /// Replace an unknown estimate with `other`.
    pub fn or_else(self, other: Estimate) -> Estimate {
        if self.is_known() {
            self
        } else {
            other
        }
    }

    pub fn min(self, other: Estimate) -> Estimate {
        self.zip(other, f64::min)
    }

    pub fn max(self, other: Estimate) -> Estimate {
        self.zip(other, f64::max)
    }

    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Estimate {
        match self.0 {
            Some(v) => Estimate::of(f(v)),
            None => Estimate::UNKNOWN,
        }
    }

    fn zip(self, other: Estimate, f: impl FnOnce(f64, f64) -> f64) -> Estimate {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Estimate::of(f(a, b)),
            _ => Estimate::UNKNOWN,
        }
    }
}

impl From<f64> for Estimate {
    fn from(value: f64) -> Self {
        Estimate::of(value)
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{v:.1}"),
            None => write!(f, "?"),
        }
    }
}

macro_rules! estimate_binop {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Estimate {
            type Output = Estimate;

            fn $method(self, rhs: Estimate) -> Estimate {
                self.zip(rhs, |a, b| a $op b)
            }
        }

        impl $trait<f64> for Estimate {
            type Output = Estimate;

            fn $method(self, rhs: f64) -> Estimate {
                self.zip(Estimate::of(rhs), |a, b| a $op b)
            }
        }
    };
}

estimate_binop!(Add, add, +);
estimate_binop!(Sub, sub, -);
estimate_binop!(Mul, mul, *);
estimate_binop!(Div, div, /);

impl Sum for Estimate {
    fn sum<I: Iterator<Item = Estimate>>(iter: I) -> Estimate {
        iter.fold(Estimate::ZERO, |acc, e| acc + e)
    }
}
