use crate::ops::OperatorDef;
use crate::Result;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_SIZE: i32 = 0;
pub const DEFAULT_ALPHA: f32 = 0.0;
pub const DEFAULT_BETA: f32 = 0.0;
pub const DEFAULT_BIAS: f32 = 1.0;

/// Per-instance LRN constants: `y = x / (bias + alpha * sum(x^2))^beta`
/// with the sum over `window_size` neighbouring channels.
///
/// Set once when an operator is built and shared by the forward and
/// backward descriptors. Validity is decided by the backend when the
/// normalization descriptor is set.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct LrnParameters {
    pub window_size: i32,
    pub alpha: f32,
    pub beta: f32,
    pub bias: f32,
}

impl Default for LrnParameters {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_SIZE,
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            bias: DEFAULT_BIAS,
        }
    }
}

impl LrnParameters {
    pub fn new(window_size: i32, alpha: f32, beta: f32, bias: f32) -> Self {
        Self {
            window_size,
            alpha,
            beta,
            bias,
        }
    }

    /// Read `size`, `alpha`, `beta` and `bias` from an operator def
    pub fn from_def(def: &OperatorDef) -> Result<Self> {
        Ok(Self {
            window_size: def.get_single_argument("size", DEFAULT_SIZE)?,
            alpha: def.get_single_argument("alpha", DEFAULT_ALPHA)?,
            beta: def.get_single_argument("beta", DEFAULT_BETA)?,
            bias: def.get_single_argument("bias", DEFAULT_BIAS)?,
        })
    }
}
