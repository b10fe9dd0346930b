//! Numerical gradient validation
//!
//! Compares the analytical gradient an operator produces against a
//! finite-difference estimate of a scalar objective:
//!
//! ```text
//! f'(x) ≈ [f(x + ε) - f(x - ε)] / (2ε)
//! ```
//!
//! For LRN the objective is `sum(Y * dY)`, whose gradient with respect to
//! `X` is exactly what `LRNGradient` computes for upstream gradient `dY`.
//!
//! # Example
//!
//! ```rust
//! use normflow_core::numerical_gradient::{check_lrn_gradient, GradientCheckConfig};
//! use normflow_core::ops::LrnParameters;
//! use normflow_core::DeviceContext;
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(DeviceContext::emulated(0));
//! let params = LrnParameters::new(3, 0.5, 0.75, 2.0);
//! let x = [0.3f32, -0.7, 1.1, 0.4];
//! let dy = [1.0f32, 0.5, -0.25, 2.0];
//!
//! let result = check_lrn_gradient(
//!     &ctx,
//!     params,
//!     [1, 4, 1, 1],
//!     &x,
//!     &dy,
//!     &GradientCheckConfig::default(),
//! )
//! .unwrap();
//! assert!(result.is_ok(), "{}", result.summary());
//! ```

use crate::device::DeviceContext;
use crate::ops::{LrnGradientOp, LrnOp, LrnParameters};
use crate::{Result, Tensor, TensorError};
use std::sync::Arc;

/// Configuration for numerical gradient checking
#[derive(Debug, Clone)]
pub struct GradientCheckConfig {
    /// Step for finite difference computation
    pub epsilon: f64,
    /// Relative tolerance for gradient comparison
    pub rtol: f64,
    /// Absolute tolerance for gradient comparison
    pub atol: f64,
    /// Record the index of every failing element
    pub check_elementwise: bool,
    /// Check at most this many evenly spaced elements
    pub max_samples: Option<usize>,
}

// Tolerances are sized for single-precision kernels.
impl Default for GradientCheckConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-3,
            rtol: 1e-2,
            atol: 1e-3,
            check_elementwise: false,
            max_samples: None,
        }
    }
}

impl GradientCheckConfig {
    /// Create a configuration for strict checking (tighter tolerances)
    pub fn strict() -> Self {
        Self {
            epsilon: 5e-4,
            rtol: 5e-3,
            atol: 5e-4,
            check_elementwise: true,
            max_samples: None,
        }
    }

    /// Create a configuration for quick checks of large tensors
    pub fn relaxed() -> Self {
        Self {
            epsilon: 1e-2,
            rtol: 5e-2,
            atol: 1e-2,
            check_elementwise: false,
            max_samples: Some(64),
        }
    }
}

/// Result of gradient checking
#[derive(Debug, Clone)]
pub struct GradientCheckResult {
    /// Whether the gradient check passed
    pub passed: bool,
    /// Maximum relative error found
    pub max_relative_error: f64,
    /// Maximum absolute error found
    pub max_absolute_error: f64,
    /// Number of elements checked
    pub num_elements_checked: usize,
    /// Number of elements that failed tolerance check
    pub num_failures: usize,
    /// Indices of failed elements (if check_elementwise is true)
    pub failed_indices: Vec<usize>,
    /// Detailed error message if check failed
    pub error_message: Option<String>,
}

impl GradientCheckResult {
    pub fn is_ok(&self) -> bool {
        self.passed
    }

    /// Percentage of checked elements that failed
    pub fn failure_rate(&self) -> f64 {
        if self.num_elements_checked == 0 {
            0.0
        } else {
            (self.num_failures as f64 / self.num_elements_checked as f64) * 100.0
        }
    }

    pub fn summary(&self) -> String {
        if self.passed {
            format!(
                "Gradient check passed\n\
                 Elements checked: {}\n\
                 Max relative error: {:.2e}\n\
                 Max absolute error: {:.2e}",
                self.num_elements_checked, self.max_relative_error, self.max_absolute_error
            )
        } else {
            format!(
                "Gradient check FAILED\n\
                 Elements checked: {}\n\
                 Failures: {} ({:.2}%)\n\
                 Max relative error: {:.2e}\n\
                 Max absolute error: {:.2e}\n\
                 {}",
                self.num_elements_checked,
                self.num_failures,
                self.failure_rate(),
                self.max_relative_error,
                self.max_absolute_error,
                self.error_message.as_deref().unwrap_or("")
            )
        }
    }
}

/// Numerical gradient checker
#[derive(Debug, Clone, Default)]
pub struct NumericalGradientChecker {
    config: GradientCheckConfig,
}

impl NumericalGradientChecker {
    pub fn new(config: GradientCheckConfig) -> Self {
        Self { config }
    }

    /// Indices of `len` elements that get checked
    pub fn sample_indices(&self, len: usize) -> Vec<usize> {
        match self.config.max_samples {
            Some(max) if max > 0 && max < len => {
                let step = (len + max - 1) / max;
                (0..len).step_by(step).collect()
            }
            _ => (0..len).collect(),
        }
    }

    /// Central-difference derivative of `objective` at `input` for every
    /// index in `indices`
    pub fn compute_numerical_gradient<F>(
        &self,
        input: &[f32],
        indices: &[usize],
        mut objective: F,
    ) -> Result<Vec<f64>>
    where
        F: FnMut(&[f32]) -> Result<f64>,
    {
        let epsilon = self.config.epsilon as f32;
        let mut perturbed = input.to_vec();
        let mut gradient = Vec::with_capacity(indices.len());

        for &i in indices {
            let original = *input.get(i).ok_or_else(|| {
                TensorError::invalid_argument(
                    "numerical_gradient",
                    format!("index {i} out of range for {} elements", input.len()),
                )
            })?;
            let plus = original + epsilon;
            let minus = original - epsilon;

            perturbed[i] = plus;
            let f_plus = objective(&perturbed)?;
            perturbed[i] = minus;
            let f_minus = objective(&perturbed)?;
            perturbed[i] = original;

            // Divide by the step actually representable in f32.
            gradient.push((f_plus - f_minus) / (f64::from(plus) - f64::from(minus)));
        }
        Ok(gradient)
    }

    /// Compare the numerical estimate at `indices` with the full analytical gradient
    pub fn compare_gradients(
        &self,
        indices: &[usize],
        numerical: &[f64],
        analytical: &[f64],
    ) -> Result<GradientCheckResult> {
        if indices.len() != numerical.len() {
            return Err(TensorError::shape_mismatch(
                "compare_gradients",
                &format!("{} numerical values", indices.len()),
                &numerical.len().to_string(),
            ));
        }

        let rtol = self.config.rtol;
        let atol = self.config.atol;

        let mut max_rel_error = 0.0f64;
        let mut max_abs_error = 0.0f64;
        let mut num_failures = 0;
        let mut failed_indices = Vec::new();

        for (&i, &num_val) in indices.iter().zip(numerical) {
            let ana_val = *analytical.get(i).ok_or_else(|| {
                TensorError::invalid_argument(
                    "compare_gradients",
                    format!("analytical gradient has no element {i}"),
                )
            })?;

            let abs_error = (num_val - ana_val).abs();
            let rel_error = if ana_val.abs() > 1e-10 {
                abs_error / ana_val.abs()
            } else {
                abs_error
            };

            max_rel_error = max_rel_error.max(rel_error);
            max_abs_error = max_abs_error.max(abs_error);

            if rel_error > rtol && abs_error > atol {
                num_failures += 1;
                if self.config.check_elementwise {
                    failed_indices.push(i);
                }
            }
        }

        let passed = num_failures == 0;
        let error_message = (!passed).then(|| {
            format!(
                "Gradient mismatch: {} of {} elements exceed tolerance (rtol={}, atol={})",
                num_failures,
                indices.len(),
                rtol,
                atol
            )
        });

        Ok(GradientCheckResult {
            passed,
            max_relative_error: max_rel_error,
            max_absolute_error: max_abs_error,
            num_elements_checked: indices.len(),
            num_failures,
            failed_indices,
            error_message,
        })
    }
}

/// Check `LRNGradient` against finite differences of `sum(LRN(x) * dy)`.
///
/// `x` and `dy` are single-precision host data of shape `dims`; both
/// operators run on `ctx` and its stream is synchronized after each launch.
pub fn check_lrn_gradient(
    ctx: &Arc<DeviceContext>,
    params: LrnParameters,
    dims: [usize; 4],
    x: &[f32],
    dy: &[f32],
    config: &GradientCheckConfig,
) -> Result<GradientCheckResult> {
    let device = ctx.device();
    let mut forward = LrnOp::new(Arc::clone(ctx), params)?;
    let mut backward = LrnGradientOp::new(Arc::clone(ctx), params)?;

    let dy_tensor = Tensor::from_vec(dy.to_vec(), &dims)?.to_device(device)?;
    let mut y = Tensor::empty(device);

    let mut objective = |input: &[f32]| -> Result<f64> {
        let x = Tensor::from_vec(input.to_vec(), &dims)?.to_device(device)?;
        forward.forward(&x, &mut y)?;
        ctx.synchronize()?;
        y.with_data(|out: &[f32]| {
            out.iter()
                .zip(dy)
                .map(|(&a, &b)| f64::from(a) * f64::from(b))
                .sum::<f64>()
        })
    };

    let checker = NumericalGradientChecker::new(config.clone());
    let indices = checker.sample_indices(x.len());
    let numerical = checker.compute_numerical_gradient(x, &indices, &mut objective)?;

    let x_tensor = Tensor::from_vec(x.to_vec(), &dims)?.to_device(device)?;
    let mut y = Tensor::empty(device);
    forward.forward(&x_tensor, &mut y)?;
    let mut dx = Tensor::empty(device);
    backward.backward(&x_tensor, &y, &dy_tensor, &mut dx)?;
    ctx.synchronize()?;
    let analytical: Vec<f64> = dx.with_data(|d: &[f32]| d.iter().map(|&v| f64::from(v)).collect())?;

    checker.compare_gradients(&indices, &numerical, &analytical)
}
