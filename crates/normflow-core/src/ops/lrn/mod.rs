//! Cross-channel local response normalization
//!
//! `LRN` computes, for every channel `c` of an NCHW tensor,
//!
//! ```text
//! y_c = x_c / (bias + alpha * sum_{j in W(c)} x_j^2)^beta
//! ```
//!
//! where `W(c)` is the window of `size` channels centred on `c`, truncated
//! at the first and last channel. `LRNGradient` takes `(X, Y, dY)` and
//! produces `dX`. Both run on the accelerator backend of their context.

pub mod backward;
pub mod descriptor;
pub mod forward;
pub mod params;

pub use backward::LrnGradientOp;
pub use descriptor::{NormalizationDescriptor, ShapeDescriptorCache};
pub use forward::LrnOp;
pub use params::LrnParameters;

use super::gradient::lrn_gradient;
use super::operator::{AttrValue, Engine};
use super::registry::{ArgDef, AttrDef, AttrType, OpDef, OpRegistry};
use crate::device::DeviceContext;
use crate::{Result, Tensor, TensorError};
use std::collections::HashMap;

/// NCHW dims of `tensor`, rejecting anything that is not 4-D
fn nchw(operation: &str, tensor: &Tensor) -> Result<[usize; 4]> {
    tensor.shape().nchw(operation)
}

fn check_device(operation: &str, ctx: &DeviceContext, tensor: &Tensor) -> Result<()> {
    if *tensor.device() == ctx.device() {
        return Ok(());
    }
    Err(TensorError::device_mismatch(
        operation,
        &ctx.device().to_string(),
        &tensor.device().to_string(),
    ))
}

fn lrn_attrs() -> HashMap<String, AttrDef> {
    let attr = |name: &str, attr_type, default: AttrValue, doc: &str| {
        (
            name.to_string(),
            AttrDef {
                name: name.to_string(),
                attr_type,
                default: Some(default),
                doc: doc.to_string(),
            },
        )
    };
    HashMap::from([
        attr(
            "size",
            AttrType::Int,
            AttrValue::Int(params::DEFAULT_SIZE.into()),
            "Odd number of channels in the normalization window",
        ),
        attr(
            "alpha",
            AttrType::Float,
            AttrValue::Float(params::DEFAULT_ALPHA.into()),
            "Scale of the sum of squares",
        ),
        attr(
            "beta",
            AttrType::Float,
            AttrValue::Float(params::DEFAULT_BETA.into()),
            "Exponent of the normalizer",
        ),
        attr(
            "bias",
            AttrType::Float,
            AttrValue::Float(params::DEFAULT_BIAS.into()),
            "Additive constant of the normalizer",
        ),
    ])
}

/// Register the `LRN` and `LRNGradient` schemas and their accelerated
/// implementations
pub fn register_lrn_operators(registry: &OpRegistry) -> Result<()> {
    registry.register_op(OpDef {
        name: forward::OP_TYPE.to_string(),
        inputs: vec![ArgDef::new("X", "NCHW input")],
        outputs: vec![ArgDef::new("Y", "Normalized output, shaped like X")],
        attrs: lrn_attrs(),
        grad_fn: Some(backward::OP_TYPE.to_string()),
        gradient_maker: Some(lrn_gradient),
        doc: "Cross-channel local response normalization".to_string(),
    })?;
    registry.register_op(OpDef {
        name: backward::OP_TYPE.to_string(),
        inputs: vec![
            ArgDef::new("X", "Forward input"),
            ArgDef::new("Y", "Forward output"),
            ArgDef::new("dY", "Gradient of the forward output"),
        ],
        outputs: vec![ArgDef::new("dX", "Gradient of the forward input")],
        attrs: lrn_attrs(),
        grad_fn: None,
        gradient_maker: None,
        doc: "Gradient of cross-channel local response normalization".to_string(),
    })?;

    registry.register_operator::<LrnOp>(forward::OP_TYPE, Engine::Accelerated)?;
    registry.register_operator::<LrnGradientOp>(backward::OP_TYPE, Engine::Accelerated)?;
    Ok(())
}
