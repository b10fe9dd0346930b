//! Gradient operator definitions
//!
//! A gradient maker turns a forward [`OperatorDef`] into the defs that
//! compute gradients of its inputs. Gradient blobs are named after the blob
//! they are the gradient of.

use super::operator::OperatorDef;
use crate::{Result, TensorError};

/// Name of the gradient blob for `blob`
pub fn gradient_name(blob: &str) -> String {
    format!("{blob}_grad")
}

fn single(def: &OperatorDef, kind: &str, blobs: &[String]) -> Result<String> {
    match blobs {
        [blob] => Ok(blob.clone()),
        _ => Err(TensorError::invalid_argument(
            &def.op_type,
            format!("gradient needs exactly one {kind}, def has {}", blobs.len()),
        )),
    }
}

/// `LRN(X) -> Y` becomes `LRNGradient(X, Y, Y_grad) -> X_grad`, keeping
/// the forward arguments and engine
pub fn lrn_gradient(def: &OperatorDef) -> Result<Vec<OperatorDef>> {
    let x = single(def, "input", &def.inputs)?;
    let y = single(def, "output", &def.outputs)?;

    let mut grad = OperatorDef::new("LRNGradient")
        .with_input(x.clone())
        .with_input(y.clone())
        .with_input(gradient_name(&y))
        .with_output(gradient_name(&x))
        .with_engine(def.engine);
    if !def.name.is_empty() {
        grad.name = gradient_name(&def.name);
    }
    grad.args = def.args.clone();
    Ok(vec![grad])
}
