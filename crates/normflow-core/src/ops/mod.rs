//! Graph operators
//!
//! Operators are created from an [`OperatorDef`] through the global
//! [`OP_REGISTRY`] and run against tensors owned by the graph engine.

pub mod gradient;
pub mod lrn;
pub mod operator;
pub mod registry;

pub use gradient::{gradient_name, lrn_gradient};
pub use lrn::{LrnGradientOp, LrnOp, LrnParameters};
pub use operator::{AttrValue, CreateOperator, Engine, FromAttr, Operator, OperatorDef};
pub use registry::{
    create_operator, ensure_initialized, gradient_defs, ArgDef, AttrDef, AttrType, GradientMaker,
    OpDef, OpRegistry, OperatorFactory, OP_REGISTRY,
};
