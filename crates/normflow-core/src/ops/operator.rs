//! Operator definitions and the operator execution interface

use crate::device::DeviceContext;
use crate::{Result, Tensor, TensorError};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Attribute values
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Bool(_) => "bool",
            AttrValue::String(_) => "string",
            AttrValue::IntList(_) => "int list",
            AttrValue::FloatList(_) => "float list",
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v.into())
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<f32> for AttrValue {
    fn from(v: f32) -> Self {
        AttrValue::Float(v.into())
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}

/// Types a single attribute value can be read as
pub trait FromAttr: Sized {
    fn from_attr(value: &AttrValue) -> Option<Self>;
}

impl FromAttr for i64 {
    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromAttr for i32 {
    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
}

// Integer literals are accepted where a float is expected.
impl FromAttr for f64 {
    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromAttr for f32 {
    fn from_attr(value: &AttrValue) -> Option<Self> {
        f64::from_attr(value).map(|v| v as f32)
    }
}

impl FromAttr for bool {
    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromAttr for String {
    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Implementation family an operator is instantiated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Engine {
    #[default]
    Default,
    /// Vendor accelerator library kernels
    Accelerated,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Default => write!(f, "default"),
            Engine::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// One node of a computation graph: operator type, wiring and arguments
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct OperatorDef {
    pub op_type: String,
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub args: HashMap<String, AttrValue>,
    pub engine: Engine,
}

impl OperatorDef {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Read argument `name`, falling back to `default` when absent.
    ///
    /// A present argument of the wrong type is an error rather than a
    /// silent fallback.
    pub fn get_single_argument<T: FromAttr>(&self, name: &str, default: T) -> Result<T> {
        match self.args.get(name) {
            None => Ok(default),
            Some(value) => T::from_attr(value).ok_or_else(|| {
                TensorError::invalid_argument(
                    &self.op_type,
                    format!(
                        "argument '{name}' holds a {} that cannot be read as {}",
                        value.type_name(),
                        std::any::type_name::<T>()
                    ),
                )
            }),
        }
    }
}

/// A runnable operator instance.
///
/// Instances are created once per graph node and invoked repeatedly; inputs
/// and outputs are owned by the graph engine.
pub trait Operator: Send {
    fn op_type(&self) -> &'static str;

    fn run_on_device(&mut self, inputs: &[&Tensor], outputs: &mut [&mut Tensor]) -> Result<()>;
}

/// Operators that can be built from an [`OperatorDef`] by the registry
pub trait CreateOperator: Operator + Sized + 'static {
    fn create(def: &OperatorDef, ctx: Arc<DeviceContext>) -> Result<Self>;
}
