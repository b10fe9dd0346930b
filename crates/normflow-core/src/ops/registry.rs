use super::operator::{AttrValue, CreateOperator, Engine, Operator, OperatorDef};
use crate::device::DeviceContext;
use crate::{Result, TensorError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Metadata for an operation
#[derive(Clone)]
pub struct OpDef {
    /// Operation name
    pub name: String,
    /// Input argument definitions
    pub inputs: Vec<ArgDef>,
    /// Output definitions
    pub outputs: Vec<ArgDef>,
    /// Operation attributes
    pub attrs: HashMap<String, AttrDef>,
    /// Gradient operation name (if differentiable)
    pub grad_fn: Option<String>,
    /// Builds the gradient operator defs for a forward def
    pub gradient_maker: Option<GradientMaker>,
    /// Documentation
    pub doc: String,
}

impl std::fmt::Debug for OpDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpDef")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("attrs", &self.attrs)
            .field("grad_fn", &self.grad_fn)
            .field("has_gradient_maker", &self.gradient_maker.is_some())
            .finish()
    }
}

/// Argument definition
#[derive(Debug, Clone)]
pub struct ArgDef {
    pub name: String,
    pub doc: String,
}

impl ArgDef {
    pub fn new(name: &str, doc: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: doc.to_string(),
        }
    }
}

/// Attribute definition
#[derive(Debug, Clone)]
pub struct AttrDef {
    pub name: String,
    pub attr_type: AttrType,
    pub default: Option<AttrValue>,
    pub doc: String,
}

/// Attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int,
    Float,
    Bool,
    String,
    IntList,
    FloatList,
}

/// Gradient definition function type
pub type GradientMaker = fn(&OperatorDef) -> Result<Vec<OperatorDef>>;

/// Operator constructor stored per (operation, engine)
pub type OperatorFactory = fn(&OperatorDef, &Arc<DeviceContext>) -> Result<Box<dyn Operator>>;

fn instantiate<O: CreateOperator>(
    def: &OperatorDef,
    ctx: &Arc<DeviceContext>,
) -> Result<Box<dyn Operator>> {
    Ok(Box::new(O::create(def, Arc::clone(ctx))?))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FactoryKey {
    op: String,
    engine: Engine,
}

/// Operation schemas and the engines that implement them
#[derive(Default)]
pub struct OpRegistry {
    ops: RwLock<HashMap<String, OpDef>>,
    factories: RwLock<HashMap<FactoryKey, OperatorFactory>>,
}

impl std::fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpRegistry")
            .field("ops", &self.list_ops())
            .finish_non_exhaustive()
    }
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation schema
    pub fn register_op(&self, op_def: OpDef) -> Result<()> {
        let mut ops = self.ops.write()?;
        if ops.contains_key(&op_def.name) {
            return Err(TensorError::invalid_argument(
                "register_op",
                format!("Operation '{}' already registered", op_def.name),
            ));
        }
        ops.insert(op_def.name.clone(), op_def);
        Ok(())
    }

    /// Register `factory` as the `engine` implementation of `op_name`
    pub fn register_factory(
        &self,
        op_name: &str,
        engine: Engine,
        factory: OperatorFactory,
    ) -> Result<()> {
        if !self.ops.read()?.contains_key(op_name) {
            return Err(TensorError::not_registered(
                op_name,
                "register the operation schema before its implementations",
            ));
        }

        let key = FactoryKey {
            op: op_name.to_string(),
            engine,
        };
        let mut factories = self.factories.write()?;
        if factories.contains_key(&key) {
            return Err(TensorError::invalid_argument(
                "register_operator",
                format!("'{op_name}' already has a {engine} implementation"),
            ));
        }
        factories.insert(key, factory);
        Ok(())
    }

    /// Register operator type `O` as the `engine` implementation of `op_name`
    pub fn register_operator<O: CreateOperator>(&self, op_name: &str, engine: Engine) -> Result<()> {
        self.register_factory(op_name, engine, instantiate::<O>)
    }

    pub fn get_op(&self, name: &str) -> Option<OpDef> {
        self.ops.read().ok()?.get(name).cloned()
    }

    pub fn has_operator(&self, name: &str, engine: Engine) -> bool {
        let key = FactoryKey {
            op: name.to_string(),
            engine,
        };
        self.factories
            .read()
            .map(|f| f.contains_key(&key))
            .unwrap_or(false)
    }

    /// Registered operation names, sorted
    pub fn list_ops(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ops
            .read()
            .map(|ops| ops.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Instantiate the operator `def` names for `def.engine` on `ctx`
    pub fn create_operator(
        &self,
        def: &OperatorDef,
        ctx: &Arc<DeviceContext>,
    ) -> Result<Box<dyn Operator>> {
        let schema = self.get_op(&def.op_type).ok_or_else(|| {
            TensorError::not_registered(&def.op_type, "no such operation schema")
        })?;

        if def.inputs.len() != schema.inputs.len() || def.outputs.len() != schema.outputs.len() {
            return Err(TensorError::invalid_argument(
                &def.op_type,
                format!(
                    "expects {} inputs and {} outputs, def has {} and {}",
                    schema.inputs.len(),
                    schema.outputs.len(),
                    def.inputs.len(),
                    def.outputs.len()
                ),
            ));
        }

        let key = FactoryKey {
            op: def.op_type.clone(),
            engine: def.engine,
        };
        let factory = self.factories.read()?.get(&key).copied().ok_or_else(|| {
            TensorError::not_registered(
                &def.op_type,
                format!("no {} engine implementation", def.engine),
            )
        })?;

        log::debug!(
            "creating {} operator '{}' on {}",
            def.op_type,
            def.name,
            ctx.device()
        );
        factory(def, ctx)
    }

    /// Gradient operator defs for the forward operator `def`
    pub fn gradient_defs(&self, def: &OperatorDef) -> Result<Vec<OperatorDef>> {
        let schema = self.get_op(&def.op_type).ok_or_else(|| {
            TensorError::not_registered(&def.op_type, "no such operation schema")
        })?;
        let maker = schema.gradient_maker.ok_or_else(|| {
            TensorError::not_registered(&def.op_type, "operation is not differentiable")
        })?;
        maker(def)
    }
}

// Global registry instance
lazy_static::lazy_static! {
    pub static ref OP_REGISTRY: OpRegistry = OpRegistry::new();

    /// Outcome of registering the built-in operators, computed once
    static ref BUILTIN_REGISTRATION: Result<()> = register_builtin_ops(&OP_REGISTRY);
}

fn register_builtin_ops(registry: &OpRegistry) -> Result<()> {
    super::lrn::register_lrn_operators(registry)?;
    log::debug!("registered built-in operators: {:?}", registry.list_ops());
    Ok(())
}

/// Register the built-in operators with [`OP_REGISTRY`] if not done yet
pub fn ensure_initialized() -> Result<()> {
    BUILTIN_REGISTRATION.clone()
}

/// Instantiate an operator from the global registry
pub fn create_operator(def: &OperatorDef, ctx: &Arc<DeviceContext>) -> Result<Box<dyn Operator>> {
    ensure_initialized()?;
    OP_REGISTRY.create_operator(def, ctx)
}

/// Gradient operator defs for `def` from the global registry
pub fn gradient_defs(def: &OperatorDef) -> Result<Vec<OperatorDef>> {
    ensure_initialized()?;
    OP_REGISTRY.gradient_defs(def)
}
