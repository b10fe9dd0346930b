use super::descriptor::{NormalizationDescriptor, ShapeDescriptorCache};
use super::{check_device, nchw, LrnParameters};
use crate::backend::{Blend, LrnMode, TensorArg};
use crate::device::DeviceContext;
use crate::ops::operator::{CreateOperator, Operator, OperatorDef};
use crate::precision::{f16, Accumulator, PrecisionPair, StorageElement};
use crate::{Result, Tensor, TensorError};
use std::sync::Arc;

pub const OP_TYPE: &str = "LRN";

/// Forward cross-channel LRN on the context's accelerator.
///
/// The normalization descriptor is fixed at construction. The tensor
/// descriptor follows the input and is only rebuilt when its geometry or
/// element type changes between calls.
#[derive(Debug)]
pub struct LrnOp {
    ctx: Arc<DeviceContext>,
    norm: NormalizationDescriptor,
    data_desc: ShapeDescriptorCache,
}

impl LrnOp {
    pub fn new(ctx: Arc<DeviceContext>, params: LrnParameters) -> Result<Self> {
        let norm = NormalizationDescriptor::new(Arc::clone(ctx.backend()), OP_TYPE, params)?;
        let data_desc = ShapeDescriptorCache::new(Arc::clone(ctx.backend()))?;
        Ok(Self {
            ctx,
            norm,
            data_desc,
        })
    }

    pub fn params(&self) -> &LrnParameters {
        self.norm.params()
    }

    /// Tensor descriptor cache, for inspecting reuse
    pub fn data_descriptor(&self) -> &ShapeDescriptorCache {
        &self.data_desc
    }

    /// Enqueue `y = lrn(x)` on the context stream.
    ///
    /// `y` is resized to `x`'s shape and element type. Its contents are only
    /// defined once the stream has been synchronized.
    pub fn forward(&mut self, x: &Tensor, y: &mut Tensor) -> Result<()> {
        check_device(OP_TYPE, &self.ctx, x)?;
        check_device(OP_TYPE, &self.ctx, y)?;
        match PrecisionPair::for_dtype(x.dtype()) {
            Some(PrecisionPair::Float32) => self.run_with_type::<f32, f32>(x, y),
            Some(PrecisionPair::Float16) => self.run_with_type::<f16, f32>(x, y),
            None => Err(TensorError::unsupported_dtype(OP_TYPE, x.dtype())),
        }
    }

    fn run_with_type<T, M>(&mut self, x: &Tensor, y: &mut Tensor) -> Result<()>
    where
        T: StorageElement<Accum = M>,
        M: Accumulator,
    {
        let dims = nchw(OP_TYPE, x)?;
        y.resize_like(x);
        self.data_desc.ensure(OP_TYPE, dims, T::DTYPE)?;

        let desc = self.data_desc.handle();
        self.ctx.backend().lrn_cross_channel_forward(
            self.ctx.stream(),
            self.norm.handle(),
            LrnMode::CrossChannelDim1,
            Blend::OVERWRITE,
            TensorArg::new(desc, x),
            TensorArg::new(desc, y),
        )
    }
}

impl Operator for LrnOp {
    fn op_type(&self) -> &'static str {
        OP_TYPE
    }

    fn run_on_device(&mut self, inputs: &[&Tensor], outputs: &mut [&mut Tensor]) -> Result<()> {
        match (inputs, outputs) {
            ([x], [y]) => self.forward(x, y),
            (inputs, outputs) => Err(TensorError::invalid_argument(
                OP_TYPE,
                format!(
                    "expects 1 input and 1 output, got {} and {}",
                    inputs.len(),
                    outputs.len()
                ),
            )),
        }
    }
}

impl CreateOperator for LrnOp {
    fn create(def: &OperatorDef, ctx: Arc<DeviceContext>) -> Result<Self> {
        Self::new(ctx, LrnParameters::from_def(def)?)
    }
}
