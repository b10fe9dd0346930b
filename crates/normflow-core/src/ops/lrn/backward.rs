use super::descriptor::{NormalizationDescriptor, ShapeDescriptorCache};
use super::{check_device, nchw, LrnParameters};
use crate::backend::{Blend, LrnMode, TensorArg};
use crate::device::DeviceContext;
use crate::ops::operator::{CreateOperator, Operator, OperatorDef};
use crate::precision::{f16, Accumulator, PrecisionPair, StorageElement};
use crate::{Result, Tensor, TensorError};
use std::sync::Arc;

pub const OP_TYPE: &str = "LRNGradient";

/// Gradient of cross-channel LRN with respect to its input.
///
/// Needs the forward input `X`, the forward output `Y` and the output
/// gradient `dY`, all of one shape and element type.
#[derive(Debug)]
pub struct LrnGradientOp {
    ctx: Arc<DeviceContext>,
    norm: NormalizationDescriptor,
    data_desc: ShapeDescriptorCache,
}

impl LrnGradientOp {
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

    pub fn data_descriptor(&self) -> &ShapeDescriptorCache {
        &self.data_desc
    }

    /// Enqueue `dx = d lrn(x) / dx . dy` on the context stream; `dx` is
    /// resized to `dy`'s shape
    pub fn backward(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor, dx: &mut Tensor) -> Result<()> {
        for tensor in [x, y, dy] {
            check_device(OP_TYPE, &self.ctx, tensor)?;
        }
        check_device(OP_TYPE, &self.ctx, dx)?;

        for (name, tensor) in [("X", x), ("Y", y)] {
            if tensor.shape() != dy.shape() {
                return Err(TensorError::shape_mismatch(
                    OP_TYPE,
                    &format!("{name} shaped like dY {}", dy.shape()),
                    &tensor.shape().to_string(),
                ));
            }
            if tensor.dtype() != dy.dtype() {
                return Err(TensorError::invalid_argument(
                    OP_TYPE,
                    format!("{name} is {} but dY is {}", tensor.dtype(), dy.dtype()),
                ));
            }
        }

        match PrecisionPair::for_dtype(dy.dtype()) {
            Some(PrecisionPair::Float32) => self.run_with_type::<f32, f32>(x, y, dy, dx),
            Some(PrecisionPair::Float16) => self.run_with_type::<f16, f32>(x, y, dy, dx),
            None => Err(TensorError::unsupported_dtype(OP_TYPE, dy.dtype())),
        }
    }

    fn run_with_type<T, M>(&mut self, x: &Tensor, y: &Tensor, dy: &Tensor, dx: &mut Tensor) -> Result<()>
    where
        T: StorageElement<Accum = M>,
        M: Accumulator,
    {
        let dims = nchw(OP_TYPE, dy)?;
        dx.resize_like(dy);
        self.data_desc.ensure(OP_TYPE, dims, T::DTYPE)?;

        let desc = self.data_desc.handle();
        self.ctx.backend().lrn_cross_channel_backward(
            self.ctx.stream(),
            self.norm.handle(),
            LrnMode::CrossChannelDim1,
            Blend::OVERWRITE,
            TensorArg::new(desc, y),
            TensorArg::new(desc, dy),
            TensorArg::new(desc, x),
            TensorArg::new(desc, dx),
        )
    }
}

impl Operator for LrnGradientOp {
    fn op_type(&self) -> &'static str {
        OP_TYPE
    }

    fn run_on_device(&mut self, inputs: &[&Tensor], outputs: &mut [&mut Tensor]) -> Result<()> {
        match (inputs, outputs) {
            ([x, y, dy], [dx]) => self.backward(x, y, dy, dx),
            (inputs, outputs) => Err(TensorError::invalid_argument(
                OP_TYPE,
                format!(
                    "expects inputs (X, Y, dY) and 1 output, got {} and {}",
                    inputs.len(),
                    outputs.len()
                ),
            )),
        }
    }
}

impl CreateOperator for LrnGradientOp {
    fn create(def: &OperatorDef, ctx: Arc<DeviceContext>) -> Result<Self> {
        Self::new(ctx, LrnParameters::from_def(def)?)
    }
}
