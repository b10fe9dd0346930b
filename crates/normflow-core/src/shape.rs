use crate::{Result, TensorError};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    pub fn from_slice(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Interpret the shape as an NCHW image batch
    pub fn nchw(&self, operation: &str) -> Result<[usize; 4]> {
        match self.dims.as_slice() {
            &[n, c, h, w] => Ok([n, c, h, w]),
            dims => Err(TensorError::invalid_shape(
                operation,
                format!("expected a 4-dimensional NCHW tensor, got rank {}", dims.len()),
                dims,
            )),
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}
