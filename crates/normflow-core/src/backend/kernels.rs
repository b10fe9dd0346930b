//! Cross-channel LRN kernels of the emulated accelerator
//!
//! For a position `(n, h, w)` and channel `c` with window
//! `W(c) = [max(0, c - r), min(C - 1, c + r)]`, `r = (size - 1) / 2`:
//!
//! ```text
//! S_c  = bias + alpha * sum_{j in W(c)} x_j^2
//! y_c  = x_c * S_c^-beta
//! dx_j = dy_j * S_j^-beta - 2 * alpha * beta * x_j * sum_{i in W(j)} dy_i * y_i / S_i
//! ```
//!
//! Windows are truncated at the first and last channel. The window is
//! symmetric, so `j in W(i)` exactly when `i in W(j)`, which is what lets the
//! backward reduction run over `W(j)`.

use super::{BackendStatus, Blend};
use crate::precision::{Accumulator, StorageElement};
use crate::{Result, TensorError};
use num_traits::{Float, Zero};
use rayon::prelude::*;
use std::ops::Range;

/// LRN constants converted into the accumulation type
#[derive(Debug, Clone, Copy)]
pub(crate) struct LrnCoefficients<M> {
    radius: usize,
    alpha: M,
    beta: M,
    bias: M,
    blend_alpha: M,
    blend_beta: M,
    read_prior: bool,
}

impl<M: Accumulator> LrnCoefficients<M> {
    pub(crate) fn new(
        window_size: usize,
        alpha: f64,
        beta: f64,
        bias: f64,
        blend: Blend,
    ) -> Result<Self> {
        Ok(Self {
            radius: window_size.saturating_sub(1) / 2,
            alpha: convert(alpha)?,
            beta: convert(beta)?,
            bias: convert(bias)?,
            blend_alpha: convert(f64::from(blend.alpha))?,
            blend_beta: convert(f64::from(blend.beta))?,
            read_prior: blend.beta != 0.0,
        })
    }

    fn window(&self, channel: usize, channels: usize) -> Range<usize> {
        channel.saturating_sub(self.radius)..(channel + self.radius + 1).min(channels)
    }

    fn blend<T: StorageElement<Accum = M>>(&self, value: M, prior: T) -> T {
        let mut out = self.blend_alpha * value;
        if self.read_prior {
            out = out + self.blend_beta * prior.to_accum();
        }
        T::from_accum(out)
    }
}

fn convert<M: Accumulator>(value: f64) -> Result<M> {
    M::from_f64(value).ok_or_else(|| {
        TensorError::backend(
            "lrn_kernel",
            BackendStatus::InternalError,
            format!("constant {value} is not representable in the accumulation type"),
        )
    })
}

fn check_len(name: &str, len: usize, expected: usize) -> Result<()> {
    if len == expected {
        return Ok(());
    }
    Err(TensorError::backend(
        "lrn_kernel",
        BackendStatus::ExecutionFailed,
        format!("buffer {name} holds {len} elements, descriptor expects {expected}"),
    ))
}

/// `y = blend(lrn(x), y)` over an NCHW batch
pub(crate) fn lrn_forward<T: StorageElement>(
    coeffs: &LrnCoefficients<T::Accum>,
    dims: [usize; 4],
    x: &[T],
    y: &mut [T],
    parallel: bool,
) -> Result<()> {
    let [n, c, h, w] = dims;
    let image = c * h * w;
    check_len("x", x.len(), n * image)?;
    check_len("y", y.len(), n * image)?;
    if image == 0 {
        return Ok(());
    }

    let spatial = h * w;
    if parallel {
        y.par_chunks_mut(image)
            .zip(x.par_chunks(image))
            .for_each(|(y_img, x_img)| forward_image(coeffs, c, spatial, x_img, y_img));
    } else {
        y.chunks_mut(image)
            .zip(x.chunks(image))
            .for_each(|(y_img, x_img)| forward_image(coeffs, c, spatial, x_img, y_img));
    }
    Ok(())
}

fn forward_image<T: StorageElement>(
    coeffs: &LrnCoefficients<T::Accum>,
    channels: usize,
    spatial: usize,
    x: &[T],
    y: &mut [T],
) {
    let zero = <T::Accum as Zero>::zero();
    let mut squares = vec![zero; channels];
    for s in 0..spatial {
        for (ch, sq) in squares.iter_mut().enumerate() {
            let v = x[ch * spatial + s].to_accum();
            *sq = v * v;
        }
        for ch in 0..channels {
            let sum = squares[coeffs.window(ch, channels)]
                .iter()
                .fold(zero, |acc, &sq| acc + sq);
            let scale = coeffs.bias + coeffs.alpha * sum;
            let idx = ch * spatial + s;
            let value = x[idx].to_accum() / scale.powf(coeffs.beta);
            y[idx] = coeffs.blend(value, y[idx]);
        }
    }
}

/// `dx = blend(grad, dx)` over an NCHW batch, given forward input `x`,
/// forward output `y` and upstream gradient `dy`
pub(crate) fn lrn_backward<T: StorageElement>(
    coeffs: &LrnCoefficients<T::Accum>,
    dims: [usize; 4],
    y: &[T],
    dy: &[T],
    x: &[T],
    dx: &mut [T],
    parallel: bool,
) -> Result<()> {
    let [n, c, h, w] = dims;
    let image = c * h * w;
    check_len("y", y.len(), n * image)?;
    check_len("dy", dy.len(), n * image)?;
    check_len("x", x.len(), n * image)?;
    check_len("dx", dx.len(), n * image)?;
    if image == 0 {
        return Ok(());
    }

    let spatial = h * w;
    let run = |(((dx_img, x_img), y_img), dy_img): (((&mut [T], &[T]), &[T]), &[T])| {
        backward_image(coeffs, c, spatial, y_img, dy_img, x_img, dx_img)
    };
    if parallel {
        dx.par_chunks_mut(image)
            .zip(x.par_chunks(image))
            .zip(y.par_chunks(image))
            .zip(dy.par_chunks(image))
            .for_each(run);
    } else {
        dx.chunks_mut(image)
            .zip(x.chunks(image))
            .zip(y.chunks(image))
            .zip(dy.chunks(image))
            .for_each(run);
    }
    Ok(())
}

fn backward_image<T: StorageElement>(
    coeffs: &LrnCoefficients<T::Accum>,
    channels: usize,
    spatial: usize,
    y: &[T],
    dy: &[T],
    x: &[T],
    dx: &mut [T],
) {
    let zero = <T::Accum as Zero>::zero();
    let two_alpha_beta = (coeffs.alpha + coeffs.alpha) * coeffs.beta;
    let mut squares = vec![zero; channels];
    let mut scales = vec![zero; channels];
    let mut ratios = vec![zero; channels];

    for s in 0..spatial {
        for (ch, sq) in squares.iter_mut().enumerate() {
            let v = x[ch * spatial + s].to_accum();
            *sq = v * v;
        }
        for ch in 0..channels {
            let sum = squares[coeffs.window(ch, channels)]
                .iter()
                .fold(zero, |acc, &sq| acc + sq);
            let idx = ch * spatial + s;
            scales[ch] = coeffs.bias + coeffs.alpha * sum;
            ratios[ch] = dy[idx].to_accum() * y[idx].to_accum() / scales[ch];
        }
        for ch in 0..channels {
            let idx = ch * spatial + s;
            let indirect = ratios[coeffs.window(ch, channels)]
                .iter()
                .fold(zero, |acc, &r| acc + r);
            let direct = dy[idx].to_accum() * scales[ch].powf(-coeffs.beta);
            let grad = direct - two_alpha_beta * x[idx].to_accum() * indirect;
            dx[idx] = coeffs.blend(grad, dx[idx]);
        }
    }
}
