// Tensor primitives for the ConvNet forward pass.
//
// All feature maps are `Array4<f32>` in NHWC layout: `[batch, steps,
// pitches, channels]`. Convolutions are stride 1 with TensorFlow-style SAME
// padding generalized to dilation: the effective kernel extent is
// `(k - 1) * d + 1` and `floor((extent - 1) / 2)` rows/columns are padded
// before, the rest after. Padding is implicit (out-of-range taps are
// skipped), so no padded copy of the input is ever built.
//
// Convolutions are computed per kernel tap: each tap is a shifted window of
// the input multiplied by a `[in, out]` matrix (or a per-channel vector for
// depthwise), accumulated into the output. Every function checks shapes up
// front and returns `CoconetError::Shape` rather than panicking.

use crate::error::{CoconetError, Result};
use ndarray::{Array1, Array2, Array4, ArrayView4, Axis, Zip, concatenate, s};

/// `(pad_before, extent)` of a dilated kernel under SAME padding.
pub fn same_padding(kernel: usize, dilation: usize) -> (usize, usize) {
    let extent = (kernel - 1) * dilation + 1;
    ((extent - 1) / 2, extent)
}

/// Output index range `[lo, hi)` whose taps at `offset` land inside an input
/// of length `len`. `offset` is `tap * dilation - pad_before`.
fn valid_range(len: usize, offset: isize) -> Option<(usize, usize)> {
    let lo = (-offset).max(0) as usize;
    let hi = (len as isize - offset).min(len as isize);
    if hi <= lo as isize {
        None
    } else {
        Some((lo, hi as usize))
    }
}

fn shape_error(what: &str, x: &[usize], w: &[usize]) -> CoconetError {
    CoconetError::Shape(format!("{what}: input {x:?}, weights {w:?}"))
}

/// Plain 2D convolution. `weights` is `[kh, kw, in, out]`.
pub fn conv2d(x: &Array4<f32>, weights: &Array4<f32>, dilation: [usize; 2]) -> Result<Array4<f32>> {
    let (b, t, p, cin) = x.dim();
    let (kh, kw, win, cout) = weights.dim();
    if win != cin || kh == 0 || kw == 0 {
        return Err(shape_error("conv2d", x.shape(), weights.shape()));
    }
    let (pad_t, _) = same_padding(kh, dilation[0]);
    let (pad_p, _) = same_padding(kw, dilation[1]);
    let mut out = Array4::<f32>::zeros((b, t, p, cout));

    for ky in 0..kh {
        let dy = (ky * dilation[0]) as isize - pad_t as isize;
        let Some((t0, t1)) = valid_range(t, dy) else {
            continue;
        };
        for kx in 0..kw {
            let dx = (kx * dilation[1]) as isize - pad_p as isize;
            let Some((p0, p1)) = valid_range(p, dx) else {
                continue;
            };
            let tap = weights.slice(s![ky, kx, .., ..]);
            let (it0, ip0) = ((t0 as isize + dy) as usize, (p0 as isize + dx) as usize);
            let (nt, np) = (t1 - t0, p1 - p0);
            for batch in 0..b {
                let window = x
                    .slice(s![batch, it0..it0 + nt, ip0..ip0 + np, ..])
                    .to_owned()
                    .into_shape_with_order((nt * np, cin))
                    .map_err(|e| CoconetError::Shape(e.to_string()))?;
                let contrib = window
                    .dot(&tap)
                    .into_shape_with_order((nt, np, cout))
                    .map_err(|e| CoconetError::Shape(e.to_string()))?;
                let mut dst = out.slice_mut(s![batch, t0..t1, p0..p1, ..]);
                dst += &contrib;
            }
        }
    }
    Ok(out)
}

/// Depthwise convolution. `weights` is `[kh, kw, in, multiplier]`; output
/// channel `c * multiplier + m` is input channel `c` filtered by `[.., .., c, m]`.
pub fn depthwise_conv2d(
    x: &Array4<f32>,
    weights: &Array4<f32>,
    dilation: [usize; 2],
) -> Result<Array4<f32>> {
    let (b, t, p, cin) = x.dim();
    let (kh, kw, win, mult) = weights.dim();
    if win != cin || kh == 0 || kw == 0 || mult == 0 {
        return Err(shape_error("depthwise_conv2d", x.shape(), weights.shape()));
    }
    let (pad_t, _) = same_padding(kh, dilation[0]);
    let (pad_p, _) = same_padding(kw, dilation[1]);
    let mut out = Array4::<f32>::zeros((b, t, p, cin * mult));

    for ky in 0..kh {
        let dy = (ky * dilation[0]) as isize - pad_t as isize;
        let Some((t0, t1)) = valid_range(t, dy) else {
            continue;
        };
        for kx in 0..kw {
            let dx = (kx * dilation[1]) as isize - pad_p as isize;
            let Some((p0, p1)) = valid_range(p, dx) else {
                continue;
            };
            let (it0, ip0) = ((t0 as isize + dy) as usize, (p0 as isize + dx) as usize);
            let (nt, np) = (t1 - t0, p1 - p0);
            let window = x.slice(s![.., it0..it0 + nt, ip0..ip0 + np, ..]);
            for m in 0..mult {
                let tap = weights.slice(s![ky, kx, .., m]);
                let mut dst = out.slice_mut(s![.., t0..t1, p0..p1, m..;mult]);
                Zip::from(dst.lanes_mut(Axis(3)))
                    .and(window.lanes(Axis(3)))
                    .for_each(|mut o, i| {
                        Zip::from(&mut o).and(&i).and(&tap).for_each(|o, &i, &w| *o += i * w);
                    });
            }
        }
    }
    Ok(out)
}

/// 1x1 convolution. `weights` is `[1, 1, in, out]`.
pub fn pointwise_conv2d(x: ArrayView4<f32>, weights: &Array4<f32>) -> Result<Array4<f32>> {
    let (b, t, p, cin) = x.dim();
    let (kh, kw, win, cout) = weights.dim();
    if (kh, kw) != (1, 1) || win != cin {
        return Err(shape_error("pointwise_conv2d", x.shape(), weights.shape()));
    }
    let matrix: Array2<f32> = weights.slice(s![0, 0, .., ..]).to_owned();
    let flat = x
        .to_owned()
        .into_shape_with_order((b * t * p, cin))
        .map_err(|e| CoconetError::Shape(e.to_string()))?;
    flat.dot(&matrix)
        .into_shape_with_order((b, t, p, cout))
        .map_err(|e| CoconetError::Shape(e.to_string()))
}

/// Add a per-channel vector.
pub fn add_bias(x: &mut Array4<f32>, bias: &Array1<f32>) -> Result<()> {
    if x.len_of(Axis(3)) != bias.len() {
        return Err(shape_error("add_bias", x.shape(), bias.shape()));
    }
    *x += bias;
    Ok(())
}

/// `x * scale + shift`, per channel.
pub fn scale_shift(x: &mut Array4<f32>, scale: &Array1<f32>, shift: &Array1<f32>) -> Result<()> {
    let c = x.len_of(Axis(3));
    if scale.len() != c || shift.len() != c {
        return Err(shape_error("scale_shift", x.shape(), scale.shape()));
    }
    *x *= scale;
    *x += shift;
    Ok(())
}

pub fn relu(x: &mut Array4<f32>) {
    x.mapv_inplace(|v| v.max(0.0));
}

pub fn sigmoid(x: &mut Array4<f32>) {
    x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));
}

/// Numerically stable softmax along `axis`.
pub fn softmax(x: &mut Array4<f32>, axis: usize) {
    for mut lane in x.lanes_mut(Axis(axis)) {
        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        lane.mapv_inplace(|v| (v - max).exp());
        let total: f32 = lane.sum();
        if total > 0.0 {
            lane /= total;
        }
    }
}

/// Max pooling over steps and pitches with stride equal to the window and
/// SAME padding (output `ceil(len / window)`).
pub fn max_pool(x: &Array4<f32>, window: [usize; 2]) -> Result<Array4<f32>> {
    let (b, t, p, c) = x.dim();
    let [wh, ww] = window;
    if wh == 0 || ww == 0 {
        return Err(CoconetError::Shape(format!("max_pool: window {window:?}")));
    }
    let (ot, op) = (t.div_ceil(wh), p.div_ceil(ww));
    let pad_t = (ot * wh).saturating_sub(t) / 2;
    let pad_p = (op * ww).saturating_sub(p) / 2;
    let mut out = Array4::<f32>::from_elem((b, ot, op, c), f32::NEG_INFINITY);
    for ((batch, i, j, ch), v) in out.indexed_iter_mut() {
        let t_start = (i * wh).saturating_sub(pad_t);
        let t_end = (i * wh + wh).saturating_sub(pad_t).min(t);
        let p_start = (j * ww).saturating_sub(pad_p);
        let p_end = (j * ww + ww).saturating_sub(pad_p).min(p);
        for &value in x.slice(s![batch, t_start..t_end, p_start..p_end, ch]) {
            *v = v.max(value);
        }
    }
    Ok(out)
}

/// Concatenate along the channel axis.
pub fn concat_channels(a: &Array4<f32>, b: &Array4<f32>) -> Result<Array4<f32>> {
    concatenate(Axis(3), &[a.view(), b.view()]).map_err(|e| CoconetError::Shape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        Array4::from_shape_fn(shape, |(b, t, p, c)| (b * 1000 + t * 100 + p * 10 + c) as f32)
    }

    #[test]
    fn test_same_padding_with_dilation() {
        assert_eq!(same_padding(3, 1), (1, 3));
        assert_eq!(same_padding(3, 4), (4, 9));
        assert_eq!(same_padding(2, 1), (0, 2));
        assert_eq!(same_padding(3, 32), (32, 65));
    }

    #[test]
    fn test_identity_kernel_conv() {
        let x = ramp((1, 4, 5, 2));
        let mut w = Array4::<f32>::zeros((3, 3, 2, 2));
        w[[1, 1, 0, 0]] = 1.0;
        w[[1, 1, 1, 1]] = 1.0;
        let y = conv2d(&x, &w, [1, 1]).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_conv_sums_neighbors_with_zero_padding() {
        let x = Array4::<f32>::ones((1, 3, 3, 1));
        let w = Array4::<f32>::ones((3, 3, 1, 1));
        let y = conv2d(&x, &w, [1, 1]).unwrap();
        assert_eq!(y[[0, 1, 1, 0]], 9.0);
        assert_eq!(y[[0, 0, 0, 0]], 4.0);
        assert_eq!(y[[0, 0, 1, 0]], 6.0);
    }

    #[test]
    fn test_dilated_conv_reaches_far_taps() {
        let mut x = Array4::<f32>::zeros((1, 5, 1, 1));
        x[[0, 4, 0, 0]] = 1.0;
        let mut w = Array4::<f32>::zeros((3, 1, 1, 1));
        w[[2, 0, 0, 0]] = 1.0;
        // dilation 2: tap 2 reads t + 2*2 - 2 = t + 2
        let y = conv2d(&x, &w, [2, 1]).unwrap();
        assert_eq!(y[[0, 2, 0, 0]], 1.0);
        assert_eq!(y.sum(), 1.0);
    }

    #[test]
    fn test_depthwise_matches_per_channel_conv() {
        let x = ramp((2, 4, 3, 2));
        let w = Array4::from_shape_fn((3, 3, 2, 1), |(a, b, c, _)| (a + 2 * b + c) as f32 * 0.1);
        let y = depthwise_conv2d(&x, &w, [1, 1]).unwrap();
        for c in 0..2 {
            let xc = x.slice(s![.., .., .., c..c + 1]).to_owned();
            let wc = w.slice(s![.., .., c..c + 1, ..]).to_owned();
            let yc = conv2d(&xc, &wc, [1, 1]).unwrap();
            for (a, b) in y.slice(s![.., .., .., c]).iter().zip(yc.iter()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn test_pointwise_is_channel_matmul() {
        let x = ramp((1, 2, 2, 3));
        let w = Array4::from_shape_fn((1, 1, 3, 2), |(_, _, i, o)| (i + o) as f32);
        let y = pointwise_conv2d(x.view(), &w).unwrap();
        let expected = x[[0, 1, 0, 0]] * 1.0 + x[[0, 1, 0, 1]] * 2.0 + x[[0, 1, 0, 2]] * 3.0;
        assert_eq!(y[[0, 1, 0, 1]], expected);
    }

    #[test]
    fn test_shape_errors() {
        let x = Array4::<f32>::zeros((1, 2, 2, 3));
        let w = Array4::<f32>::zeros((3, 3, 2, 1));
        assert!(conv2d(&x, &w, [1, 1]).is_err());
        assert!(depthwise_conv2d(&x, &w, [1, 1]).is_err());
        assert!(add_bias(&mut x.clone(), &Array1::zeros(2)).is_err());
    }

    #[test]
    fn test_softmax_over_pitch() {
        let mut x = ramp((1, 2, 4, 3));
        softmax(&mut x, 2);
        for t in 0..2 {
            for c in 0..3 {
                let total: f32 = x.slice(s![0, t, .., c]).sum();
                assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
            }
        }
        assert!(x[[0, 0, 3, 0]] > x[[0, 0, 0, 0]]);
    }

    #[test]
    fn test_max_pool_same() {
        let x = ramp((1, 5, 4, 1));
        let y = max_pool(&x, [2, 2]).unwrap();
        assert_eq!(y.dim(), (1, 3, 2, 1));
        assert_eq!(y[[0, 2, 1, 0]], x[[0, 4, 3, 0]]);
    }

    #[test]
    fn test_activations() {
        let mut x = Array4::from_shape_vec((1, 1, 1, 3), vec![-1.0, 0.0, 2.0]).unwrap();
        let mut squashed = x.clone();
        relu(&mut x);
        assert_eq!(x.as_slice().unwrap(), &[0.0, 0.0, 2.0]);
        sigmoid(&mut squashed);
        assert_abs_diff_eq!(squashed[[0, 0, 0, 1]], 0.5);
    }
}
