//! DSP capability set.
//!
//! A fixed set of function pointers selected at init time: intra predictors,
//! inverse-transform-and-add, sub-pixel motion-compensation filters, and
//! loop-filter edge functions. The block engines index into these tables and
//! never compute pixels themselves, so an embedder can swap in optimized
//! kernels by replacing table entries after [`Dsp::new`].
//!
//! The built-in kernels are straightforward scalar references: predictors
//! and loop filters follow the published algorithms; the inverse transforms
//! evaluate the transform bases directly (fixed-point tables built once at
//! startup) rather than reproducing any particular butterfly ordering.

use once_cell::sync::Lazy;

/// Intra predictor: paints a size×size block at `dst[off..]`.
/// `top` holds 2×size samples (top-right half replicated when absent),
/// `left` holds size samples top-down, `tl` is the top-left corner sample.
pub type IntraPredFn =
    fn(dst: &mut [u8], off: usize, stride: usize, left: &[u8], top: &[u8], tl: u8);

/// Inverse transform + add: reconstructs a size×size residual from
/// `coeffs` (raster order) and adds it to the destination. `eob` is the
/// number of coded coefficients in scan order; 0 never reaches the kernel.
pub type ItxfmFn = fn(dst: &mut [u8], off: usize, stride: usize, coeffs: &[i32], eob: usize);

/// Loop-filter edge function. `off` addresses the first pixel at or after
/// the edge; column-edge filters reach backwards along the row, row-edge
/// filters reach backwards along the column. For the `mix2` variants the
/// two packed limits sit in the two low bytes of `e`/`i`/`h`.
pub type LoopFilterFn = fn(data: &mut [u8], off: usize, stride: usize, e: i32, i: i32, h: i32);

/// Motion compensation: width comes from the table slot, height is `h`.
/// `mx`/`my` are sub-pixel phases in 1/16th units (0 = full pel). The source
/// window, including the filter footprint, must be in bounds; callers use
/// [`edge_emu_copy`] when it is not.
pub type McFn = fn(
    dst: &mut [u8],
    doff: usize,
    dstride: usize,
    src: &[u8],
    soff: usize,
    sstride: usize,
    h: usize,
    mx: usize,
    my: usize,
);

/// 8x8 inverse DCT, overwrite variant, for the DV flavor.
pub type Idct8x8Fn = fn(dst: &mut [u8], off: usize, stride: usize, coeffs: &[i32]);

pub const N_TX_SIZES: usize = 4;
pub const N_INTRA_MODES: usize = 15;
pub const N_TX_TYPES: usize = 4;

/// Indexes into `Dsp::intra_pred[..]`, matching the mode decode tables.
pub mod intra {
    pub const VERT: usize = 0;
    pub const HOR: usize = 1;
    pub const DC: usize = 2;
    pub const DIAG_DOWN_LEFT: usize = 3;
    pub const DIAG_DOWN_RIGHT: usize = 4;
    pub const VERT_RIGHT: usize = 5;
    pub const HOR_DOWN: usize = 6;
    pub const VERT_LEFT: usize = 7;
    pub const HOR_UP: usize = 8;
    pub const TM: usize = 9;
    pub const LEFT_DC: usize = 10;
    pub const TOP_DC: usize = 11;
    pub const DC_128: usize = 12;
    pub const DC_127: usize = 13;
    pub const DC_129: usize = 14;
}

pub struct Dsp {
    /// dimension 1: transform size (4, 8, 16, 32)
    /// dimension 2: intra prediction mode
    pub intra_pred: [[IntraPredFn; N_INTRA_MODES]; N_TX_SIZES],
    /// dimension 1: transform size, plus `[4]` = lossless (Walsh-Hadamard)
    /// dimension 2: transform type (DCT/ADST per direction; 32x32 is DCT-only)
    pub itxfm_add: [[ItxfmFn; N_TX_TYPES]; N_TX_SIZES + 1],
    /// dimension 1: filter width (0=4, 1=8, 2=16)
    /// dimension 2: 0=column edge, 1=row edge
    pub loop_filter_8: [[LoopFilterFn; 2]; 3],
    pub loop_filter_16: [LoopFilterFn; 2],
    /// two adjacent 8-unit edges of (possibly) different widths in one call;
    /// dimensions 1/2: width (0=4, 1=8) per half, dimension 3: orientation
    pub loop_filter_mix2: [[[LoopFilterFn; 2]; 2]; 2],
    /// dimension 1: block width (0=64, 1=32, 2=16, 3=8, 4=4)
    /// dimension 2: filter bank (smooth, regular, sharp, bilinear)
    /// dimension 3: averaging (0=put, 1=avg)
    /// dimensions 4/5: x/y sub-pel taps needed
    pub mc: [[[[[McFn; 2]; 2]; 2]; 4]; 5],
    pub idct8x8_put: Idct8x8Fn,
}

impl Dsp {
    pub fn new() -> Dsp {
        macro_rules! intra_row {
            ($s:expr) => {
                [
                    vert_pred::<$s>,
                    hor_pred::<$s>,
                    dc_pred::<$s>,
                    diag_downleft_pred::<$s>,
                    diag_downright_pred::<$s>,
                    vert_right_pred::<$s>,
                    hor_down_pred::<$s>,
                    vert_left_pred::<$s>,
                    hor_up_pred::<$s>,
                    tm_pred::<$s>,
                    left_dc_pred::<$s>,
                    top_dc_pred::<$s>,
                    dc_fill_pred::<$s, 128>,
                    dc_fill_pred::<$s, 127>,
                    dc_fill_pred::<$s, 129>,
                ]
            };
        }
        macro_rules! itxfm_row {
            ($s:expr) => {
                [
                    itxfm_add::<$s, false, false>,
                    itxfm_add::<$s, false, true>,
                    itxfm_add::<$s, true, false>,
                    itxfm_add::<$s, true, true>,
                ]
            };
        }
        Dsp {
            intra_pred: [intra_row!(4), intra_row!(8), intra_row!(16), intra_row!(32)],
            itxfm_add: [
                itxfm_row!(4),
                itxfm_row!(8),
                itxfm_row!(16),
                // the 32x32 transform is DCT-only in both directions
                [
                    itxfm_add::<32, false, false>,
                    itxfm_add::<32, false, false>,
                    itxfm_add::<32, false, false>,
                    itxfm_add::<32, false, false>,
                ],
                [iwht_add, iwht_add, iwht_add, iwht_add],
            ],
            loop_filter_8: [
                [lf_col::<4>, lf_row::<4>],
                [lf_col::<8>, lf_row::<8>],
                [lf_col::<16>, lf_row::<16>],
            ],
            loop_filter_16: [lf16_col, lf16_row],
            loop_filter_mix2: [
                [
                    [lf_mix2_col::<4, 4>, lf_mix2_row::<4, 4>],
                    [lf_mix2_col::<4, 8>, lf_mix2_row::<4, 8>],
                ],
                [
                    [lf_mix2_col::<8, 4>, lf_mix2_row::<8, 4>],
                    [lf_mix2_col::<8, 8>, lf_mix2_row::<8, 8>],
                ],
            ],
            mc: [
                mc_size::<64>(),
                mc_size::<32>(),
                mc_size::<16>(),
                mc_size::<8>(),
                mc_size::<4>(),
            ],
            idct8x8_put: idct8x8_put,
        }
    }
}

impl Default for Dsp {
    fn default() -> Self {
        Dsp::new()
    }
}

#[inline]
fn avg2(a: u8, b: u8) -> u8 {
    ((u16::from(a) + u16::from(b) + 1) >> 1) as u8
}

#[inline]
fn avg3(a: u8, b: u8, c: u8) -> u8 {
    ((u16::from(a) + 2 * u16::from(b) + u16::from(c) + 2) >> 2) as u8
}

// ---- intra predictors -------------------------------------------------------

fn vert_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    _left: &[u8],
    top: &[u8],
    _tl: u8,
) {
    for r in 0..S {
        dst[off + r * stride..off + r * stride + S].copy_from_slice(&top[..S]);
    }
}

fn hor_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    _top: &[u8],
    _tl: u8,
) {
    for r in 0..S {
        dst[off + r * stride..off + r * stride + S].fill(left[r]);
    }
}

fn fill_block<const S: usize>(dst: &mut [u8], off: usize, stride: usize, v: u8) {
    for r in 0..S {
        dst[off + r * stride..off + r * stride + S].fill(v);
    }
}

fn dc_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    top: &[u8],
    _tl: u8,
) {
    let mut sum = S as u32;
    for i in 0..S {
        sum += u32::from(left[i]) + u32::from(top[i]);
    }
    fill_block::<S>(dst, off, stride, (sum / (2 * S as u32)) as u8);
}

fn left_dc_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    _top: &[u8],
    _tl: u8,
) {
    let sum: u32 = left[..S].iter().map(|&v| u32::from(v)).sum();
    fill_block::<S>(dst, off, stride, ((sum + S as u32 / 2) / S as u32) as u8);
}

fn top_dc_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    _left: &[u8],
    top: &[u8],
    _tl: u8,
) {
    let sum: u32 = top[..S].iter().map(|&v| u32::from(v)).sum();
    fill_block::<S>(dst, off, stride, ((sum + S as u32 / 2) / S as u32) as u8);
}

fn dc_fill_pred<const S: usize, const V: u8>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    _left: &[u8],
    _top: &[u8],
    _tl: u8,
) {
    fill_block::<S>(dst, off, stride, V);
}

fn tm_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    top: &[u8],
    tl: u8,
) {
    for r in 0..S {
        for c in 0..S {
            let v = i32::from(left[r]) + i32::from(top[c]) - i32::from(tl);
            dst[off + r * stride + c] = v.clamp(0, 255) as u8;
        }
    }
}

fn diag_downleft_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    _left: &[u8],
    top: &[u8],
    _tl: u8,
) {
    for r in 0..S {
        for c in 0..S {
            dst[off + r * stride + c] = if r + c + 2 < 2 * S {
                avg3(top[r + c], top[r + c + 1], top[r + c + 2])
            } else {
                top[2 * S - 1]
            };
        }
    }
}

fn diag_downright_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    top: &[u8],
    tl: u8,
) {
    // border along the 135 degree line: left bottom-up, corner, top
    let mut b = [0u8; 65];
    for i in 0..S {
        b[i] = left[S - 1 - i];
    }
    b[S] = tl;
    b[S + 1..2 * S + 1].copy_from_slice(&top[..S]);
    for r in 0..S {
        for c in 0..S {
            let i = S + c - r;
            dst[off + r * stride + c] = avg3(b[i - 1], b[i], b[i + 1]);
        }
    }
}

fn vert_right_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    top: &[u8],
    tl: u8,
) {
    for c in 0..S {
        let a = if c == 0 { tl } else { top[c - 1] };
        dst[off + c] = avg2(a, top[c]);
    }
    dst[off + stride] = avg3(left[0], tl, top[0]);
    for c in 1..S {
        let a = if c >= 2 { top[c - 2] } else { tl };
        dst[off + stride + c] = avg3(a, top[c - 1], top[c]);
    }
    dst[off + 2 * stride] = avg3(tl, left[0], left[1]);
    for r in 3..S {
        dst[off + r * stride] = avg3(left[r - 3], left[r - 2], left[r - 1]);
    }
    for r in 2..S {
        for c in 1..S {
            dst[off + r * stride + c] = dst[off + (r - 2) * stride + c - 1];
        }
    }
}

fn hor_down_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    top: &[u8],
    tl: u8,
) {
    dst[off] = avg2(tl, left[0]);
    for r in 1..S {
        dst[off + r * stride] = avg2(left[r - 1], left[r]);
    }
    dst[off + 1] = avg3(left[0], tl, top[0]);
    dst[off + stride + 1] = avg3(tl, left[0], left[1]);
    for r in 2..S {
        dst[off + r * stride + 1] = avg3(left[r - 2], left[r - 1], left[r]);
    }
    for c in 0..S - 2 {
        let a = if c == 0 { tl } else { top[c - 1] };
        dst[off + c + 2] = avg3(a, top[c], top[c + 1]);
    }
    for r in 1..S {
        for c in 2..S {
            dst[off + r * stride + c] = dst[off + (r - 1) * stride + c - 2];
        }
    }
}

fn vert_left_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    _left: &[u8],
    top: &[u8],
    _tl: u8,
) {
    let t = |i: usize| top[i.min(2 * S - 1)];
    for r in 0..S {
        for c in 0..S {
            let i = (r >> 1) + c;
            dst[off + r * stride + c] = if r & 1 == 0 {
                avg2(t(i), t(i + 1))
            } else {
                avg3(t(i), t(i + 1), t(i + 2))
            };
        }
    }
}

fn hor_up_pred<const S: usize>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    left: &[u8],
    _top: &[u8],
    _tl: u8,
) {
    let l = |i: usize| left[i.min(S - 1)];
    for r in 0..S {
        for c in 0..S {
            let i = r + (c >> 1);
            dst[off + r * stride + c] = if i >= S - 1 {
                left[S - 1]
            } else if c & 1 == 0 {
                avg2(l(i), l(i + 1))
            } else {
                avg3(l(i), l(i + 1), l(i + 2))
            };
        }
    }
}

// ---- inverse transforms -----------------------------------------------------

#[inline]
fn round_shift(v: i64, bits: u32) -> i64 {
    (v + (1 << (bits - 1))) >> bits
}

/// Fixed-point inverse transform bases, 2^14 scale, flattened row-major as
/// `m[k * n + n_idx]`, built once at startup. The DCT rows carry the usual
/// half-amplitude DC row; the ADST is the DST-IV basis.
struct TxBasis {
    dct: [Vec<i32>; 4],
    adst: [Vec<i32>; 3],
}

fn dct_basis(n: usize) -> Vec<i32> {
    let mut m = vec![0i32; n * n];
    for k in 0..n {
        for x in 0..n {
            let scale = if k == 0 {
                std::f64::consts::FRAC_1_SQRT_2
            } else {
                1.0
            };
            let v = scale
                * (std::f64::consts::PI * k as f64 * (2 * x + 1) as f64 / (2.0 * n as f64)).cos();
            m[k * n + x] = (v * 16384.0).round() as i32;
        }
    }
    m
}

fn adst_basis(n: usize) -> Vec<i32> {
    let mut m = vec![0i32; n * n];
    for k in 0..n {
        for x in 0..n {
            let v = (std::f64::consts::PI * (2 * k + 1) as f64 * (2 * x + 1) as f64
                / (4.0 * n as f64))
                .sin();
            m[k * n + x] = (v * 16384.0).round() as i32;
        }
    }
    m
}

static TX_BASIS: Lazy<TxBasis> = Lazy::new(|| TxBasis {
    dct: [dct_basis(4), dct_basis(8), dct_basis(16), dct_basis(32)],
    adst: [adst_basis(4), adst_basis(8), adst_basis(16)],
});

fn basis(n: usize, adst: bool) -> &'static [i32] {
    let b = &*TX_BASIS;
    let idx = match n {
        4 => 0,
        8 => 1,
        16 => 2,
        _ => 3,
    };
    if adst && n <= 16 {
        &b.adst[idx]
    } else {
        &b.dct[idx]
    }
}

fn transform_1d(input: &[i64], adst: bool, out: &mut [i64]) {
    let n = input.len();
    let m = basis(n, adst);
    for (x, o) in out.iter_mut().enumerate() {
        let mut acc = 0i64;
        for (k, &i) in input.iter().enumerate() {
            acc += i * i64::from(m[k * n + x]);
        }
        *o = round_shift(acc, 14);
    }
}

/// Row transform, then column transform, then shift-and-add. `ROWS_ADST`
/// selects the vertical 1-D transform, `COLS_ADST` the horizontal one.
fn itxfm_add<const N: usize, const ROWS_ADST: bool, const COLS_ADST: bool>(
    dst: &mut [u8],
    off: usize,
    stride: usize,
    coeffs: &[i32],
    _eob: usize,
) {
    let shift = match N {
        4 => 4,
        8 => 5,
        _ => 6,
    };
    let mut tmp = [[0i64; N]; N];
    let mut v_in = [0i64; N];
    let mut v_out = [0i64; N];
    for r in 0..N {
        for c in 0..N {
            v_in[c] = i64::from(coeffs[r * N + c]);
        }
        transform_1d(&v_in, COLS_ADST, &mut v_out);
        tmp[r] = v_out;
    }
    for c in 0..N {
        for r in 0..N {
            v_in[r] = tmp[r][c];
        }
        transform_1d(&v_in, ROWS_ADST, &mut v_out);
        for r in 0..N {
            let p = off + r * stride + c;
            let v = i64::from(dst[p]) + round_shift(v_out[r], shift);
            dst[p] = v.clamp(0, 255) as u8;
        }
    }
}

/// 4x4 Walsh-Hadamard for the lossless mode.
fn iwht_add(dst: &mut [u8], off: usize, stride: usize, coeffs: &[i32], _eob: usize) {
    let mut tmp = [0i32; 16];
    for r in 0..4 {
        let i = r * 4;
        let mut a1 = coeffs[i] >> 2;
        let mut c1 = coeffs[i + 1] >> 2;
        let mut d1 = coeffs[i + 2] >> 2;
        let mut b1 = coeffs[i + 3] >> 2;
        a1 += c1;
        d1 -= b1;
        let e1 = (a1 - d1) >> 1;
        b1 = e1 - b1;
        c1 = e1 - c1;
        a1 -= b1;
        d1 += c1;
        tmp[i] = a1;
        tmp[i + 1] = b1;
        tmp[i + 2] = c1;
        tmp[i + 3] = d1;
    }
    for c in 0..4 {
        let mut a1 = tmp[c];
        let mut c1 = tmp[4 + c];
        let mut d1 = tmp[8 + c];
        let mut b1 = tmp[12 + c];
        a1 += c1;
        d1 -= b1;
        let e1 = (a1 - d1) >> 1;
        b1 = e1 - b1;
        c1 = e1 - c1;
        a1 -= b1;
        d1 += c1;
        for (r, v) in [a1, b1, c1, d1].into_iter().enumerate() {
            let p = off + r * stride + c;
            dst[p] = (i32::from(dst[p]) + v).clamp(0, 255) as u8;
        }
    }
}

/// 8x8 inverse DCT, overwrite variant (DV blocks carry the +1024 DC offset
/// so mid-gray needs no separate bias here).
fn idct8x8_put(dst: &mut [u8], off: usize, stride: usize, coeffs: &[i32]) {
    let mut tmp = [[0i64; 8]; 8];
    let mut v_in = [0i64; 8];
    let mut v_out = [0i64; 8];
    for r in 0..8 {
        for c in 0..8 {
            v_in[c] = i64::from(coeffs[r * 8 + c]);
        }
        transform_1d(&v_in, false, &mut v_out);
        tmp[r] = v_out;
    }
    for c in 0..8 {
        for r in 0..8 {
            v_in[r] = tmp[r][c];
        }
        transform_1d(&v_in, false, &mut v_out);
        for r in 0..8 {
            dst[off + r * stride + c] = round_shift(v_out[r], 2).clamp(0, 255) as u8;
        }
    }
}

// ---- motion compensation ----------------------------------------------------

/// 16-phase 8-tap banks: smooth, regular, sharp, bilinear (tap sums 128).
/// Phases 9..15 mirror phases 7..1.
type FilterBank = [[i16; 8]; 16];

fn mirror_fill(half: [[i16; 8]; 9]) -> FilterBank {
    let mut bank = [[0i16; 8]; 16];
    bank[..9].copy_from_slice(&half);
    for p in 9..16 {
        let mut rev = half[16 - p];
        rev.reverse();
        bank[p] = rev;
    }
    bank
}

static FILTERS: Lazy<[FilterBank; 4]> = Lazy::new(|| {
    let smooth = mirror_fill([
        [0, 0, 0, 128, 0, 0, 0, 0],
        [-3, -1, 32, 64, 38, 1, -3, 0],
        [-2, -2, 29, 63, 41, 2, -3, 0],
        [-2, -2, 26, 63, 43, 4, -4, 0],
        [-2, -3, 24, 62, 46, 5, -4, 0],
        [-2, -3, 21, 60, 49, 7, -4, 0],
        [-1, -4, 18, 59, 51, 9, -4, 0],
        [-1, -4, 16, 57, 53, 12, -4, -1],
        [-1, -4, 14, 55, 55, 14, -4, -1],
    ]);
    let regular = mirror_fill([
        [0, 0, 0, 128, 0, 0, 0, 0],
        [0, 1, -5, 126, 8, -3, 1, 0],
        [-1, 3, -10, 122, 18, -6, 2, 0],
        [-1, 4, -13, 118, 27, -9, 3, -1],
        [-1, 4, -16, 112, 37, -11, 4, -1],
        [-1, 5, -18, 105, 48, -14, 4, -1],
        [-1, 5, -19, 97, 58, -16, 5, -1],
        [-1, 6, -19, 88, 68, -18, 6, -2],
        [-1, 6, -19, 78, 78, -19, 6, -1],
    ]);
    let sharp = mirror_fill([
        [0, 0, 0, 128, 0, 0, 0, 0],
        [-1, 3, -7, 127, 8, -3, 1, 0],
        [-2, 5, -13, 125, 17, -6, 3, -1],
        [-3, 7, -17, 121, 27, -10, 5, -2],
        [-4, 8, -20, 115, 37, -13, 6, -1],
        [-4, 9, -22, 107, 49, -15, 6, -2],
        [-4, 10, -23, 99, 60, -18, 7, -3],
        [-4, 11, -23, 90, 70, -19, 7, -4],
        [-4, 11, -23, 80, 80, -23, 11, -4],
    ]);
    let mut bilinear = [[0i16; 8]; 16];
    for (p, taps) in bilinear.iter_mut().enumerate() {
        taps[3] = 128 - 8 * p as i16;
        taps[4] = 8 * p as i16;
    }
    [smooth, regular, sharp, bilinear]
});

#[inline]
fn filter_px(src: &[u8], base: isize, step: isize, taps: &[i16; 8]) -> u8 {
    let mut acc = 0i32;
    for (t, &tap) in taps.iter().enumerate() {
        acc += i32::from(src[(base + t as isize * step) as usize]) * i32::from(tap);
    }
    ((acc + 64) >> 7).clamp(0, 255) as u8
}

fn mc_put_copy<const W: usize, const AVG: bool>(
    dst: &mut [u8],
    doff: usize,
    dstride: usize,
    src: &[u8],
    soff: usize,
    sstride: usize,
    h: usize,
    _mx: usize,
    _my: usize,
) {
    for y in 0..h {
        for x in 0..W {
            let s = src[soff + y * sstride + x];
            let d = &mut dst[doff + y * dstride + x];
            *d = if AVG { avg2(*d, s) } else { s };
        }
    }
}

fn mc_filter<
    const W: usize,
    const BANK: usize,
    const AVG: bool,
    const SUBX: bool,
    const SUBY: bool,
>(
    dst: &mut [u8],
    doff: usize,
    dstride: usize,
    src: &[u8],
    soff: usize,
    sstride: usize,
    h: usize,
    mx: usize,
    my: usize,
) {
    let bank = &FILTERS[BANK];
    let soff = soff as isize;
    let sstride_i = sstride as isize;
    if SUBX && SUBY {
        // horizontal into a scratch with 7 extra rows, then vertical
        let mut tmp = [0u8; 64 * 71];
        let taps_x = &bank[mx];
        for y in 0..h + 7 {
            for x in 0..W {
                tmp[y * W + x] = filter_px(
                    src,
                    soff + (y as isize - 3) * sstride_i + x as isize - 3,
                    1,
                    taps_x,
                );
            }
        }
        let taps_y = &bank[my];
        for y in 0..h {
            for x in 0..W {
                let v = filter_px(&tmp, (y * W + x) as isize, W as isize, taps_y);
                let d = &mut dst[doff + y * dstride + x];
                *d = if AVG { avg2(*d, v) } else { v };
            }
        }
    } else if SUBX {
        let taps = &bank[mx];
        for y in 0..h {
            for x in 0..W {
                let v = filter_px(src, soff + y as isize * sstride_i + x as isize - 3, 1, taps);
                let d = &mut dst[doff + y * dstride + x];
                *d = if AVG { avg2(*d, v) } else { v };
            }
        }
    } else {
        let taps = &bank[my];
        for y in 0..h {
            for x in 0..W {
                let v = filter_px(
                    src,
                    soff + (y as isize - 3) * sstride_i + x as isize,
                    sstride_i,
                    taps,
                );
                let d = &mut dst[doff + y * dstride + x];
                *d = if AVG { avg2(*d, v) } else { v };
            }
        }
    }
}

fn mc_bank<const W: usize, const BANK: usize>() -> [[[McFn; 2]; 2]; 2] {
    [
        [
            [
                mc_put_copy::<W, false>,
                mc_filter::<W, BANK, false, false, true>,
            ],
            [
                mc_filter::<W, BANK, false, true, false>,
                mc_filter::<W, BANK, false, true, true>,
            ],
        ],
        [
            [
                mc_put_copy::<W, true>,
                mc_filter::<W, BANK, true, false, true>,
            ],
            [
                mc_filter::<W, BANK, true, true, false>,
                mc_filter::<W, BANK, true, true, true>,
            ],
        ],
    ]
}

fn mc_size<const W: usize>() -> [[[[McFn; 2]; 2]; 2]; 4] {
    [
        mc_bank::<W, 0>(),
        mc_bank::<W, 1>(),
        mc_bank::<W, 2>(),
        mc_bank::<W, 3>(),
    ]
}

/// Motion compensation against a reference of a different size: source
/// coordinates are 1/16-pel fixed point and advance by `stepx`/`stepy` per
/// destination pixel, so every position carries its own filter phase.
#[allow(clippy::too_many_arguments)]
pub fn mc_scaled(
    dst: &mut [u8],
    doff: usize,
    dstride: usize,
    src: &[u8],
    sstride: usize,
    w: usize,
    h: usize,
    sx16: u32,
    sy16: u32,
    stepx: usize,
    stepy: usize,
    bank: usize,
    avg: bool,
) {
    let bank = &FILTERS[bank];
    for dy in 0..h {
        let y16 = sy16 as usize + dy * stepy;
        let py = y16 >> 4;
        let taps_y = &bank[y16 & 15];
        for dx in 0..w {
            let x16 = sx16 as usize + dx * stepx;
            let px = x16 >> 4;
            let taps_x = &bank[x16 & 15];
            // horizontal pass over the eight source rows, then vertical
            let mut hrow = [0u8; 8];
            for (t, hv) in hrow.iter_mut().enumerate() {
                let base = (py + t) as isize * sstride as isize + px as isize - 3 * sstride as isize
                    - 3;
                *hv = filter_px(src, base, 1, taps_x);
            }
            let v = filter_px(&hrow, 0, 1, taps_y);
            let d = &mut dst[doff + dy * dstride + dx];
            *d = if avg { avg2(*d, v) } else { v };
        }
    }
}

/// Copy a `w`x`h` window whose top-left is at `(x, y)` in source coordinates
/// into a scratch buffer, clamping reads to the valid `src_w`x`src_h` area.
/// Used when a motion-compensation footprint crosses the picture edge.
#[allow(clippy::too_many_arguments)]
pub fn edge_emu_copy(
    dst: &mut [u8],
    dstride: usize,
    src: &[u8],
    sstride: usize,
    w: usize,
    h: usize,
    x: isize,
    y: isize,
    src_w: usize,
    src_h: usize,
) {
    for dy in 0..h {
        let sy = (y + dy as isize).clamp(0, src_h as isize - 1) as usize;
        for dx in 0..w {
            let sx = (x + dx as isize).clamp(0, src_w as isize - 1) as usize;
            dst[dy * dstride + dx] = src[sy * sstride + sx];
        }
    }
}

// ---- loop filter ------------------------------------------------------------

#[inline]
fn clamp_i8(v: i32) -> i32 {
    v.clamp(-128, 127)
}

#[inline]
fn lf_px(data: &[u8], off: usize, step: usize, n: isize) -> i32 {
    i32::from(data[(off as isize + n * step as isize) as usize])
}

#[inline]
fn lf_set(data: &mut [u8], off: usize, step: usize, n: isize, v: i32) {
    data[(off as isize + n * step as isize) as usize] = v.clamp(0, 255) as u8;
}

/// One filtered position across an edge. `step` walks perpendicular to the
/// edge, `off` addresses q0. `WD` is the filter width (4, 8 or 16).
fn lf_one<const WD: usize>(data: &mut [u8], off: usize, step: usize, e: i32, i: i32, h: i32) {
    let (p3, p2, p1, p0) = (
        lf_px(data, off, step, -4),
        lf_px(data, off, step, -3),
        lf_px(data, off, step, -2),
        lf_px(data, off, step, -1),
    );
    let (q0, q1, q2, q3) = (
        lf_px(data, off, step, 0),
        lf_px(data, off, step, 1),
        lf_px(data, off, step, 2),
        lf_px(data, off, step, 3),
    );

    let mask = (p3 - p2).abs() <= i
        && (p2 - p1).abs() <= i
        && (p1 - p0).abs() <= i
        && (q1 - q0).abs() <= i
        && (q2 - q1).abs() <= i
        && (q3 - q2).abs() <= i
        && (p0 - q0).abs() * 2 + (p1 - q1).abs() / 2 <= e;
    if !mask {
        return;
    }

    let flat8 = WD >= 8
        && (p3 - p0).abs() <= 1
        && (p2 - p0).abs() <= 1
        && (p1 - p0).abs() <= 1
        && (q1 - q0).abs() <= 1
        && (q2 - q0).abs() <= 1
        && (q3 - q0).abs() <= 1;

    if WD >= 16 && flat8 {
        // sb[0..16] = p7..p0, q0..q7
        let mut sb = [0i32; 16];
        for (k, s) in sb.iter_mut().enumerate() {
            *s = lf_px(data, off, step, k as isize - 8);
        }
        let flat16 = (0..4).all(|k| (sb[k] - p0).abs() <= 1 && (sb[12 + k] - q0).abs() <= 1);
        if flat16 {
            // 15-tap window plus the filtered sample itself, boundary
            // samples replicated
            for n in 1..15usize {
                let mut acc = sb[n];
                for t in -7..=7isize {
                    acc += sb[(n as isize + t).clamp(0, 15) as usize];
                }
                lf_set(data, off, step, n as isize - 8, (acc + 8) >> 4);
            }
            return;
        }
    }

    if flat8 {
        lf_set(data, off, step, -3, (p3 + p3 + p3 + 2 * p2 + p1 + p0 + q0 + 4) >> 3);
        lf_set(data, off, step, -2, (p3 + p3 + p2 + 2 * p1 + p0 + q0 + q1 + 4) >> 3);
        lf_set(data, off, step, -1, (p3 + p2 + p1 + 2 * p0 + q0 + q1 + q2 + 4) >> 3);
        lf_set(data, off, step, 0, (p2 + p1 + p0 + 2 * q0 + q1 + q2 + q3 + 4) >> 3);
        lf_set(data, off, step, 1, (p1 + p0 + q0 + 2 * q1 + q2 + q3 + q3 + 4) >> 3);
        lf_set(data, off, step, 2, (p0 + q0 + q1 + 2 * q2 + q3 + q3 + q3 + 4) >> 3);
        return;
    }

    let hev = (p1 - p0).abs() > h || (q1 - q0).abs() > h;
    let f = if hev { clamp_i8(p1 - q1) } else { 0 };
    let f = clamp_i8(f + 3 * (q0 - p0));
    let f1 = clamp_i8(f + 4) >> 3;
    let f2 = clamp_i8(f + 3) >> 3;
    lf_set(data, off, step, 0, q0 - f1);
    lf_set(data, off, step, -1, p0 + f2);
    if !hev {
        let a = (f1 + 1) >> 1;
        lf_set(data, off, step, 1, q1 - a);
        lf_set(data, off, step, -2, p1 + a);
    }
}

fn lf_col<const WD: usize>(data: &mut [u8], off: usize, stride: usize, e: i32, i: i32, h: i32) {
    for row in 0..8 {
        lf_one::<WD>(data, off + row * stride, 1, e, i, h);
    }
}

fn lf_row<const WD: usize>(data: &mut [u8], off: usize, stride: usize, e: i32, i: i32, h: i32) {
    for col in 0..8 {
        lf_one::<WD>(data, off + col, stride, e, i, h);
    }
}

fn lf16_col(data: &mut [u8], off: usize, stride: usize, e: i32, i: i32, h: i32) {
    for row in 0..16 {
        lf_one::<16>(data, off + row * stride, 1, e, i, h);
    }
}

fn lf16_row(data: &mut [u8], off: usize, stride: usize, e: i32, i: i32, h: i32) {
    for col in 0..16 {
        lf_one::<16>(data, off + col, stride, e, i, h);
    }
}

fn lf_mix2_col<const WD1: usize, const WD2: usize>(
    data: &mut [u8],
    off: usize,
    stride: usize,
    e: i32,
    i: i32,
    h: i32,
) {
    lf_col::<WD1>(data, off, stride, e & 0xff, i & 0xff, h & 0xff);
    lf_col::<WD2>(data, off + 8 * stride, stride, e >> 8, i >> 8, h >> 8);
}

fn lf_mix2_row<const WD1: usize, const WD2: usize>(
    data: &mut [u8],
    off: usize,
    stride: usize,
    e: i32,
    i: i32,
    h: i32,
) {
    lf_row::<WD1>(data, off, stride, e & 0xff, i & 0xff, h & 0xff);
    lf_row::<WD2>(data, off + 8, stride, e >> 8, i >> 8, h >> 8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_taps_sum_to_unity() {
        for bank in FILTERS.iter() {
            for taps in bank.iter() {
                assert_eq!(taps.iter().map(|&t| i32::from(t)).sum::<i32>(), 128);
            }
        }
    }

    #[test]
    fn dc_pred_averages_edges() {
        let mut dst = vec![0u8; 8 * 8];
        let left = [10u8; 4];
        let top = [30u8; 8];
        dc_pred::<4>(&mut dst, 0, 8, &left, &top, 0);
        assert_eq!(dst[0], 20);
        assert_eq!(dst[3 + 3 * 8], 20);
        assert_eq!(dst[4], 0); // untouched outside the block
    }

    #[test]
    fn tm_pred_clamps() {
        let mut dst = vec![0u8; 4 * 4];
        let left = [255u8, 0, 128, 128];
        let top = [255u8, 0, 128, 128, 0, 0, 0, 0];
        tm_pred::<4>(&mut dst, 0, 4, &left, &top, 128);
        assert_eq!(dst[0], 255); // 255 + 255 - 128 clamped
        assert_eq!(dst[1 + 4], 0); // 0 + 0 - 128 clamped
    }

    #[test]
    fn directional_predictors_stay_in_block() {
        // paint into a larger canvas and check nothing outside is written
        let left: Vec<u8> = (0..8).map(|v| 100 + v).collect();
        let top: Vec<u8> = (0..16).map(|v| 200u8.wrapping_sub(v)).collect();
        for mode in 0..N_INTRA_MODES {
            let mut dst = vec![1u8; 16 * 16];
            let f = Dsp::new().intra_pred[1][mode];
            f(&mut dst, 0, 16, &left, &top, 150);
            for r in 0..8 {
                for c in 8..16 {
                    assert_eq!(dst[r * 16 + c], 1, "mode {} wrote outside", mode);
                }
            }
            for r in 8..16 {
                for c in 0..16 {
                    assert_eq!(dst[r * 16 + c], 1, "mode {} wrote outside", mode);
                }
            }
        }
    }

    #[test]
    fn copy_and_avg_mc() {
        let src: Vec<u8> = (0..64).map(|v| v as u8).collect();
        let mut dst = vec![100u8; 64];
        mc_put_copy::<4, false>(&mut dst, 0, 8, &src, 0, 8, 4, 0, 0);
        assert_eq!(dst[0], 0);
        assert_eq!(dst[3 + 3 * 8], 27);
        let mut dst2 = vec![100u8; 64];
        mc_put_copy::<4, true>(&mut dst2, 0, 8, &src, 0, 8, 4, 0, 0);
        assert_eq!(dst2[0], 50);
    }

    #[test]
    fn full_pel_filter_phase_is_identity() {
        // phase 0 has a single 128 tap: filtering must equal copying
        let src: Vec<u8> = (0..256).map(|v| (v * 7 % 251) as u8).collect();
        let mut a = vec![0u8; 64];
        let mut b = vec![0u8; 64];
        let soff = 3 * 16 + 3;
        mc_filter::<4, 1, false, true, false>(&mut a, 0, 8, &src, soff, 16, 4, 0, 0);
        mc_put_copy::<4, false>(&mut b, 0, 8, &src, soff, 16, 4, 0, 0);
        assert_eq!(a[..4], b[..4]);
    }

    #[test]
    fn edge_emu_clamps_out_of_bounds() {
        let src: Vec<u8> = (0..16).map(|v| v as u8).collect();
        let mut dst = vec![0u8; 36];
        edge_emu_copy(&mut dst, 6, &src, 4, 6, 6, -1, -1, 4, 4);
        assert_eq!(dst[0], 0); // clamped to src[0][0]
        assert_eq!(dst[1], 0);
        assert_eq!(dst[2], 1);
        assert_eq!(dst[5 * 6 + 5], 15); // clamped to src[3][3]
    }

    #[test]
    fn loop_filter_leaves_flat_area_alone() {
        let mut data = vec![128u8; 16 * 16];
        lf_col::<4>(&mut data, 8, 16, 10, 5, 2);
        assert!(data.iter().all(|&v| v == 128));
    }

    #[test]
    fn loop_filter_smooths_step_edge() {
        // step edge straddling a column boundary at x = 8
        let mut data = vec![0u8; 24 * 24];
        for row in data.chunks_mut(24) {
            for (x, v) in row.iter_mut().enumerate() {
                *v = if x < 8 { 120 } else { 132 };
            }
        }
        lf_col::<4>(&mut data, 4 * 24 + 8, 24, 30, 10, 4);
        let r = &data[4 * 24..4 * 24 + 24];
        assert!(
            r[7] > 120 && r[8] < 132,
            "edge was not softened: {:?}",
            &r[4..12]
        );
    }

    #[test]
    fn wht_dc_only_offsets_block() {
        let mut dst = vec![100u8; 16];
        let mut coeffs = [0i32; 16];
        coeffs[0] = 64;
        iwht_add(&mut dst, 0, 4, &coeffs, 1);
        assert!(dst.iter().all(|&v| v == 104));
    }

    #[test]
    fn idct_dc_reconstructs_flat_block() {
        let mut dst = vec![0u8; 8 * 8];
        let mut coeffs = [0i32; 64];
        coeffs[0] = 1024;
        idct8x8_put(&mut dst, 0, 8, &coeffs);
        // 1024 scales to mid-gray through the two passes and the final shift
        assert!(dst.iter().all(|&v| (127..=129).contains(&v)), "{:?}", &dst[..8]);
    }
}
