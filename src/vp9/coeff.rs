//! Coefficient decode: the end-of-block / zero / magnitude cascade with its
//! band and nonzero-neighbor contexts, plus dequantization.

use crate::rac::RangeCoder;
use crate::vp9::block::TileDecoder;
use crate::vp9::data;
use crate::vp9::prob::CoefCascade;
use crate::vp9::{Block, BlockSize};
use crate::Result;

/// Decode one transform block worth of tokens. Returns the end-of-block
/// position (number of coded scan positions). `nnz` is the summed
/// above/left nonzero context; `qmul` is `[dc, ac]` after segment
/// adjustment.
#[allow(clippy::too_many_arguments)]
fn decode_block_coeffs(
    c: &mut RangeCoder,
    coef: &mut [i32],
    n_coeffs: usize,
    is_tx32: bool,
    probs: &mut CoefCascade,
    counts: &mut [[[u32; 3]; 6]; 6],
    eob_counts: &mut [[[u32; 2]; 6]; 6],
    nnz: usize,
    scan: &[i16],
    nb: &[[i16; 2]],
    band_counts: &[i16; 7],
    qmul: &[i16; 2],
) -> Result<usize> {
    let mut i = 0usize;
    let mut band = 0usize;
    let mut band_left = band_counts[0];
    let mut nnz = nnz;
    let mut cache = [0u8; 1024];

    'outer: while i < n_coeffs {
        let eob_bit = c.get_prob(probs[band][nnz][0]);
        eob_counts[band][nnz][eob_bit as usize] += 1;
        if eob_bit == 0 {
            break;
        }

        // run of zero coefficients, no end-of-block checks in between
        while c.get_prob(probs[band][nnz][1]) == 0 {
            counts[band][nnz][0] += 1;
            band_left -= 1;
            if band_left == 0 {
                band += 1;
                band_left = band_counts[band];
            }
            cache[scan[i] as usize] = 0;
            nnz = (1 + usize::from(cache[nb[i][0] as usize]) + usize::from(cache[nb[i][1] as usize]))
                >> 1;
            i += 1;
            if i == n_coeffs {
                // blocks must end with an explicit end-of-block
                break 'outer;
            }
        }

        let rc = scan[i] as usize;
        let val;
        if c.get_prob(probs[band][nnz][2]) == 0 {
            counts[band][nnz][1] += 1;
            val = 1;
            cache[rc] = 1;
        } else {
            counts[band][nnz][2] += 1;
            // lazily expand the magnitude cascade from the three-node model
            if probs[band][nnz][3] == 0 {
                let row = &data::MODEL_PARETO8[probs[band][nnz][2] as usize];
                probs[band][nnz][3..11].copy_from_slice(row);
            }
            let tp = probs[band][nnz];
            if c.get_prob(tp[3]) == 0 {
                // tokens two to four
                if c.get_prob(tp[4]) == 0 {
                    cache[rc] = 2;
                    val = 2;
                } else {
                    val = 3 + c.get_prob(tp[5]);
                    cache[rc] = 3;
                }
            } else if c.get_prob(tp[6]) == 0 {
                cache[rc] = 4;
                if c.get_prob(tp[7]) == 0 {
                    val = 5 + c.get_prob(159);
                } else {
                    val = 7 + (c.get_prob(165) << 1) + c.get_prob(145);
                }
            } else {
                cache[rc] = 5;
                if c.get_prob(tp[8]) == 0 {
                    if c.get_prob(tp[9]) == 0 {
                        let mut v = 11 + (c.get_prob(173) << 2);
                        v += c.get_prob(148) << 1;
                        v += c.get_prob(140);
                        val = v;
                    } else {
                        let mut v = 19 + (c.get_prob(176) << 3);
                        v += c.get_prob(155) << 2;
                        v += c.get_prob(140) << 1;
                        v += c.get_prob(135);
                        val = v;
                    }
                } else if c.get_prob(tp[10]) == 0 {
                    let mut v = 35 + (c.get_prob(180) << 4);
                    v += c.get_prob(157) << 3;
                    v += c.get_prob(141) << 2;
                    v += c.get_prob(134) << 1;
                    v += c.get_prob(130);
                    val = v;
                } else {
                    let mut v = 67 + (c.get_prob(254) << 13);
                    v += c.get_prob(254) << 12;
                    v += c.get_prob(254) << 11;
                    v += c.get_prob(252) << 10;
                    v += c.get_prob(249) << 9;
                    v += c.get_prob(243) << 8;
                    v += c.get_prob(230) << 7;
                    v += c.get_prob(196) << 6;
                    v += c.get_prob(177) << 5;
                    v += c.get_prob(153) << 4;
                    v += c.get_prob(140) << 3;
                    v += c.get_prob(133) << 2;
                    v += c.get_prob(130) << 1;
                    v += c.get_prob(129);
                    val = v;
                }
            }
        }
        band_left -= 1;
        if band_left == 0 {
            band += 1;
            band_left = band_counts[band];
        }
        let signed = if c.get() != 0 {
            -(val as i32)
        } else {
            val as i32
        };
        let q = i32::from(qmul[usize::from(i != 0)]);
        coef[rc] = if is_tx32 {
            (signed * q) / 2
        } else {
            signed * q
        };
        nnz =
            (1 + usize::from(cache[nb[i][0] as usize]) + usize::from(cache[nb[i][1] as usize])) >> 1;
        i += 1;
    }

    Ok(i)
}

impl<'a, 'd> TileDecoder<'a, 'd> {
    /// Decode all transform blocks of one leaf block, luma then both chroma
    /// planes, maintaining the nonzero-context strips as it goes.
    pub(crate) fn decode_coeffs_for_block(&mut self, b: &Block) -> Result<()> {
        let (row, col) = (b.row, b.col);
        let (bw4, bh4) = b.bs.wh8();
        let w4 = bw4 * 2; // 4x4 units
        let h4 = bh4 * 2;
        let end_x = (2 * (self.cols - col)).min(w4);
        let end_y = (2 * (self.rows - row)).min(h4);
        let step1d = 1 << b.tx;
        let step = step1d * step1d;
        let qmul = self.hdr.seg.feat[b.seg_id].qmul;
        let lossless = self.hdr.lossless;
        let intra = b.intra;
        let sub8 = b.bs > BlockSize::B8x8;

        let y_band_counts = &data::BAND_COUNTS[b.tx];
        let uv_band_counts = &data::BAND_COUNTS[b.uvtx];

        // luma
        {
            let a_base = col * 2;
            let l_base = (row & 7) << 1;
            if b.tx > 0 {
                // merge the nonzero flags of the finer grid into the
                // transform-sized one
                for y in (0..end_y).step_by(step1d) {
                    for x in 1..step1d {
                        self.left.y_nnz[l_base + y] |= self.left.y_nnz[l_base + y + x];
                    }
                }
                for x in (0..end_x).step_by(step1d) {
                    for y in 1..step1d {
                        self.above.y_nnz[a_base + x] |= self.above.y_nnz[a_base + x + y];
                    }
                }
            }
            let mut n = 0usize;
            for y in (0..end_y).step_by(step1d) {
                for x in (0..end_x).step_by(step1d) {
                    let txtp = if lossless {
                        0
                    } else {
                        data::INTRA_TXFM_TYPE
                            [b.mode[if b.tx == 0 && sub8 { n.min(3) } else { 0 }] as usize]
                            as usize
                    };
                    let set = &data::SCANS[b.tx][txtp];
                    let nnz = usize::from(self.above.y_nnz[a_base + x])
                        + usize::from(self.left.y_nnz[l_base + y]);
                    let eob = decode_block_coeffs(
                        self.c,
                        &mut self.bufs.coef_y[16 * n..],
                        16 * step,
                        b.tx == 3,
                        &mut self.probs.coef[b.tx][0][usize::from(!intra)],
                        &mut self.counts.coef[b.tx][0][usize::from(!intra)],
                        &mut self.counts.eob[b.tx][0][usize::from(!intra)],
                        nnz,
                        &set.scan,
                        &set.nb,
                        y_band_counts,
                        &qmul[0],
                    )?;
                    self.above.y_nnz[a_base + x] = u8::from(eob > 0);
                    self.left.y_nnz[l_base + y] = u8::from(eob > 0);
                    self.bufs.eob_y[n] = eob as u16;
                    n += step;
                }
            }
            if b.tx > 0 {
                // spread the merged flags back over the finer grid
                for y in (0..end_y).step_by(step1d) {
                    let v = self.left.y_nnz[l_base + y];
                    for x in 1..step1d.min(end_y - y) {
                        self.left.y_nnz[l_base + y + x] = v;
                    }
                }
                for x in (0..end_x).step_by(step1d) {
                    let v = self.above.y_nnz[a_base + x];
                    for y in 1..step1d.min(end_x - x) {
                        self.above.y_nnz[a_base + x + y] = v;
                    }
                }
            }
        }

        // chroma
        let uvstep1d = 1 << b.uvtx;
        let uvstep = uvstep1d * uvstep1d;
        let end_x = end_x >> 1;
        let end_y = end_y >> 1;
        let uvset = &data::SCANS[b.uvtx][0];
        for pl in 0..2 {
            let a_base = col;
            let l_base = row & 7;
            if b.uvtx > 0 {
                for y in (0..end_y).step_by(uvstep1d) {
                    for x in 1..uvstep1d {
                        self.left.uv_nnz[pl][l_base + y] |= self.left.uv_nnz[pl][l_base + y + x];
                    }
                }
                for x in (0..end_x).step_by(uvstep1d) {
                    for y in 1..uvstep1d {
                        self.above.uv_nnz[pl][a_base + x] |= self.above.uv_nnz[pl][a_base + x + y];
                    }
                }
            }
            let mut n = 0usize;
            for y in (0..end_y).step_by(uvstep1d) {
                for x in (0..end_x).step_by(uvstep1d) {
                    let nnz = usize::from(self.above.uv_nnz[pl][a_base + x])
                        + usize::from(self.left.uv_nnz[pl][l_base + y]);
                    let eob = decode_block_coeffs(
                        self.c,
                        &mut self.bufs.coef_uv[pl][16 * n..],
                        16 * uvstep,
                        b.uvtx == 3,
                        &mut self.probs.coef[b.uvtx][1][usize::from(!intra)],
                        &mut self.counts.coef[b.uvtx][1][usize::from(!intra)],
                        &mut self.counts.eob[b.uvtx][1][usize::from(!intra)],
                        nnz,
                        &uvset.scan,
                        &uvset.nb,
                        uv_band_counts,
                        &qmul[1],
                    )?;
                    self.above.uv_nnz[pl][a_base + x] = u8::from(eob > 0);
                    self.left.uv_nnz[pl][l_base + y] = u8::from(eob > 0);
                    self.bufs.eob_uv[pl][n] = eob as u16;
                    n += uvstep;
                }
            }
            if b.uvtx > 0 {
                for y in (0..end_y).step_by(uvstep1d) {
                    let v = self.left.uv_nnz[pl][l_base + y];
                    for x in 1..uvstep1d.min(end_y - y) {
                        self.left.uv_nnz[pl][l_base + y + x] = v;
                    }
                }
                for x in (0..end_x).step_by(uvstep1d) {
                    let v = self.above.uv_nnz[pl][a_base + x];
                    for y in 1..uvstep1d.min(end_x - x) {
                        self.above.uv_nnz[pl][a_base + x + y] = v;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vp9::prob::FrameContext;

    /// An all-zero input stream decodes a 0 at every probability, so the
    /// very first end-of-block read terminates the block.
    #[test]
    fn immediate_eob_leaves_coefficients_zero() {
        let ctx = FrameContext::default();
        let mut probs = crate::vp9::prob::FrameProbs::from_context(&ctx);
        let mut counts = [[[0u32; 3]; 6]; 6];
        let mut eobs = [[[0u32; 2]; 6]; 6];
        let mut coef = [0i32; 16];
        let data = [0u8; 8];
        let mut c = RangeCoder::new(&data);
        let set = &data::SCANS[0][0];
        let eob = decode_block_coeffs(
            &mut c,
            &mut coef,
            16,
            false,
            &mut probs.coef[0][0][0],
            &mut counts,
            &mut eobs,
            0,
            &set.scan,
            &set.nb,
            &data::BAND_COUNTS[0],
            &[8, 8],
        )
        .unwrap();
        assert_eq!(eob, 0);
        assert!(coef.iter().all(|&v| v == 0));
        assert_eq!(eobs[0][0][0], 1);
        assert_eq!(counts.iter().flatten().flatten().sum::<u32>(), 0);
    }

    #[test]
    fn band_counts_cover_whole_blocks() {
        for (tx, bands) in data::BAND_COUNTS.iter().enumerate() {
            let total: i32 = bands.iter().map(|&b| i32::from(b)).sum();
            assert_eq!(total as usize, 16usize << (2 * tx));
        }
    }
}
