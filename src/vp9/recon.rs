//! Reconstruction: intra prediction with boundary fallbacks, motion
//! compensation (plain and scaled, with edge emulation and row-progress
//! gating), and the residual add.
//!
//! Blocks are reconstructed into the per-frame spill buffers and blitted
//! into the picture afterwards, which keeps edge overhang handling in one
//! place regardless of where the block sits.

use crate::dsp::{self, intra, Dsp};
use crate::pool::{CancelToken, Mv, Picture, Plane};
use crate::vp9::block::TileDecoder;
use crate::vp9::data;
use crate::vp9::header::RefScale;
use crate::vp9::{Block, BlockSize};
use crate::{Error, Result};

/// `(have_left, have_top)` to effective-mode fallbacks for the ten coded
/// intra modes.
const MODE_CONV: [[[usize; 2]; 2]; 10] = [
    [[intra::DC_127, intra::VERT], [intra::DC_127, intra::VERT]],
    [[intra::DC_129, intra::DC_129], [intra::HOR, intra::HOR]],
    [[intra::DC_128, intra::TOP_DC], [intra::LEFT_DC, intra::DC]],
    [
        [intra::DC_127, intra::DIAG_DOWN_LEFT],
        [intra::DC_127, intra::DIAG_DOWN_LEFT],
    ],
    [
        [intra::DIAG_DOWN_RIGHT, intra::DIAG_DOWN_RIGHT],
        [intra::DIAG_DOWN_RIGHT, intra::DIAG_DOWN_RIGHT],
    ],
    [
        [intra::VERT_RIGHT, intra::VERT_RIGHT],
        [intra::VERT_RIGHT, intra::VERT_RIGHT],
    ],
    [
        [intra::HOR_DOWN, intra::HOR_DOWN],
        [intra::HOR_DOWN, intra::HOR_DOWN],
    ],
    [
        [intra::DC_127, intra::VERT_LEFT],
        [intra::DC_127, intra::VERT_LEFT],
    ],
    [[intra::DC_129, intra::DC_129], [intra::HOR_UP, intra::HOR_UP]],
    [[intra::DC_129, intra::VERT], [intra::HOR, intra::TM]],
];

struct EdgeNeeds {
    left: bool,
    top: bool,
    topleft: bool,
    topright: bool,
}

const fn needs(left: bool, top: bool, topleft: bool, topright: bool) -> EdgeNeeds {
    EdgeNeeds {
        left,
        top,
        topleft,
        topright,
    }
}

const EDGES: [EdgeNeeds; 15] = [
    needs(false, true, false, false),  // vert
    needs(true, false, false, false),  // hor
    needs(true, true, false, false),   // dc
    needs(false, true, false, true),   // diag down-left
    needs(true, true, true, false),    // diag down-right
    needs(true, true, true, false),    // vert-right
    needs(true, true, true, false),    // hor-down
    needs(false, true, false, true),   // vert-left
    needs(true, false, false, false),  // hor-up
    needs(true, true, true, false),    // tm
    needs(true, false, false, false),  // left dc
    needs(false, true, false, false),  // top dc
    needs(false, false, false, false), // dc 128
    needs(false, false, false, false), // dc 127
    needs(false, false, false, false), // dc 129
];

#[inline]
fn rounded_div4(v: i32) -> i16 {
    let biased = if v >= 0 { v + 2 } else { v - 2 };
    (biased / 4) as i16
}

impl<'a, 'd> TileDecoder<'a, 'd> {
    /// Intra path: per transform block, resolve the effective mode against
    /// the available edges, gather the top/left samples, predict, then add
    /// the residual.
    pub(crate) fn intra_recon(&mut self, b: &Block) -> Result<()> {
        let (row, col) = (b.row, b.col);
        let sub8 = b.bs > BlockSize::B8x8;
        let (bw4, bh4) = b.bs.wh8();
        let lossless = self.hdr.lossless;

        for pl in 0..3 {
            let luma = pl == 0;
            let tx = if luma { b.tx } else { b.uvtx };
            let step1d = 1 << tx;
            let step = step1d * step1d;
            let sub = usize::from(!luma);
            let w4 = (bw4 * 2) >> sub;
            let h4 = (bh4 * 2) >> sub;
            let end_x = ((2 * (self.cols - col)) >> sub).min(w4);
            let end_y = ((2 * (self.rows - row)) >> sub).min(h4);
            let tstride = if luma { 64 } else { 32 };
            let tx_table = if lossless { 4 } else { tx };
            let plane = &self.cur.planes[pl];
            let (tmp, coef, eobs) = if luma {
                (
                    &mut self.bufs.tmp_y,
                    &mut self.bufs.coef_y,
                    &self.bufs.eob_y[..],
                )
            } else {
                (
                    &mut self.bufs.tmp_uv[pl - 1],
                    &mut self.bufs.coef_uv[pl - 1],
                    &self.bufs.eob_uv[pl - 1][..],
                )
            };

            let mut n = 0usize;
            for y in (0..end_y).step_by(step1d) {
                for x in (0..end_x).step_by(step1d) {
                    let mode = if luma {
                        b.mode[if sub8 && tx == 0 { y * 2 + x } else { 0 }]
                    } else {
                        b.uvmode
                    } as usize;
                    let txtp = if luma && !lossless {
                        data::INTRA_TXFM_TYPE[mode] as usize
                    } else {
                        0
                    };

                    let have_top = row > 0 || y > 0;
                    let have_left = col > self.tile_col_start || x > 0;
                    let have_right = x < w4 - 1;
                    let mode = MODE_CONV[mode][usize::from(have_left)][usize::from(have_top)];
                    let e = &EDGES[mode];

                    let size = 4usize << tx;
                    let px = ((col << 3) >> sub) + x * 4;
                    let py = ((row << 3) >> sub) + y * 4;
                    let toff = (y * 4) * tstride + x * 4;

                    let mut top = [0x7fu8; 64];
                    let mut left = [0x81u8; 32];
                    let mut tl = if have_top { 0x81 } else { 0x7f };

                    if (e.top || e.topleft || e.topright) && have_top {
                        // at the top of a superblock row the samples come
                        // from the saved pre-loopfilter row
                        let sb_top = (row & 7) == 0 && y == 0;
                        let avail = (((self.cols - col) << (1 - sub)) - x) * 4;
                        let fetch = |i: usize| -> u8 {
                            if sb_top {
                                self.intra_pred_rows[pl]
                                    [(px + i).min(self.intra_pred_rows[pl].len() - 1)]
                            } else if y == 0 {
                                plane.row(py - 1)[(px + i).min(plane.width() - 1)]
                            } else {
                                tmp[toff - tstride + i]
                            }
                        };
                        let take = size.min(avail);
                        for (i, t) in top.iter_mut().enumerate().take(take) {
                            *t = fetch(i);
                        }
                        for i in take..size {
                            top[i] = top[take - 1];
                        }
                        if tx == 0 && e.topright && have_right && size + 4 <= avail {
                            for i in size..size + 4 {
                                top[i] = fetch(i);
                            }
                            for i in size + 4..2 * size {
                                top[i] = top[size + 3];
                            }
                        } else {
                            for i in size..2 * size {
                                top[i] = top[size - 1];
                            }
                        }
                        if e.topleft {
                            tl = if have_left {
                                if sb_top {
                                    self.intra_pred_rows[pl][px - 1]
                                } else if y == 0 || x == 0 {
                                    plane.row(py - 1)[px - 1]
                                } else {
                                    tmp[toff - tstride - 1]
                                }
                            } else {
                                0x81
                            };
                        }
                    }

                    if e.left {
                        if have_left {
                            let avail = (((self.rows - row) << (1 - sub)) - y) * 4;
                            let n_have = avail.min(size);
                            for (i, l) in left.iter_mut().enumerate().take(n_have) {
                                *l = if x == 0 {
                                    plane.row((py + i).min(plane.height() - 1))[px - 1]
                                } else {
                                    tmp[toff + i * tstride - 1]
                                };
                            }
                            for i in n_have..size {
                                left[i] = left[n_have - 1];
                            }
                        }
                    }

                    self.dsp.intra_pred[tx][mode](tmp, toff, tstride, &left, &top, tl);

                    let eob = if b.skip { 0 } else { eobs[n] as usize };
                    if eob > 0 {
                        self.dsp.itxfm_add[tx_table][txtp](
                            tmp,
                            toff,
                            tstride,
                            &coef[16 * n..],
                            eob,
                        );
                        coef[16 * n..16 * n + 16 * step].fill(0);
                    }
                    n += step;
                }
            }
        }
        Ok(())
    }

    /// Inter path: motion compensation from one or two references with
    /// progress gating, then the residual add.
    pub(crate) fn inter_recon(&mut self, b: &Block) -> Result<()> {
        let (row, col) = (b.row, b.col);
        let sub8 = b.bs > BlockSize::B8x8;
        let (bw4, bh4) = b.bs.wh8();
        let bw = bw4 * 8;
        let bh = bh4 * 8;
        let by = row * 8;
        let bx = col * 8;

        const SIZE_IDX_Y: [usize; 13] = [0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 3, 3];
        const SIZE_IDX_UV: [usize; 13] = [1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4, 4];

        let n_refs = if b.comp { 2 } else { 1 };
        for r in 0..n_refs {
            let slot = b.refs[r];
            let refp = self.refs[slot]
                .as_deref()
                .ok_or(Error::RefUnavailable)?;
            let scale = &self.scales[slot];
            let avg = r == 1;

            // luma
            if sub8 {
                // quadrant motion compensation at 4-pel granularity
                let quads: &[(usize, usize, usize)] = match b.bs {
                    BlockSize::B8x4 => &[(0, 0, 0), (2, 0, 4)],
                    BlockSize::B4x8 => &[(0, 0, 0), (1, 4, 0)],
                    _ => &[(0, 0, 0), (1, 4, 0), (2, 0, 4), (3, 4, 4)],
                };
                let (qw, qh) = match b.bs {
                    BlockSize::B8x4 => (8, 4),
                    BlockSize::B4x8 => (4, 8),
                    _ => (4, 4),
                };
                let size_idx = if qw == 8 { 3 } else { 4 };
                for &(q, ox, oy) in quads {
                    mc_block(
                        self.dsp,
                        &mut self.bufs.tmp_y,
                        oy * 64 + ox,
                        64,
                        &mut self.bufs.edge_emu,
                        &refp.planes[0],
                        refp,
                        scale,
                        self.cancel,
                        (bx + ox) as i32,
                        (by + oy) as i32,
                        b.mv[q][r],
                        qw,
                        qh,
                        3,
                        size_idx,
                        b.filter_bank,
                        avg,
                    )?;
                }
            } else {
                mc_block(
                    self.dsp,
                    &mut self.bufs.tmp_y,
                    0,
                    64,
                    &mut self.bufs.edge_emu,
                    &refp.planes[0],
                    refp,
                    scale,
                    self.cancel,
                    bx as i32,
                    by as i32,
                    b.mv[0][r],
                    bw,
                    bh,
                    3,
                    SIZE_IDX_Y[b.bs.idx()],
                    b.filter_bank,
                    avg,
                )?;
            }

            // chroma, with the averaged vector for sub-8x8 blocks
            let mvuv = if sub8 {
                Mv {
                    x: rounded_div4(
                        i32::from(b.mv[0][r].x)
                            + i32::from(b.mv[1][r].x)
                            + i32::from(b.mv[2][r].x)
                            + i32::from(b.mv[3][r].x),
                    ),
                    y: rounded_div4(
                        i32::from(b.mv[0][r].y)
                            + i32::from(b.mv[1][r].y)
                            + i32::from(b.mv[2][r].y)
                            + i32::from(b.mv[3][r].y),
                    ),
                }
            } else {
                b.mv[0][r]
            };
            for pl in 0..2 {
                mc_block(
                    self.dsp,
                    &mut self.bufs.tmp_uv[pl],
                    0,
                    32,
                    &mut self.bufs.edge_emu,
                    &refp.planes[1 + pl],
                    refp,
                    scale,
                    self.cancel,
                    (bx / 2) as i32,
                    (by / 2) as i32,
                    mvuv,
                    bw / 2,
                    bh / 2,
                    4,
                    SIZE_IDX_UV[b.bs.idx()],
                    b.filter_bank,
                    avg,
                )?;
            }
        }

        if !b.skip {
            let lossless = self.hdr.lossless;
            let tx_table = if lossless { 4 } else { b.tx };
            let uvtx_table = if lossless { 4 } else { b.uvtx };
            // y residual
            {
                let step1d = 1 << b.tx;
                let step = step1d * step1d;
                let end_x = (2 * (self.cols - col)).min(bw4 * 2);
                let end_y = (2 * (self.rows - row)).min(bh4 * 2);
                let mut n = 0usize;
                for y in (0..end_y).step_by(step1d) {
                    for x in (0..end_x).step_by(step1d) {
                        let eob = self.bufs.eob_y[n] as usize;
                        if eob > 0 {
                            let toff = y * 4 * 64 + x * 4;
                            self.dsp.itxfm_add[tx_table][0](
                                &mut self.bufs.tmp_y,
                                toff,
                                64,
                                &self.bufs.coef_y[16 * n..],
                                eob,
                            );
                            self.bufs.coef_y[16 * n..16 * n + 16 * step].fill(0);
                        }
                        n += step;
                    }
                }
            }
            // uv residual
            let uvstep1d = 1 << b.uvtx;
            let uvstep = uvstep1d * uvstep1d;
            let end_x = ((self.cols - col)).min(bw4);
            let end_y = ((self.rows - row)).min(bh4);
            for pl in 0..2 {
                let mut n = 0usize;
                for y in (0..end_y).step_by(uvstep1d) {
                    for x in (0..end_x).step_by(uvstep1d) {
                        let eob = self.bufs.eob_uv[pl][n] as usize;
                        if eob > 0 {
                            let toff = y * 4 * 32 + x * 4;
                            self.dsp.itxfm_add[uvtx_table][0](
                                &mut self.bufs.tmp_uv[pl],
                                toff,
                                32,
                                &self.bufs.coef_uv[pl][16 * n..],
                                eob,
                            );
                            self.bufs.coef_uv[pl][16 * n..16 * n + 16 * uvstep].fill(0);
                        }
                        n += uvstep;
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy the visible part of the reconstructed block from the spill
    /// buffers into the picture planes.
    pub(crate) fn blit_block(&mut self, b: &Block) {
        let (bw4, bh4) = b.bs.wh8();
        for pl in 0..3 {
            let sub = usize::from(pl > 0);
            let (tmp, tstride): (&[u8], usize) = if pl == 0 {
                (&self.bufs.tmp_y, 64)
            } else {
                (&self.bufs.tmp_uv[pl - 1], 32)
            };
            let plane = &mut self.cur.planes[pl];
            let px = (b.col << 3) >> sub;
            let py = (b.row << 3) >> sub;
            if px >= plane.width() || py >= plane.height() {
                continue;
            }
            let w = ((bw4 << 3) >> sub).min(plane.width() - px);
            let h = ((bh4 << 3) >> sub).min(plane.height() - py);
            let stride = plane.stride();
            let data = plane.data_mut();
            for y in 0..h {
                let dst = (py + y) * stride + px;
                data[dst..dst + w].copy_from_slice(&tmp[y * tstride..y * tstride + w]);
            }
        }
    }
}

/// Motion-compensate one rectangle from a reference plane into a spill
/// buffer, waiting on the producer's row progress first and falling back to
/// the edge-emulation scratch when the filter footprint leaves the picture.
#[allow(clippy::too_many_arguments)]
fn mc_block(
    dsp: &Dsp,
    dst: &mut [u8],
    doff: usize,
    dstride: usize,
    edge_emu: &mut [u8],
    plane: &Plane,
    refp: &Picture,
    scale: &RefScale,
    cancel: &CancelToken,
    bx: i32,
    by: i32,
    mv: Mv,
    bw: usize,
    bh: usize,
    subpel_bits: u32,
    size_idx: usize,
    bank: usize,
    avg: bool,
) -> Result<()> {
    if scale.scaled {
        return mc_block_scaled(
            dsp, dst, doff, dstride, edge_emu, plane, refp, scale, cancel, bx, by, mv, bw, bh,
            subpel_bits, bank, avg,
        );
    }

    let mask = (1i32 << subpel_bits) - 1;
    let x = bx + (i32::from(mv.x) >> subpel_bits);
    let y = by + (i32::from(mv.y) >> subpel_bits);
    let mx = (i32::from(mv.x) & mask) as usize;
    let my = (i32::from(mv.y) & mask) as usize;
    let w = plane.width();
    let h = plane.height();

    // the next superblock row's loop filter can still touch the last seven
    // rows, hence the extra margin on the wait
    let th = y + bh as i32 + 4 * i32::from(my != 0) + 7;
    let th = (th.max(0) as u32) << usize::from(refp.planes[0].height() > h);
    refp.progress().wait_for(th, 0, cancel)?;

    let need_x = usize::from(mx != 0) * 3;
    let need_y = usize::from(my != 0) * 3;
    let post_x = usize::from(mx != 0) * 4;
    let post_y = usize::from(my != 0) * 4;

    let (src, soff, sstride): (&[u8], usize, usize) = if x < need_x as i32
        || y < need_y as i32
        || x + (bw + post_x) as i32 > w as i32
        || y + (bh + post_y) as i32 > h as i32
    {
        let ew = bw + usize::from(mx != 0) * 7;
        let eh = bh + usize::from(my != 0) * 7;
        dsp::edge_emu_copy(
            edge_emu,
            80,
            plane.data(),
            plane.stride(),
            ew,
            eh,
            x as isize - need_x as isize,
            y as isize - need_y as isize,
            w,
            h,
        );
        (edge_emu, need_y * 80 + need_x, 80)
    } else {
        (
            plane.data(),
            y as usize * plane.stride() + x as usize,
            plane.stride(),
        )
    };

    // phases are passed in 1/16 units; eighth-pel luma scales by two
    let shift = 4 - subpel_bits;
    dsp.mc[size_idx][bank][usize::from(avg)][usize::from(mx != 0)][usize::from(my != 0)](
        dst,
        doff,
        dstride,
        src,
        soff,
        sstride,
        bh,
        mx << shift,
        my << shift,
    );
    Ok(())
}

/// The scaled variant: fixed-point source coordinates advance by the
/// per-axis step, and every position carries its own sub-pel phase.
#[allow(clippy::too_many_arguments)]
fn mc_block_scaled(
    dsp: &Dsp,
    dst: &mut [u8],
    doff: usize,
    dstride: usize,
    edge_emu: &mut [u8],
    plane: &Plane,
    refp: &Picture,
    scale: &RefScale,
    cancel: &CancelToken,
    bx: i32,
    by: i32,
    mv: Mv,
    bw: usize,
    bh: usize,
    subpel_bits: u32,
    bank: usize,
    avg: bool,
) -> Result<()> {
    // start position in the reference, 1/16-pel
    let mv_shift = 4 - subpel_bits;
    let cur_x16 = (i64::from(bx) << 4) + (i64::from(mv.x) << mv_shift);
    let cur_y16 = (i64::from(by) << 4) + (i64::from(mv.y) << mv_shift);
    let sx16 = (cur_x16 * i64::from(scale.scale[0])) >> 16;
    let sy16 = (cur_y16 * i64::from(scale.scale[1])) >> 16;
    let stepx = usize::from(scale.step[0]);
    let stepy = usize::from(scale.step[1]);

    let w = plane.width();
    let h = plane.height();
    let last_y16 = sy16 + ((bh - 1) * stepy) as i64;
    let th = ((last_y16 >> 4) + 4 + 7).max(0) as u32;
    refp.progress().wait_for(th, 0, cancel)?;

    let x0 = (sx16 >> 4) - 3;
    let y0 = (sy16 >> 4) - 3;
    let x1 = ((sx16 + ((bw - 1) * stepx) as i64) >> 4) + 5;
    let y1 = (last_y16 >> 4) + 5;

    if x0 < 0 || y0 < 0 || x1 > w as i64 || y1 > h as i64 {
        let ew = (x1 - x0) as usize;
        let eh = (y1 - y0) as usize;
        dsp::edge_emu_copy(
            edge_emu,
            288,
            plane.data(),
            plane.stride(),
            ew.min(288),
            eh.min(144),
            x0 as isize,
            y0 as isize,
            w,
            h,
        );
        let rel_x16 = (sx16 - (x0 << 4)) as u32;
        let rel_y16 = (sy16 - (y0 << 4)) as u32;
        dsp::mc_scaled(
            dst, doff, dstride, edge_emu, 288, bw, bh, rel_x16, rel_y16, stepx, stepy, bank, avg,
        );
    } else {
        dsp::mc_scaled(
            dst,
            doff,
            dstride,
            plane.data(),
            plane.stride(),
            bw,
            bh,
            sx16 as u32,
            sy16 as u32,
            stepx,
            stepy,
            bank,
            avg,
        );
    }
    Ok(())
}
