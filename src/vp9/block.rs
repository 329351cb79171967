//! Block engine: partition recursion, per-block mode decode, and the
//! above/left context strips that tie neighboring blocks together.

use std::sync::Arc;

use crate::dsp::Dsp;
use crate::pool::{CancelToken, Mv, Picture};
use crate::rac::RangeCoder;
use crate::vp9::data;
use crate::vp9::header::{FrameHeader, RefScale};
use crate::vp9::lpf::{self, LoopFilterMasks};
use crate::vp9::prob::{Counts, FrameProbs};
use crate::vp9::{
    Block, BlockPartition, BlockSize, Bufs, CompPredMode, FilterMode, TxfmMode, BL_8X8,
};
use crate::Result;

/// Partition-context bit patterns written per block size; one bit per
/// partition level, high bit = 64x64.
const PARTITION_LEFT_CTX: [u8; 13] = [
    0x0, 0x8, 0x0, 0x8, 0xc, 0x8, 0xc, 0xe, 0xc, 0xe, 0xf, 0xe, 0xf,
];
const PARTITION_ABOVE_CTX: [u8; 13] = [
    0x0, 0x0, 0x8, 0x8, 0x8, 0xc, 0xc, 0xc, 0xe, 0xe, 0xe, 0xf, 0xf,
];

/// Largest transform size a block size admits.
const MAX_TX_FOR_BS: [usize; 13] = [3, 3, 3, 3, 2, 2, 2, 1, 1, 1, 0, 0, 0];

/// Above-context strips, one entry per 8x8 column unit (two for the mode,
/// nnz and MV strips which work in 4x4 units).
#[derive(Default)]
pub(crate) struct AboveContext {
    pub partition: Vec<u8>,
    pub skip: Vec<u8>,
    pub txfm: Vec<u8>,
    pub mode: Vec<u8>,
    pub y_nnz: Vec<u8>,
    pub uv_nnz: [Vec<u8>; 2],
    pub segpred: Vec<u8>,
    pub intra: Vec<u8>,
    pub comp: Vec<u8>,
    pub ref_idx: Vec<u8>,
    pub filter: Vec<u8>,
    pub mv: Vec<[Mv; 2]>,
}

impl AboveContext {
    pub fn alloc(&mut self, sb_cols: usize) {
        let n = sb_cols * 8;
        self.partition = vec![0; n];
        self.skip = vec![0; n];
        self.txfm = vec![0; n];
        self.mode = vec![0; 2 * n];
        self.y_nnz = vec![0; 2 * n];
        self.uv_nnz = [vec![0; n], vec![0; n]];
        self.segpred = vec![0; n];
        self.intra = vec![0; n];
        self.comp = vec![0; n];
        self.ref_idx = vec![0; n];
        self.filter = vec![0; n];
        self.mv = vec![[Mv::default(); 2]; 2 * n];
    }

    /// Frame-start reset; strips are re-zeroed here and only written by the
    /// tile whose columns cover them afterwards.
    pub fn reset(&mut self, cols: usize, sb_cols: usize, intra_frame: bool) {
        self.partition.fill(0);
        self.skip.fill(0);
        self.segpred.fill(0);
        self.y_nnz[..sb_cols * 16].fill(0);
        self.uv_nnz[0][..sb_cols * 8].fill(0);
        self.uv_nnz[1][..sb_cols * 8].fill(0);
        if intra_frame {
            self.mode[..cols * 2].fill(data::DC_PRED);
        } else {
            self.mode[..cols].fill(data::NEARESTMV);
        }
    }
}

/// Left-context strips, valid within one superblock row of one tile.
#[derive(Clone)]
pub(crate) struct LeftContext {
    pub partition: [u8; 8],
    pub mode: [u8; 16],
    pub y_nnz: [u8; 16],
    pub uv_nnz: [[u8; 8]; 2],
    pub skip: [u8; 8],
    pub txfm: [u8; 8],
    pub segpred: [u8; 8],
    pub intra: [u8; 8],
    pub comp: [u8; 8],
    pub ref_idx: [u8; 8],
    pub filter: [u8; 8],
    pub mv: [[Mv; 2]; 16],
}

impl Default for LeftContext {
    fn default() -> Self {
        LeftContext {
            partition: [0; 8],
            mode: [0; 16],
            y_nnz: [0; 16],
            uv_nnz: [[0; 8]; 2],
            skip: [0; 8],
            txfm: [0; 8],
            segpred: [0; 8],
            intra: [0; 8],
            comp: [0; 8],
            ref_idx: [0; 8],
            filter: [0; 8],
            mv: [[Mv::default(); 2]; 16],
        }
    }
}

impl LeftContext {
    pub fn reset(&mut self, intra_frame: bool) {
        *self = LeftContext::default();
        if intra_frame {
            self.mode = [data::DC_PRED; 16];
        } else {
            self.mode[..8].fill(data::NEARESTMV);
        }
    }
}

/// All the state one tile needs while decoding superblocks. Left context is
/// owned (tiles never share it); above context is borrowed and written only
/// within this tile's column range.
pub(crate) struct TileDecoder<'a, 'd> {
    pub c: &'a mut RangeCoder<'d>,
    pub probs: &'a mut FrameProbs,
    pub counts: &'a mut Counts,
    pub hdr: &'a FrameHeader,
    pub txfmmode: TxfmMode,
    pub comppredmode: CompPredMode,
    pub use_last_frame_mvs: bool,
    pub dsp: &'a Dsp,
    pub above: &'a mut AboveContext,
    pub left: LeftContext,
    pub cur: &'a mut Picture,
    pub prev: Option<&'a Picture>,
    pub refs: &'a [Option<Arc<Picture>>; 3],
    pub scales: &'a [RefScale; 3],
    pub intra_pred_rows: &'a [Vec<u8>; 3],
    pub lflvl: &'a mut Vec<LoopFilterMasks>,
    pub lim_lut: &'a mut [u8; 64],
    pub mblim_lut: &'a mut [u8; 64],
    pub cols: usize,
    pub rows: usize,
    pub sb_cols: usize,
    pub tile_col_start: usize,
    pub tile_col_end: usize,
    pub cancel: &'a CancelToken,
    pub bufs: &'a mut Bufs,
}

impl<'a, 'd> TileDecoder<'a, 'd> {
    fn intra_frame(&self) -> bool {
        self.hdr.keyframe || self.hdr.intraonly
    }

    /// Recursive partition decode for one (sub-)superblock at level `bl`.
    /// Out-of-picture quadrants are elided; at the edges the partition
    /// symbol collapses to the one-bit or implicit form.
    pub fn decode_sb(&mut self, row: usize, col: usize, bl: usize) -> Result<()> {
        let ctx = usize::from((self.above.partition[col] >> (3 - bl)) & 1)
            | usize::from(((self.left.partition[row & 7] >> (3 - bl)) & 1) << 1);
        let p = if self.intra_frame() {
            data::KF_PARTITION_PROBS[bl][ctx]
        } else {
            self.probs.p.partition[bl][ctx]
        };
        let hbs = 4 >> bl;

        let bp;
        if bl == BL_8X8 {
            bp = BlockPartition::from_index(self.c.get_tree(&data::PARTITION_TREE, &p));
            self.decode_block(row, col, bl, bp)?;
        } else if col + hbs < self.cols {
            if row + hbs < self.rows {
                bp = BlockPartition::from_index(self.c.get_tree(&data::PARTITION_TREE, &p));
                match bp {
                    BlockPartition::None => {
                        self.decode_block(row, col, bl, bp)?;
                    }
                    BlockPartition::Horizontal => {
                        self.decode_block(row, col, bl, bp)?;
                        self.decode_block(row + hbs, col, bl, bp)?;
                    }
                    BlockPartition::Vertical => {
                        self.decode_block(row, col, bl, bp)?;
                        self.decode_block(row, col + hbs, bl, bp)?;
                    }
                    BlockPartition::Split => {
                        self.decode_sb(row, col, bl + 1)?;
                        self.decode_sb(row, col + hbs, bl + 1)?;
                        self.decode_sb(row + hbs, col, bl + 1)?;
                        self.decode_sb(row + hbs, col + hbs, bl + 1)?;
                    }
                }
            } else if self.c.get_bool(p[1]) {
                bp = BlockPartition::Split;
                self.decode_sb(row, col, bl + 1)?;
                self.decode_sb(row, col + hbs, bl + 1)?;
            } else {
                bp = BlockPartition::Horizontal;
                self.decode_block(row, col, bl, bp)?;
            }
        } else if row + hbs < self.rows {
            if self.c.get_bool(p[2]) {
                bp = BlockPartition::Split;
                self.decode_sb(row, col, bl + 1)?;
                self.decode_sb(row + hbs, col, bl + 1)?;
            } else {
                bp = BlockPartition::Vertical;
                self.decode_block(row, col, bl, bp)?;
            }
        } else {
            bp = BlockPartition::Split;
            self.decode_sb(row, col, bl + 1)?;
        }
        self.counts.partition[bl][ctx][bp as usize] += 1;
        Ok(())
    }

    fn decode_block(
        &mut self,
        row: usize,
        col: usize,
        bl: usize,
        bp: BlockPartition,
    ) -> Result<()> {
        let bs = BlockSize::from_level_partition(bl, bp);
        let (w4, h4) = bs.wh8();
        let mut b = Block {
            row,
            col,
            row7: row & 7,
            seg_id: 0,
            intra: false,
            comp: false,
            refs: [0; 2],
            mode: [0; 4],
            uvmode: 0,
            skip: false,
            filter_bank: 0,
            mv: [[Mv::default(); 2]; 4],
            bs,
            tx: 0,
            uvtx: 0,
            bl,
            bp,
            min_mv: (
                -(128 + col as i32 * 64),
                -(128 + row as i32 * 64),
            ),
            max_mv: (
                128 + 64 * (self.cols as i32 - col as i32 - w4 as i32),
                128 + 64 * (self.rows as i32 - row as i32 - h4 as i32),
            ),
        };

        self.decode_mode(&mut b)?;
        b.uvtx = b.tx
            - usize::from(w4 * 2 == 1 << b.tx || h4 * 2 == 1 << b.tx);

        if !b.skip {
            self.decode_coeffs_for_block(&b)?;
        } else {
            let vis_w = (self.cols - col).min(w4);
            let vis_h = (self.rows - row).min(h4);
            self.above.y_nnz[col * 2..col * 2 + vis_w * 2].fill(0);
            self.left.y_nnz[(b.row7 << 1)..(b.row7 << 1) + vis_h * 2].fill(0);
            for pl in 0..2 {
                self.above.uv_nnz[pl][col..col + vis_w].fill(0);
                self.left.uv_nnz[pl][b.row7..b.row7 + vis_h].fill(0);
            }
        }

        if b.intra {
            self.intra_recon(&b)?;
        } else {
            self.inter_recon(&b)?;
        }
        self.blit_block(&b);

        // loop-filter level and edge masks for every covered 8x8 unit
        let lvl = self.hdr.seg.feat[b.seg_id].lflvl
            [if b.intra { 0 } else { b.refs[0] + 1 }]
            [usize::from(b.mode[3] != data::ZEROMV)];
        if self.hdr.filter.level > 0 && lvl > 0 {
            let x_end = (self.cols - col).min(w4);
            let y_end = (self.rows - row).min(h4);
            let skip_inter = !b.intra && b.skip;
            let masks = &mut self.lflvl[col >> 3];
            for y in 0..y_end {
                let o = ((row & 7) + y) * 8 + (col & 7);
                masks.level[o..o + x_end].fill(lvl);
            }
            lpf::mask_edges(masks, 0, row & 7, col & 7, x_end, y_end, 0, 0, b.tx, skip_inter);
            lpf::mask_edges(
                masks,
                1,
                row & 7,
                col & 7,
                x_end,
                y_end,
                if self.cols & 1 != 0 && col + w4 >= self.cols {
                    self.cols & 7
                } else {
                    0
                },
                if self.rows & 1 != 0 && row + h4 >= self.rows {
                    self.rows & 7
                } else {
                    0
                },
                b.uvtx,
                skip_inter,
            );

            if self.lim_lut[lvl as usize] == 0 {
                let sharp = i32::from(self.hdr.filter.sharpness);
                let mut limit = i32::from(lvl);
                if sharp > 0 {
                    limit >>= (sharp + 3) >> 2;
                    limit = limit.min(9 - sharp);
                }
                let limit = limit.max(1);
                self.lim_lut[lvl as usize] = limit as u8;
                self.mblim_lut[lvl as usize] = (2 * (i32::from(lvl) + 2) + limit) as u8;
            }
        }

        Ok(())
    }

    /// Mode decode for one leaf block: segment id, skip flag, intra/inter
    /// decision, transform size, then the intra modes or the reference/MV
    /// machinery, and finally the context strip updates.
    fn decode_mode(&mut self, b: &mut Block) -> Result<()> {
        let (row, col, row7) = (b.row, b.col, b.row7);
        let (bw4, bh4) = b.bs.wh8();
        let w4 = (self.cols - col).min(bw4);
        let h4 = (self.rows - row).min(bh4);
        let have_a = row > 0;
        let have_l = col > self.tile_col_start;
        let intra_frame = self.intra_frame();
        let seg = &self.hdr.seg;
        let mi_stride = self.cur.mi_stride();

        // segment id, either coded or spatially predicted from the previous
        // frame's map
        if !seg.enabled {
            b.seg_id = 0;
        } else if intra_frame {
            b.seg_id = if seg.update_map {
                self.c.get_tree(&data::SEGMENTATION_TREE, &self.probs.seg)
            } else {
                0
            };
        } else if !seg.update_map
            || (seg.temporal && {
                let ctx = usize::from(self.above.segpred[col]) + usize::from(self.left.segpred[row7]);
                self.c.get_bool(self.probs.seg_pred[ctx])
            })
        {
            if let Some(prev) = self.prev {
                prev.progress()
                    .wait_for(((row >> 3) << 3) as u32 * 8 + 7, 0, self.cancel)?;
                let mut pred = 7;
                for y in 0..h4 {
                    for x in 0..w4 {
                        pred = pred.min(prev.seg_map[(row + y) * mi_stride + col + x]);
                    }
                }
                b.seg_id = pred as usize;
            } else {
                b.seg_id = 0;
            }
            self.above.segpred[col..col + w4].fill(1);
            self.left.segpred[row7..row7 + h4].fill(1);
        } else {
            b.seg_id = self.c.get_tree(&data::SEGMENTATION_TREE, &self.probs.seg);
            self.above.segpred[col..col + w4].fill(0);
            self.left.segpred[row7..row7 + h4].fill(0);
        }
        for y in 0..h4 {
            let o = (row + y) * mi_stride + col;
            self.cur.seg_map[o..o + w4].fill(b.seg_id as u8);
        }

        // skip flag
        b.skip = seg.enabled && seg.feat[b.seg_id].skip_enabled;
        if !b.skip {
            let ctx = usize::from(self.left.skip[row7]) + usize::from(self.above.skip[col]);
            b.skip = self.c.get_bool(self.probs.p.skip[ctx]);
            self.counts.skip[ctx][b.skip as usize] += 1;
        }

        // intra/inter
        if intra_frame {
            b.intra = true;
        } else if seg.feat[b.seg_id].ref_enabled {
            b.intra = seg.feat[b.seg_id].ref_val == 0;
        } else {
            let ctx = if have_a && have_l {
                let c = usize::from(self.above.intra[col]) + usize::from(self.left.intra[row7]);
                c + usize::from(c == 2)
            } else if have_a {
                2 * usize::from(self.above.intra[col])
            } else if have_l {
                2 * usize::from(self.left.intra[row7])
            } else {
                0
            };
            let bit = self.c.get_prob(self.probs.p.intra[ctx]);
            self.counts.intra[ctx][bit as usize] += 1;
            b.intra = bit == 0;
        }

        // transform size
        let max_tx = MAX_TX_FOR_BS[b.bs.idx()];
        if (b.intra || !b.skip) && self.txfmmode == TxfmMode::Switchable {
            let ctx = if have_a {
                let above = if self.above.skip[col] != 0 {
                    max_tx
                } else {
                    usize::from(self.above.txfm[col])
                };
                if have_l {
                    let leftv = if self.left.skip[row7] != 0 {
                        max_tx
                    } else {
                        usize::from(self.left.txfm[row7])
                    };
                    usize::from(above + leftv > max_tx)
                } else {
                    usize::from(if self.above.skip[col] != 0 {
                        true
                    } else {
                        usize::from(self.above.txfm[col]) * 2 > max_tx
                    })
                }
            } else if have_l {
                usize::from(if self.left.skip[row7] != 0 {
                    true
                } else {
                    usize::from(self.left.txfm[row7]) * 2 > max_tx
                })
            } else {
                1
            };
            b.tx = match max_tx {
                3 => {
                    let mut tx = self.c.get_prob(self.probs.p.tx32p[ctx][0]) as usize;
                    if tx != 0 {
                        tx += self.c.get_prob(self.probs.p.tx32p[ctx][1]) as usize;
                        if tx == 2 {
                            tx += self.c.get_prob(self.probs.p.tx32p[ctx][2]) as usize;
                        }
                    }
                    self.counts.tx32p[ctx][tx] += 1;
                    tx
                }
                2 => {
                    let mut tx = self.c.get_prob(self.probs.p.tx16p[ctx][0]) as usize;
                    if tx != 0 {
                        tx += self.c.get_prob(self.probs.p.tx16p[ctx][1]) as usize;
                    }
                    self.counts.tx16p[ctx][tx] += 1;
                    tx
                }
                1 => {
                    let tx = self.c.get_prob(self.probs.p.tx8p[ctx]) as usize;
                    self.counts.tx8p[ctx][tx] += 1;
                    tx
                }
                _ => 0,
            };
        } else {
            b.tx = max_tx.min(self.txfmmode.max_tx());
        }

        if intra_frame {
            // keyframe intra modes use above/left mode context
            b.comp = false;
            let sub8 = b.bs > BlockSize::B8x8;
            if sub8 {
                let a0 = self.above.mode[col * 2];
                let l0 = self.left.mode[row7 << 1];
                b.mode[0] = self
                    .c
                    .get_tree(&data::INTRA_MODE_TREE, &data::KF_YMODE_PROBS[a0 as usize][l0 as usize])
                    as u8;
                self.above.mode[col * 2] = b.mode[0];
                if b.bs != BlockSize::B8x4 {
                    let a1 = self.above.mode[col * 2 + 1];
                    b.mode[1] = self.c.get_tree(
                        &data::INTRA_MODE_TREE,
                        &data::KF_YMODE_PROBS[a1 as usize][b.mode[0] as usize],
                    ) as u8;
                    self.left.mode[row7 << 1] = b.mode[1];
                    self.above.mode[col * 2 + 1] = b.mode[1];
                } else {
                    b.mode[1] = b.mode[0];
                    self.left.mode[row7 << 1] = b.mode[0];
                    self.above.mode[col * 2 + 1] = b.mode[0];
                }
                if b.bs != BlockSize::B4x8 {
                    let a0 = self.above.mode[col * 2];
                    let l1 = self.left.mode[(row7 << 1) + 1];
                    b.mode[2] = self.c.get_tree(
                        &data::INTRA_MODE_TREE,
                        &data::KF_YMODE_PROBS[a0 as usize][l1 as usize],
                    ) as u8;
                    self.above.mode[col * 2] = b.mode[2];
                    if b.bs != BlockSize::B8x4 {
                        let a1 = self.above.mode[col * 2 + 1];
                        b.mode[3] = self.c.get_tree(
                            &data::INTRA_MODE_TREE,
                            &data::KF_YMODE_PROBS[a1 as usize][b.mode[2] as usize],
                        ) as u8;
                        self.left.mode[(row7 << 1) + 1] = b.mode[3];
                        self.above.mode[col * 2 + 1] = b.mode[3];
                    } else {
                        b.mode[3] = b.mode[2];
                        self.left.mode[(row7 << 1) + 1] = b.mode[2];
                        self.above.mode[col * 2 + 1] = b.mode[2];
                    }
                } else {
                    b.mode[2] = b.mode[0];
                    b.mode[3] = b.mode[1];
                    self.left.mode[(row7 << 1) + 1] = b.mode[3];
                    self.above.mode[col * 2 + 1] = b.mode[3];
                }
            } else {
                let a0 = self.above.mode[col * 2];
                let l0 = self.left.mode[row7 << 1];
                b.mode[0] = self
                    .c
                    .get_tree(&data::INTRA_MODE_TREE, &data::KF_YMODE_PROBS[a0 as usize][l0 as usize])
                    as u8;
                b.mode[1] = b.mode[0];
                b.mode[2] = b.mode[0];
                b.mode[3] = b.mode[0];
                // the keyframe mode strips work in 4x4 units
                let (w8, h8) = b.bs.wh8();
                self.above.mode[col * 2..col * 2 + w8 * 2].fill(b.mode[0]);
                self.left.mode[row7 << 1..(row7 << 1) + h8 * 2].fill(b.mode[0]);
            }
            b.uvmode = self
                .c
                .get_tree(
                    &data::INTRA_MODE_TREE,
                    &data::KF_UVMODE_PROBS[b.mode[3] as usize],
                )
                as u8;
        } else if b.intra {
            b.comp = false;
            if b.bs > BlockSize::B8x8 {
                for i in 0..4 {
                    let skip_read = match i {
                        1 => b.bs == BlockSize::B8x4,
                        2 => b.bs == BlockSize::B4x8,
                        3 => b.bs == BlockSize::B8x4 || b.bs == BlockSize::B4x8,
                        _ => false,
                    };
                    if skip_read {
                        b.mode[i] = b.mode[if i == 3 && b.bs == BlockSize::B4x8 {
                            1
                        } else if i == 3 {
                            2
                        } else {
                            0
                        }];
                    } else {
                        b.mode[i] = self
                            .c
                            .get_tree(&data::INTRA_MODE_TREE, &self.probs.p.y_mode[0])
                            as u8;
                        self.counts.y_mode[0][b.mode[i] as usize] += 1;
                    }
                }
            } else {
                let sz = data::SIZE_GROUP[b.bs.idx()] as usize;
                b.mode[0] = self
                    .c
                    .get_tree(&data::INTRA_MODE_TREE, &self.probs.p.y_mode[sz])
                    as u8;
                b.mode[1] = b.mode[0];
                b.mode[2] = b.mode[0];
                b.mode[3] = b.mode[0];
                self.counts.y_mode[sz][b.mode[3] as usize] += 1;
            }
            b.uvmode = self
                .c
                .get_tree(
                    &data::INTRA_MODE_TREE,
                    &self.probs.p.uv_mode[b.mode[3] as usize],
                )
                as u8;
            self.counts.uv_mode[b.mode[3] as usize][b.uvmode as usize] += 1;
        } else {
            self.decode_inter_mode(b, have_a, have_l)?;
        }

        // context strip updates shared by every path
        let vis_w = w4;
        let vis_h = h4;
        self.above.skip[col..col + vis_w].fill(b.skip as u8);
        self.left.skip[row7..row7 + vis_h].fill(b.skip as u8);
        self.above.txfm[col..col + vis_w].fill(b.tx as u8);
        self.left.txfm[row7..row7 + vis_h].fill(b.tx as u8);
        self.above.partition[col..col + vis_w].fill(PARTITION_ABOVE_CTX[b.bs.idx()]);
        self.left.partition[row7..row7 + vis_h].fill(PARTITION_LEFT_CTX[b.bs.idx()]);

        if !intra_frame {
            self.above.intra[col..col + vis_w].fill(b.intra as u8);
            self.left.intra[row7..row7 + vis_h].fill(b.intra as u8);
            self.above.comp[col..col + vis_w].fill(b.comp as u8);
            self.left.comp[row7..row7 + vis_h].fill(b.comp as u8);
            self.above.mode[col..col + vis_w].fill(b.mode[3]);
            self.left.mode[row7..row7 + vis_h].fill(b.mode[3]);
            if self.hdr.filtermode == FilterMode::Switchable && !b.intra {
                // strips carry the tree symbol; the bank index only matters
                // for the MC dispatch below
                self.above.filter[col..col + vis_w].fill(b.filter_bank as u8);
                self.left.filter[row7..row7 + vis_h].fill(b.filter_bank as u8);
                b.filter_bank = data::FILTER_LUT[b.filter_bank] as usize;
            }
            if b.bs > BlockSize::B8x8 {
                self.left.mv[row7 * 2] = b.mv[1];
                self.left.mv[row7 * 2 + 1] = b.mv[3];
                self.above.mv[col * 2] = b.mv[2];
                self.above.mv[col * 2 + 1] = b.mv[3];
            } else {
                for n in 0..vis_w * 2 {
                    self.above.mv[col * 2 + n] = b.mv[3];
                }
                for n in 0..vis_h * 2 {
                    self.left.mv[row7 * 2 + n] = b.mv[3];
                }
            }
            if !b.intra {
                let vref = b.refs[if b.comp {
                    usize::from(self.hdr.signbias[self.hdr.varcompref[0]])
                } else {
                    0
                }];
                self.above.ref_idx[col..col + vis_w].fill(vref as u8);
                self.left.ref_idx[row7..row7 + vis_h].fill(vref as u8);
            }
        }

        // per-8x8 motion vector and reference bookkeeping for later frames
        for y in 0..vis_h {
            let o = (row + y) * mi_stride + col;
            for x in 0..vis_w {
                let mv = &mut self.cur.mv_table[o + x];
                if b.intra {
                    mv.ref_idx = [-1, -1];
                } else if b.comp {
                    mv.ref_idx = [b.refs[0] as i8, b.refs[1] as i8];
                    mv.mv = b.mv[3];
                } else {
                    mv.ref_idx = [b.refs[0] as i8, -1];
                    mv.mv[0] = b.mv[3][0];
                }
            }
        }

        Ok(())
    }

    /// References, inter modes, filter selection, and motion vectors.
    fn decode_inter_mode(&mut self, b: &mut Block, have_a: bool, have_l: bool) -> Result<()> {
        let (row7, col) = (b.row7, b.col);
        let seg = &self.hdr.seg;
        let fix = self.hdr.fixcompref;
        let var1 = self.hdr.varcompref[1];

        if seg.feat[b.seg_id].ref_enabled {
            b.comp = false;
            b.refs[0] = seg.feat[b.seg_id].ref_val as usize - 1;
        } else {
            // compound prediction flag
            if self.comppredmode != CompPredMode::Switchable {
                b.comp = self.comppredmode == CompPredMode::Comp;
            } else {
                let a_comp = self.above.comp[col] != 0;
                let l_comp = self.left.comp[row7] != 0;
                let a_intra = self.above.intra[col] != 0;
                let l_intra = self.left.intra[row7] != 0;
                let a_ref = usize::from(self.above.ref_idx[col]);
                let l_ref = usize::from(self.left.ref_idx[row7]);
                let ctx = if have_a {
                    if have_l {
                        if a_comp && l_comp {
                            4
                        } else if a_comp {
                            2 + usize::from(l_intra || l_ref == fix)
                        } else if l_comp {
                            2 + usize::from(a_intra || a_ref == fix)
                        } else {
                            usize::from(!a_intra && a_ref == fix) ^ usize::from(!l_intra && l_ref == fix)
                        }
                    } else if a_comp {
                        3
                    } else {
                        usize::from(!a_intra && a_ref == fix)
                    }
                } else if have_l {
                    if l_comp {
                        3
                    } else {
                        usize::from(!l_intra && l_ref == fix)
                    }
                } else {
                    1
                };
                let bit = self.c.get_prob(self.probs.p.comp[ctx]);
                self.counts.comp[ctx][bit as usize] += 1;
                b.comp = bit != 0;
            }

            if b.comp {
                // compound: the fixed reference plus one of the two variable
                // ones, ordered by sign bias
                let fix_slot = usize::from(self.hdr.signbias[fix]);
                b.refs[fix_slot] = fix;
                let a_comp = self.above.comp[col] != 0;
                let l_comp = self.left.comp[row7] != 0;
                let a_intra = self.above.intra[col] != 0;
                let l_intra = self.left.intra[row7] != 0;
                let a_ref = usize::from(self.above.ref_idx[col]);
                let l_ref = usize::from(self.left.ref_idx[row7]);
                let ctx = if have_a {
                    if have_l {
                        if a_intra {
                            if l_intra {
                                2
                            } else {
                                1 + 2 * usize::from(l_ref != var1)
                            }
                        } else if l_intra {
                            1 + 2 * usize::from(a_ref != var1)
                        } else if l_ref == a_ref && a_ref == var1 {
                            0
                        } else if !l_comp && !a_comp {
                            if (a_ref == fix && l_ref == self.hdr.varcompref[0])
                                || (l_ref == fix && a_ref == self.hdr.varcompref[0])
                            {
                                4
                            } else if a_ref == l_ref {
                                3
                            } else {
                                1
                            }
                        } else if !l_comp {
                            if a_ref == var1 && l_ref != var1 {
                                1
                            } else if l_ref == var1 && a_ref != var1 {
                                2
                            } else {
                                4
                            }
                        } else if !a_comp {
                            if l_ref == var1 && a_ref != var1 {
                                1
                            } else if a_ref == var1 && l_ref != var1 {
                                2
                            } else {
                                4
                            }
                        } else if l_ref == a_ref {
                            4
                        } else {
                            2
                        }
                    } else if a_intra {
                        2
                    } else if a_comp {
                        4 * usize::from(a_ref != var1)
                    } else {
                        3 * usize::from(a_ref != var1)
                    }
                } else if have_l {
                    if l_intra {
                        2
                    } else if l_comp {
                        4 * usize::from(l_ref != var1)
                    } else {
                        3 * usize::from(l_ref != var1)
                    }
                } else {
                    2
                };
                let bit = self.c.get_prob(self.probs.p.comp_ref[ctx]) as usize;
                b.refs[1 - fix_slot] = self.hdr.varcompref[bit];
                self.counts.comp_ref[ctx][bit] += 1;
            } else {
                self.decode_single_ref(b, have_a, have_l)?;
            }
        }

        // inter mode for blocks of 8x8 and larger
        if b.bs <= BlockSize::B8x8 {
            if seg.feat[b.seg_id].skip_enabled {
                b.mode = [data::ZEROMV; 4];
            } else {
                const OFF: [usize; 10] = [3, 0, 0, 1, 0, 0, 0, 0, 0, 0];
                let off = OFF[b.bs.idx()];
                let ctx = data::INTER_MODE_CTX_LUT[self.above.mode[col + off] as usize]
                    [self.left.mode[row7 + off] as usize] as usize;
                let m = self.c.get_tree(&data::INTER_MODE_TREE, &self.probs.p.mv_mode[ctx]);
                b.mode = [data::NEARESTMV + m as u8; 4];
                self.counts.mv_mode[ctx][m] += 1;
            }
        }

        // interpolation filter
        if self.hdr.filtermode == FilterMode::Switchable {
            let ctx = if have_a && self.above.mode[col] >= data::NEARESTMV {
                if have_l && self.left.mode[row7] >= data::NEARESTMV {
                    if self.above.filter[col] == self.left.filter[row7] {
                        usize::from(self.left.filter[row7])
                    } else {
                        3
                    }
                } else {
                    usize::from(self.above.filter[col])
                }
            } else if have_l && self.left.mode[row7] >= data::NEARESTMV {
                usize::from(self.left.filter[row7])
            } else {
                3
            };
            let f = self.c.get_tree(&data::FILTER_TREE, &self.probs.p.filter[ctx]);
            self.counts.filter[ctx][f] += 1;
            // the strips store the tree symbol; the bank index is resolved
            // through the filter lut
            b.filter_bank = f;
        } else {
            b.filter_bank = self.hdr.filtermode.bank();
        }

        if b.bs > BlockSize::B8x8 {
            // per-quadrant modes and motion vectors
            let ctx = data::INTER_MODE_CTX_LUT[self.above.mode[col] as usize]
                [self.left.mode[row7] as usize] as usize;

            let m = self.c.get_tree(&data::INTER_MODE_TREE, &self.probs.p.mv_mode[ctx]);
            b.mode[0] = data::NEARESTMV + m as u8;
            self.counts.mv_mode[ctx][m] += 1;
            self.fill_mv(b, 0, 0)?;

            if b.bs != BlockSize::B8x4 {
                let m = self.c.get_tree(&data::INTER_MODE_TREE, &self.probs.p.mv_mode[ctx]);
                b.mode[1] = data::NEARESTMV + m as u8;
                self.counts.mv_mode[ctx][m] += 1;
                self.fill_mv(b, 1, 1)?;
            } else {
                b.mode[1] = b.mode[0];
                b.mv[1] = b.mv[0];
            }

            if b.bs != BlockSize::B4x8 {
                let m = self.c.get_tree(&data::INTER_MODE_TREE, &self.probs.p.mv_mode[ctx]);
                b.mode[2] = data::NEARESTMV + m as u8;
                self.counts.mv_mode[ctx][m] += 1;
                self.fill_mv(b, 2, 2)?;

                if b.bs != BlockSize::B8x4 {
                    let m = self.c.get_tree(&data::INTER_MODE_TREE, &self.probs.p.mv_mode[ctx]);
                    b.mode[3] = data::NEARESTMV + m as u8;
                    self.counts.mv_mode[ctx][m] += 1;
                    self.fill_mv(b, 3, 3)?;
                } else {
                    b.mode[3] = b.mode[2];
                    b.mv[3] = b.mv[2];
                }
            } else {
                b.mode[2] = b.mode[0];
                b.mv[2] = b.mv[0];
                b.mode[3] = b.mode[1];
                b.mv[3] = b.mv[1];
            }
        } else {
            self.fill_mv(b, 0, -1)?;
            b.mv[1] = b.mv[0];
            b.mv[2] = b.mv[0];
            b.mv[3] = b.mv[0];
        }

        Ok(())
    }

    fn decode_single_ref(&mut self, b: &mut Block, have_a: bool, have_l: bool) -> Result<()> {
        let (row7, col) = (b.row7, b.col);
        let fix = self.hdr.fixcompref;
        let a_comp = self.above.comp[col] != 0;
        let l_comp = self.left.comp[row7] != 0;
        let a_intra = self.above.intra[col] != 0;
        let l_intra = self.left.intra[row7] != 0;
        let a_ref = usize::from(self.above.ref_idx[col]);
        let l_ref = usize::from(self.left.ref_idx[row7]);

        let ctx = if have_a && !a_intra {
            if have_l && !l_intra {
                if l_comp {
                    if a_comp {
                        1 + usize::from(fix == 0 || l_ref == 0 || a_ref == 0)
                    } else {
                        3 * usize::from(a_ref == 0) + usize::from(fix == 0 || l_ref == 0)
                    }
                } else if a_comp {
                    3 * usize::from(l_ref == 0) + usize::from(fix == 0 || a_ref == 0)
                } else {
                    2 * usize::from(l_ref == 0) + 2 * usize::from(a_ref == 0)
                }
            } else if a_intra {
                2
            } else if a_comp {
                1 + usize::from(fix == 0 || a_ref == 0)
            } else {
                4 * usize::from(a_ref == 0)
            }
        } else if have_l && !l_intra {
            if l_comp {
                1 + usize::from(fix == 0 || l_ref == 0)
            } else {
                4 * usize::from(l_ref == 0)
            }
        } else {
            2
        };
        let bit = self.c.get_prob(self.probs.p.single_ref[ctx][0]) as usize;
        self.counts.single_ref[ctx][0][bit] += 1;
        if bit == 0 {
            b.refs[0] = 0;
            return Ok(());
        }

        // second level: which of the two non-last references
        let ctx = if have_a {
            if have_l {
                if l_intra {
                    if a_intra {
                        2
                    } else if a_comp {
                        1 + 2 * usize::from(fix == 1 || a_ref == 1)
                    } else if a_ref == 0 {
                        3
                    } else {
                        4 * usize::from(a_ref == 1)
                    }
                } else if a_intra {
                    if l_comp {
                        1 + 2 * usize::from(fix == 1 || l_ref == 1)
                    } else if l_ref == 0 {
                        3
                    } else {
                        4 * usize::from(l_ref == 1)
                    }
                } else if a_comp {
                    if l_comp {
                        if l_ref == a_ref {
                            3 * usize::from(fix == 1 || l_ref == 1)
                        } else {
                            2
                        }
                    } else if l_ref == 0 {
                        1 + 2 * usize::from(fix == 1 || a_ref == 1)
                    } else {
                        3 * usize::from(l_ref == 1) + usize::from(fix == 1 || a_ref == 1)
                    }
                } else if l_comp {
                    if a_ref == 0 {
                        1 + 2 * usize::from(fix == 1 || l_ref == 1)
                    } else {
                        3 * usize::from(a_ref == 1) + usize::from(fix == 1 || l_ref == 1)
                    }
                } else if a_ref == 0 {
                    if l_ref == 0 {
                        3
                    } else {
                        4 * usize::from(l_ref == 1)
                    }
                } else if l_ref == 0 {
                    4 * usize::from(a_ref == 1)
                } else {
                    2 * usize::from(l_ref == 1) + 2 * usize::from(a_ref == 1)
                }
            } else if a_intra || (!a_comp && a_ref == 0) {
                2
            } else if a_comp {
                3 * usize::from(fix == 1 || a_ref == 1)
            } else {
                4 * usize::from(a_ref == 1)
            }
        } else if have_l {
            if l_intra || (!l_comp && l_ref == 0) {
                2
            } else if l_comp {
                3 * usize::from(fix == 1 || l_ref == 1)
            } else {
                4 * usize::from(l_ref == 1)
            }
        } else {
            2
        };
        let bit = self.c.get_prob(self.probs.p.single_ref[ctx][1]) as usize;
        self.counts.single_ref[ctx][1][bit] += 1;
        b.refs[0] = 1 + bit;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_context_bits_track_block_width() {
        // a 64-wide block marks every level, a 4-wide one none but the last
        assert_eq!(PARTITION_ABOVE_CTX[BlockSize::B64x64.idx()], 0x0);
        assert_eq!(PARTITION_ABOVE_CTX[BlockSize::B32x64.idx()], 0x8);
        assert_eq!(PARTITION_ABOVE_CTX[BlockSize::B8x8.idx()], 0xe);
        assert_eq!(PARTITION_ABOVE_CTX[BlockSize::B4x4.idx()], 0xf);
        // left context follows height instead
        assert_eq!(PARTITION_LEFT_CTX[BlockSize::B64x32.idx()], 0x8);
        assert_eq!(PARTITION_LEFT_CTX[BlockSize::B32x64.idx()], 0x0);
    }

    #[test]
    fn max_tx_respects_block_dimension() {
        assert_eq!(MAX_TX_FOR_BS[BlockSize::B64x64.idx()], 3);
        assert_eq!(MAX_TX_FOR_BS[BlockSize::B32x32.idx()], 3);
        assert_eq!(MAX_TX_FOR_BS[BlockSize::B16x16.idx()], 2);
        assert_eq!(MAX_TX_FOR_BS[BlockSize::B8x8.idx()], 1);
        assert_eq!(MAX_TX_FOR_BS[BlockSize::B4x4.idx()], 0);
    }

    #[test]
    fn above_context_reset_modes() {
        let mut a = AboveContext::default();
        a.alloc(2);
        a.reset(16, 2, true);
        assert!(a.mode[..32].iter().all(|&m| m == data::DC_PRED));
        a.reset(16, 2, false);
        assert!(a.mode[..16].iter().all(|&m| m == data::NEARESTMV));
    }
}
