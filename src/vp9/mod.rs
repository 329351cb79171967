//! VP9 decoder: frame director, block engine, and the per-frame state they
//! share. One [`Vp9Decoder::decode_packet`] call consumes one access unit
//! (possibly a superframe) and yields the visible pictures it contains.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod data;
pub mod header;
pub mod prob;

mod block;
mod coeff;
mod lpf;
mod mvs;
mod recon;

use std::sync::Arc;

use arrayvec::ArrayVec;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::dsp::Dsp;
use crate::pool::{CancelToken, Mv, Picture, PictureType, RefPool};
use crate::rac::RangeCoder;
use crate::vp9::block::{AboveContext, LeftContext, TileDecoder};
use crate::vp9::header::{
    parse_compressed_header, parse_frame_header, ref_scale, FrameHeader, HeaderPersist,
    HeaderResult, RefScale,
};
use crate::vp9::lpf::LoopFilterMasks;
use crate::vp9::prob::{adapt, AdaptHints, Counts, FrameContext, FrameProbs};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxfmMode {
    Only4x4,
    Allow8,
    Allow16,
    Allow32,
    Switchable,
}

impl TxfmMode {
    pub fn from_index(i: usize) -> TxfmMode {
        match i {
            0 => TxfmMode::Only4x4,
            1 => TxfmMode::Allow8,
            2 => TxfmMode::Allow16,
            3 => TxfmMode::Allow32,
            _ => TxfmMode::Switchable,
        }
    }

    /// Largest transform size the mode permits, as a table index.
    pub fn max_tx(self) -> usize {
        match self {
            TxfmMode::Only4x4 => 0,
            TxfmMode::Allow8 => 1,
            TxfmMode::Allow16 => 2,
            _ => 3,
        }
    }
}

/// Sub-pixel interpolation filter selection. The first four values index
/// the DSP filter banks directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Smooth,
    Regular,
    Sharp,
    Bilinear,
    Switchable,
}

impl FilterMode {
    pub fn from_index(i: usize) -> FilterMode {
        match i {
            0 => FilterMode::Smooth,
            1 => FilterMode::Regular,
            2 => FilterMode::Sharp,
            3 => FilterMode::Bilinear,
            _ => FilterMode::Switchable,
        }
    }

    pub fn bank(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompPredMode {
    Single,
    Comp,
    Switchable,
}

impl CompPredMode {
    pub fn from_index(i: usize) -> CompPredMode {
        match i {
            0 => CompPredMode::Single,
            1 => CompPredMode::Comp,
            _ => CompPredMode::Switchable,
        }
    }
}

/// The four inter prediction modes. Context strips store the unified mode
/// byte; this is the typed view used once a block is known to be inter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterPredMode {
    Nearest,
    Near,
    Zero,
    New,
}

impl InterPredMode {
    pub(crate) fn from_unified(m: u8) -> InterPredMode {
        match m {
            data::NEARESTMV => InterPredMode::Nearest,
            data::NEARMV => InterPredMode::Near,
            data::ZEROMV => InterPredMode::Zero,
            _ => InterPredMode::New,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPartition {
    None,
    Horizontal,
    Vertical,
    Split,
}

impl BlockPartition {
    pub fn from_index(i: usize) -> BlockPartition {
        match i {
            0 => BlockPartition::None,
            1 => BlockPartition::Horizontal,
            2 => BlockPartition::Vertical,
            _ => BlockPartition::Split,
        }
    }
}

/// Square partition levels, 64x64 down to 8x8.
pub const BL_64X64: usize = 0;
pub const BL_8X8: usize = 3;

/// The thirteen coded block sizes; the numbering packs partition level and
/// shape so `level * 3 + partition` lands on the right entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum BlockSize {
    B64x64,
    B64x32,
    B32x64,
    B32x32,
    B32x16,
    B16x32,
    B16x16,
    B16x8,
    B8x16,
    B8x8,
    B8x4,
    B4x8,
    B4x4,
}

impl BlockSize {
    pub fn from_level_partition(bl: usize, bp: BlockPartition) -> BlockSize {
        Self::from_index(bl * 3 + bp as usize)
    }

    pub fn from_index(i: usize) -> BlockSize {
        use BlockSize::*;
        [
            B64x64, B64x32, B32x64, B32x32, B32x16, B16x32, B16x16, B16x8, B8x16, B8x8, B8x4,
            B4x8, B4x4,
        ][i]
    }

    #[inline]
    pub fn idx(self) -> usize {
        self as usize
    }

    /// Width and height in 8x8 units.
    #[inline]
    pub fn wh8(self) -> (usize, usize) {
        let t = data::BWH_TAB[0][self.idx()];
        (t[0] as usize, t[1] as usize)
    }
}

/// Decode state for one leaf block.
pub(crate) struct Block {
    pub row: usize,
    pub col: usize,
    pub row7: usize,
    pub seg_id: usize,
    pub intra: bool,
    pub comp: bool,
    pub refs: [usize; 2],
    /// unified mode numbering, one per 4x4 quadrant of an 8x8 block
    pub mode: [u8; 4],
    pub uvmode: u8,
    pub skip: bool,
    pub filter_bank: usize,
    pub mv: [[Mv; 2]; 4],
    pub bs: BlockSize,
    pub tx: usize,
    pub uvtx: usize,
    pub bl: usize,
    pub bp: BlockPartition,
    /// MV clamping bounds (guard band around the picture), eighth-pel
    pub min_mv: (i32, i32),
    pub max_mv: (i32, i32),
}

/// Per-frame scratch: coefficient buffers, end-of-block counts, and the
/// reconstruction and edge-emulation spill areas. Everything here lives for
/// exactly one frame and is recycled in place.
pub(crate) struct Bufs {
    pub coef_y: Vec<i32>,
    pub coef_uv: [Vec<i32>; 2],
    pub eob_y: [u16; 256],
    pub eob_uv: [[u16; 64]; 2],
    pub tmp_y: Vec<u8>,
    pub tmp_uv: [Vec<u8>; 2],
    pub edge_emu: Vec<u8>,
}

impl Default for Bufs {
    fn default() -> Self {
        Bufs {
            coef_y: vec![0; 64 * 64],
            coef_uv: [vec![0; 32 * 32], vec![0; 32 * 32]],
            eob_y: [0; 256],
            eob_uv: [[0; 64]; 2],
            tmp_y: vec![0; 64 * 64],
            tmp_uv: [vec![0; 32 * 32], vec![0; 32 * 32]],
            edge_emu: vec![0; 288 * 144],
        }
    }
}

pub struct Vp9Decoder {
    dsp: Dsp,
    pool: RefPool,
    cancel: CancelToken,
    persist: HeaderPersist,
    prob_ctx: [FrameContext; 4],

    // stream-level memory between frames
    last_invisible: bool,
    last_frame: Option<Arc<Picture>>,
    width: usize,
    height: usize,
    cols: usize,
    rows: usize,
    sb_cols: usize,
    sb_rows: usize,

    above: AboveContext,
    lflvl: Vec<LoopFilterMasks>,
    intra_pred_rows: [Vec<u8>; 3],
    lim_lut: [u8; 64],
    mblim_lut: [u8; 64],
    lut_sharpness: i16,

    bufs: Bufs,
}

impl Default for Vp9Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Vp9Decoder {
    pub fn new() -> Vp9Decoder {
        Vp9Decoder {
            dsp: Dsp::new(),
            pool: RefPool::new(),
            cancel: CancelToken::new(),
            persist: HeaderPersist::default(),
            prob_ctx: [FrameContext::default(); 4],
            last_invisible: false,
            last_frame: None,
            width: 0,
            height: 0,
            cols: 0,
            rows: 0,
            sb_cols: 0,
            sb_rows: 0,
            above: AboveContext::default(),
            lflvl: Vec::new(),
            intra_pred_rows: [Vec::new(), Vec::new(), Vec::new()],
            lim_lut: [0; 64],
            mblim_lut: [0; 64],
            lut_sharpness: -1,
            bufs: Bufs::default(),
        }
    }

    /// Token other threads may use to interrupt a running decode.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Drop all reference slots, e.g. at a seek point.
    pub fn flush(&mut self) {
        self.pool.flush();
        self.last_frame = None;
    }

    /// Borrow a reference slot, mainly useful for inspection in tests.
    pub fn reference(&self, idx: usize) -> Result<Arc<Picture>> {
        self.pool.take_reference(idx)
    }

    /// Decode one access unit. A superframe yields up to eight frames; the
    /// returned pictures are the visible ones in presentation order.
    pub fn decode_packet(&mut self, data: &[u8]) -> Result<Vec<Arc<Picture>>> {
        let mut out = Vec::new();
        for frame in split_superframe(data) {
            if let Some(pic) = self.decode_frame(frame)? {
                out.push(pic);
            }
        }
        Ok(out)
    }

    fn ref_dims(&self) -> [Option<(usize, usize)>; 8] {
        let mut dims = [None; 8];
        for (i, d) in dims.iter_mut().enumerate() {
            if let Ok(pic) = self.pool.take_reference(i) {
                *d = Some((pic.width, pic.height));
            }
        }
        dims
    }

    fn decode_frame(&mut self, data: &[u8]) -> Result<Option<Arc<Picture>>> {
        let dims = self.ref_dims();
        let prev_keyframe = self.persist.last_keyframe;
        let hdr = match parse_frame_header(data, &dims, &mut self.persist)? {
            HeaderResult::ShowExisting(idx) => {
                debug!("show existing frame from slot {}", idx);
                return self.pool.take_reference(idx).map(Some);
            }
            HeaderResult::Frame(hdr) => hdr,
        };
        debug!(
            "frame {}x{} keyframe={} intraonly={} refresh={:#04x}",
            hdr.width, hdr.height, hdr.keyframe, hdr.intraonly, hdr.refresh_mask
        );

        self.update_size(hdr.width, hdr.height)?;
        if self.lut_sharpness != i16::from(hdr.filter.sharpness) {
            self.lut_sharpness = i16::from(hdr.filter.sharpness);
            self.lim_lut = [0; 64];
            self.mblim_lut = [0; 64];
        }

        // resolve the active references and their scale factors
        let inter = !hdr.keyframe && !hdr.intraonly;
        let mut refs: [Option<Arc<Picture>>; 3] = [None, None, None];
        let mut scales = [RefScale::UNSCALED; 3];
        if inter {
            for i in 0..3 {
                let r = self.pool.take_reference(hdr.refidx[i])?;
                scales[i] = ref_scale(r.width, r.height, hdr.width, hdr.height)?;
                refs[i] = Some(r);
            }
        }

        // one predicate for every "previous frame data" consumer
        let use_last_frame_mvs = inter
            && !hdr.errorres
            && !self.last_invisible
            && self
                .last_frame
                .as_ref()
                .map_or(false, |f| f.width == hdr.width && f.height == hdr.height);

        if hdr.keyframe || hdr.errorres || hdr.intraonly {
            self.prob_ctx = [FrameContext::default(); 4];
        }

        let mut probs = FrameProbs::from_context(&self.prob_ctx[hdr.framectxid]);
        probs.seg = hdr.seg.tree_probs;
        probs.seg_pred = hdr.seg.pred_probs;
        let mut counts = Counts::default();

        let chdr = &data[hdr.compressed_offset..hdr.compressed_offset + hdr.compressed_size];
        let mut c = RangeCoder::new(chdr);
        let (txfmmode, comppredmode) = parse_compressed_header(&mut c, &hdr, &mut probs)?;

        let mut cur = self.pool.acquire_buffer(hdr.width, hdr.height, hdr.ss)?;
        cur.keyframe = hdr.keyframe;
        cur.invisible = hdr.invisible;
        cur.pict_type = if hdr.keyframe || hdr.intraonly {
            PictureType::I
        } else {
            PictureType::P
        };

        let tile_data = &data[hdr.compressed_offset + hdr.compressed_size..];
        self.decode_tiles(
            &hdr,
            txfmmode,
            comppredmode,
            use_last_frame_mvs,
            &mut probs,
            &mut counts,
            &refs,
            &scales,
            &mut cur,
            tile_data,
        )?;

        // end of frame: probability maintenance strictly before the
        // reference refresh, so promoted snapshots are the adapted ones
        if hdr.refreshctx {
            if hdr.parallelmode {
                let ctx = &mut self.prob_ctx[hdr.framectxid];
                ctx.p = probs.p;
                for tx in 0..=txfmmode.max_tx() {
                    for pl in 0..2 {
                        for int in 0..2 {
                            for band in 0..6 {
                                for cx in 0..6 {
                                    ctx.coef[tx][pl][int].0[band][cx]
                                        .copy_from_slice(&probs.coef[tx][pl][int][band][cx][..3]);
                                }
                            }
                        }
                    }
                }
            } else {
                let hints = AdaptHints {
                    keyframe_like: hdr.keyframe || hdr.intraonly || !prev_keyframe,
                    intra_frame: hdr.keyframe || hdr.intraonly,
                    high_precision_mvs: hdr.highprecision_mvs,
                    tx_switchable: txfmmode == TxfmMode::Switchable,
                    filter_switchable: hdr.filtermode == FilterMode::Switchable,
                    comp_pred_switchable: comppredmode == CompPredMode::Switchable,
                    comp_pred_any: comppredmode != CompPredMode::Single,
                    single_pred_any: comppredmode != CompPredMode::Comp,
                };
                adapt(&mut self.prob_ctx[hdr.framectxid], &probs, &counts, &hints);
            }
        }

        let cur = Arc::new(cur);
        cur.progress().report(u32::MAX, 0);
        self.pool.store_current(&cur, hdr.refresh_mask);
        self.last_frame = Some(Arc::clone(&cur));
        self.last_invisible = hdr.invisible;

        Ok(if hdr.invisible { None } else { Some(cur) })
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_tiles(
        &mut self,
        hdr: &FrameHeader,
        txfmmode: TxfmMode,
        comppredmode: CompPredMode,
        use_last_frame_mvs: bool,
        probs: &mut FrameProbs,
        counts: &mut Counts,
        refs: &[Option<Arc<Picture>>; 3],
        scales: &[RefScale; 3],
        cur: &mut Picture,
        mut data: &[u8],
    ) -> Result<()> {
        self.above.reset(self.cols, self.sb_cols, hdr.keyframe || hdr.intraonly);

        let tile_cols = hdr.tiling.cols;
        let tile_rows = hdr.tiling.rows;
        // at most 64 tile columns by construction of the log2 split
        let mut coders: ArrayVec<RangeCoder, 64> = ArrayVec::new();

        for tile_row in 0..tile_rows {
            let (row_start, row_end) = tile_span(tile_row, hdr.tiling.log2_rows, self.sb_rows);

            // each tile gets its own range coder, seeded at its size prefix
            coders.clear();
            for tile_col in 0..tile_cols {
                let last_tile = tile_row == tile_rows - 1 && tile_col == tile_cols - 1;
                let tile_size = if last_tile {
                    data.len()
                } else {
                    if data.len() < 4 {
                        return Err(Error::ShortBitstream);
                    }
                    let sz = BigEndian::read_u32(data) as usize;
                    data = &data[4..];
                    sz
                };
                if tile_size > data.len() {
                    return Err(Error::ShortBitstream);
                }
                let mut c = RangeCoder::new(&data[..tile_size]);
                c.check_marker()?;
                coders.push(c);
                data = &data[tile_size..];
            }

            for sb_row in row_start..row_end {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let row = sb_row << 3;
                for m in self.lflvl.iter_mut() {
                    m.clear();
                }
                for (tile_col, coder) in coders.iter_mut().enumerate() {
                    let (col_start, col_end) =
                        tile_span(tile_col, hdr.tiling.log2_cols, self.sb_cols);
                    let mut left = LeftContext::default();
                    left.reset(hdr.keyframe || hdr.intraonly);

                    let mut td = TileDecoder {
                        c: coder,
                        probs: &mut *probs,
                        counts: &mut *counts,
                        hdr,
                        txfmmode,
                        comppredmode,
                        use_last_frame_mvs,
                        dsp: &self.dsp,
                        above: &mut self.above,
                        left,
                        cur: &mut *cur,
                        prev: self.last_frame.as_deref(),
                        refs,
                        scales,
                        intra_pred_rows: &self.intra_pred_rows,
                        lflvl: &mut self.lflvl,
                        lim_lut: &mut self.lim_lut,
                        mblim_lut: &mut self.mblim_lut,
                        cols: self.cols,
                        rows: self.rows,
                        sb_cols: self.sb_cols,
                        tile_col_start: col_start << 3,
                        tile_col_end: (col_end << 3).min(self.cols),
                        cancel: &self.cancel,
                        bufs: &mut self.bufs,
                    };
                    for sb_col in col_start..col_end {
                        let col = sb_col << 3;
                        if col >= self.cols {
                            break;
                        }
                        td.decode_sb(row, col, BL_64X64)?;
                    }
                }

                // keep the pre-loopfilter bottom row of this superblock row
                // for intra prediction of the next one
                if row + 8 < self.rows {
                    for (p, save) in self.intra_pred_rows.iter_mut().enumerate() {
                        let plane = &cur.planes[p];
                        let sub = usize::from(p > 0);
                        let y = ((row >> sub) << 3) + (64 >> sub) - 1;
                        let y = y.min(plane.height() - 1);
                        let w = save.len().min(plane.width());
                        save[..w].copy_from_slice(&plane.row(y)[..w]);
                    }
                }

                if hdr.filter.level > 0 {
                    lpf::filter_sb_row(
                        &self.dsp,
                        cur,
                        &self.lflvl,
                        row,
                        self.cols,
                        self.rows,
                        &self.lim_lut,
                        &self.mblim_lut,
                    );
                }
                let done_px = (((sb_row + 1) << 6) - 1).min(self.height - 1);
                cur.progress().report(done_px as u32, 0);
            }
        }
        Ok(())
    }

    fn update_size(&mut self, w: usize, h: usize) -> Result<()> {
        if w == 0 || h == 0 {
            return Err(Error::InvalidData("zero frame dimension"));
        }
        if w == self.width && h == self.height && !self.lflvl.is_empty() {
            return Ok(());
        }
        self.width = w;
        self.height = h;
        self.sb_cols = (w + 63) >> 6;
        self.sb_rows = (h + 63) >> 6;
        self.cols = (w + 7) >> 3;
        self.rows = (h + 7) >> 3;

        self.above.alloc(self.sb_cols);
        self.lflvl = vec![LoopFilterMasks::default(); self.sb_cols];
        self.intra_pred_rows = [
            vec![0x80; self.sb_cols * 64],
            vec![0x80; self.sb_cols * 32],
            vec![0x80; self.sb_cols * 32],
        ];
        Ok(())
    }
}

/// Start and end (in superblocks) of one tile along an axis split into
/// `1 << log2_n` power-of-two tiles.
fn tile_span(idx: usize, log2_n: u32, sbs: usize) -> (usize, usize) {
    let start = (idx * sbs) >> log2_n;
    let end = ((idx + 1) * sbs) >> log2_n;
    (start.min(sbs), end.min(sbs))
}

/// Split an access unit along its superframe index: the last byte repeats
/// at the start of the index and encodes the frame count and the per-frame
/// size width; sizes are little-endian. Without a valid index the packet is
/// a single frame.
pub fn split_superframe(data: &[u8]) -> Vec<&[u8]> {
    if let Some(&marker) = data.last() {
        if marker & 0xe0 == 0xc0 {
            let nbytes = 1 + ((marker >> 3) & 0x3) as usize;
            let n_frames = 1 + (marker & 0x7) as usize;
            let idx_sz = 2 + n_frames * nbytes;
            if data.len() >= idx_sz && data[data.len() - idx_sz] == marker {
                let idx = &data[data.len() - idx_sz + 1..];
                let mut frames = Vec::with_capacity(n_frames);
                let mut rest = &data[..data.len() - idx_sz];
                for i in 0..n_frames {
                    let raw = &idx[i * nbytes..i * nbytes + nbytes];
                    let sz = LittleEndian::read_uint(raw, nbytes) as usize;
                    if sz > rest.len() {
                        warn!("superframe entry {} overruns the packet", i);
                        return vec![data];
                    }
                    frames.push(&rest[..sz]);
                    rest = &rest[sz..];
                }
                return frames;
            }
        }
    }
    vec![data]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superframe_split_two_frames() {
        // two frames of 3 and 2 bytes with 1-byte sizes
        let marker = 0b1100_0001u8; // 2 frames, 1 byte per size
        let data = [1u8, 2, 3, 9, 8, marker, 3, 2, marker];
        let frames = split_superframe(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], &[1, 2, 3]);
        assert_eq!(frames[1], &[9, 8]);
    }

    #[test]
    fn superframe_marker_mismatch_falls_back_to_single_frame() {
        let marker = 0b1100_0001u8;
        let data = [1u8, 2, 3, 9, 8, 0x55, 3, 2, marker];
        let frames = split_superframe(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], &data[..]);
    }

    #[test]
    fn superframe_oversized_entry_falls_back() {
        let marker = 0b1100_0001u8;
        let data = [1u8, 2, marker, 200, 2, marker];
        let frames = split_superframe(&data);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn superframe_wide_sizes() {
        // 1 frame, 2-byte little-endian size
        let marker = 0b1101_0000u8;
        let data = [7u8, 7, 7, marker, 3, 0, marker];
        let frames = split_superframe(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], &[7, 7, 7]);
    }

    #[test]
    fn block_size_packing_matches_level_and_partition() {
        assert_eq!(
            BlockSize::from_level_partition(0, BlockPartition::None),
            BlockSize::B64x64
        );
        assert_eq!(
            BlockSize::from_level_partition(0, BlockPartition::Horizontal),
            BlockSize::B64x32
        );
        assert_eq!(
            BlockSize::from_level_partition(3, BlockPartition::None),
            BlockSize::B8x8
        );
        assert_eq!(
            BlockSize::from_level_partition(3, BlockPartition::Split),
            BlockSize::B4x4
        );
        assert_eq!(BlockSize::B16x16.wh8(), (2, 2));
        assert_eq!(BlockSize::B4x8.wh8(), (1, 1));
    }

    #[test]
    fn tile_spans_cover_every_superblock() {
        for log2 in 0..3u32 {
            let n = 1usize << log2;
            for sbs in [1usize, 3, 7, 11, 64] {
                let mut covered = 0;
                for t in 0..n {
                    let (s, e) = tile_span(t, log2, sbs);
                    assert_eq!(s, covered.min(sbs));
                    covered = e;
                }
                assert_eq!(covered, sbs);
            }
        }
    }

    #[test]
    fn show_existing_returns_pool_borrow_unchanged() {
        let mut dec = Vp9Decoder::new();
        let pic = Arc::new(Picture::new(64, 64, (1, 1)).unwrap());
        dec.pool.store_current(&pic, 1 << 3);
        let live_before = dec.pool.live_slots();

        // frame marker, profile 0, show-existing slot 3
        let data = [0b1000_1011u8, 0, 0];
        let out = dec.decode_packet(&data).unwrap();
        assert_eq!(out.len(), 1);
        assert!(Arc::ptr_eq(&out[0], &pic));
        assert_eq!(dec.pool.live_slots(), live_before);
    }
}
