//! Frame header parsing: the fixed-layout uncompressed prefix and the
//! arithmetic-coded compressed header with its forward probability updates.

use bitreader::BitReader;

use crate::rac::RangeCoder;
use crate::vp9::data;
use crate::vp9::prob::{update_prob, FrameProbs};
use crate::vp9::{CompPredMode, FilterMode, TxfmMode};
use crate::{clip_uintp2, Error, Result};

pub const SYNC_CODE: u32 = 0x498342;

/// Scale factors are 16-bit fixed point; a reference more than twice as
/// large or sixteen times as small as the current frame cannot be used.
pub const REF_INVALID_SCALE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, Default)]
pub struct SegFeature {
    pub q_enabled: bool,
    pub q_val: i16,
    pub lf_enabled: bool,
    pub lf_val: i8,
    pub ref_enabled: bool,
    pub ref_val: u8,
    pub skip_enabled: bool,
    /// dequantizers `[luma/chroma][dc/ac]`, derived after parsing
    pub qmul: [[i16; 2]; 2],
    /// loop-filter level `[intra + ref][mode delta]`, derived after parsing
    pub lflvl: [[u8; 2]; 4],
}

#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub enabled: bool,
    pub temporal: bool,
    pub absolute_vals: bool,
    pub update_map: bool,
    pub feat: [SegFeature; 8],
    /// tree probabilities for explicitly coded segment ids
    pub tree_probs: [u8; 7],
    /// probabilities for the temporal "predicted" flag
    pub pred_probs: [u8; 3],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopFilterParams {
    pub level: u8,
    pub sharpness: u8,
    pub delta_enabled: bool,
    pub ref_deltas: [i8; 4],
    pub mode_deltas: [i8; 2],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TileInfo {
    pub log2_cols: u32,
    pub log2_rows: u32,
    pub cols: usize,
    pub rows: usize,
}

/// Everything the uncompressed header carries, plus a few derived values.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub profile: u8,
    pub keyframe: bool,
    pub invisible: bool,
    pub errorres: bool,
    pub intraonly: bool,
    pub resetctx: u8,
    pub colorspace: u8,
    pub fullrange: bool,
    pub ss: (u8, u8),
    pub width: usize,
    pub height: usize,
    pub refresh_mask: u8,
    pub refidx: [usize; 3],
    pub signbias: [bool; 3],
    pub highprecision_mvs: bool,
    pub filtermode: FilterMode,
    pub allow_comp_inter: bool,
    pub fixcompref: usize,
    pub varcompref: [usize; 2],
    pub refreshctx: bool,
    pub parallelmode: bool,
    pub framectxid: usize,
    pub filter: LoopFilterParams,
    pub yac_qi: u8,
    pub ydc_qdelta: i8,
    pub uvdc_qdelta: i8,
    pub uvac_qdelta: i8,
    pub lossless: bool,
    pub seg: Segmentation,
    pub tiling: TileInfo,
    /// byte offset where the compressed header starts
    pub compressed_offset: usize,
    /// compressed header size in bytes; tile data follows immediately
    pub compressed_size: usize,
}

pub enum HeaderResult {
    /// Show-existing-frame: emit the reference in this slot, decode nothing.
    ShowExisting(usize),
    Frame(Box<FrameHeader>),
}

/// Header state that survives from frame to frame: loop-filter deltas and
/// segmentation features persist until the bitstream updates them.
#[derive(Default)]
pub struct HeaderPersist {
    pub lf: LoopFilterParams,
    pub seg: Segmentation,
    pub last_keyframe: bool,
}

fn get_bits_with_sign(r: &mut BitReader, n: u8) -> Result<i32> {
    let v = r.read_u32(n)? as i32;
    Ok(if r.read_bool()? { -v } else { v })
}

fn decode012(r: &mut BitReader) -> Result<u32> {
    if !r.read_bool()? {
        Ok(0)
    } else {
        Ok(1 + r.read_u32(1)?)
    }
}

/// Parse the uncompressed frame header, reading the fixed field order of
/// the bitstream. `refs` carries the dimensions of currently-held reference
/// slots so size-from-reference and availability can be resolved here.
pub fn parse_frame_header(
    data: &[u8],
    refs: &[Option<(usize, usize)>; 8],
    persist: &mut HeaderPersist,
) -> Result<HeaderResult> {
    let mut r = BitReader::new(data);

    if r.read_u8(2)? != 0b10 {
        return Err(Error::BadMarker);
    }
    let profile = r.read_u8(1)? | (r.read_u8(1)? << 1);
    if profile >= 2 {
        if r.read_bool()? {
            return Err(Error::InvalidData("reserved profile bit set"));
        }
        return Err(Error::BadProfile("high bit depth profiles"));
    }
    if r.read_bool()? {
        // show-existing-frame
        return Ok(HeaderResult::ShowExisting(r.read_u8(3)? as usize));
    }

    let keyframe = !r.read_bool()?;
    let invisible = !r.read_bool()?;
    let errorres = r.read_bool()?;

    let mut hdr = FrameHeader {
        profile,
        keyframe,
        invisible,
        errorres,
        intraonly: false,
        resetctx: 0,
        colorspace: 0,
        fullrange: false,
        ss: (1, 1),
        width: 0,
        height: 0,
        refresh_mask: 0,
        refidx: [0; 3],
        signbias: [false; 3],
        highprecision_mvs: false,
        filtermode: FilterMode::Switchable,
        allow_comp_inter: false,
        fixcompref: 0,
        varcompref: [0; 2],
        refreshctx: false,
        parallelmode: false,
        framectxid: 0,
        filter: LoopFilterParams::default(),
        yac_qi: 0,
        ydc_qdelta: 0,
        uvdc_qdelta: 0,
        uvac_qdelta: 0,
        lossless: false,
        seg: Segmentation::default(),
        tiling: TileInfo::default(),
        compressed_offset: 0,
        compressed_size: 0,
    };

    if keyframe {
        if r.read_u32(24)? != SYNC_CODE {
            return Err(Error::BadSyncCode);
        }
        hdr.colorspace = r.read_u8(3)?;
        if hdr.colorspace == 7 {
            return Err(Error::BadProfile("RGB is not allowed in profile 0"));
        }
        hdr.fullrange = r.read_bool()?;
        if profile == 1 {
            hdr.ss.0 = r.read_u8(1)?;
            hdr.ss.1 = r.read_u8(1)?;
            if r.read_bool()? {
                return Err(Error::InvalidData("reserved subsampling bit set"));
            }
        }
        hdr.refresh_mask = 0xff;
        hdr.width = r.read_u32(16)? as usize + 1;
        hdr.height = r.read_u32(16)? as usize + 1;
        if r.read_bool()? {
            r.skip(32)?; // render size
        }
    } else {
        hdr.intraonly = if invisible { r.read_bool()? } else { false };
        hdr.resetctx = if errorres { 0 } else { r.read_u8(2)? };
        if hdr.intraonly {
            if r.read_u32(24)? != SYNC_CODE {
                return Err(Error::BadSyncCode);
            }
            hdr.refresh_mask = r.read_u8(8)?;
            hdr.width = r.read_u32(16)? as usize + 1;
            hdr.height = r.read_u32(16)? as usize + 1;
            if r.read_bool()? {
                r.skip(32)?;
            }
        } else {
            hdr.refresh_mask = r.read_u8(8)?;
            for i in 0..3 {
                hdr.refidx[i] = r.read_u8(3)? as usize;
                hdr.signbias[i] = r.read_bool()?;
            }
            let dims = [
                refs[hdr.refidx[0]].ok_or(Error::RefUnavailable)?,
                refs[hdr.refidx[1]].ok_or(Error::RefUnavailable)?,
                refs[hdr.refidx[2]].ok_or(Error::RefUnavailable)?,
            ];
            let mut size = None;
            for d in dims {
                if r.read_bool()? {
                    size = Some(d);
                    break;
                }
            }
            let (w, h) = match size {
                Some(d) => d,
                None => (r.read_u32(16)? as usize + 1, r.read_u32(16)? as usize + 1),
            };
            hdr.width = w;
            hdr.height = h;
            if r.read_bool()? {
                r.skip(32)?;
            }
            hdr.highprecision_mvs = r.read_bool()?;
            hdr.filtermode = if r.read_bool()? {
                FilterMode::Switchable
            } else {
                FilterMode::from_index(r.read_u8(2)? as usize)
            };
            hdr.allow_comp_inter = hdr.signbias[0] != hdr.signbias[1]
                || hdr.signbias[0] != hdr.signbias[2];
            if hdr.allow_comp_inter {
                // the reference whose sign bias stands alone is the fixed one
                if hdr.signbias[0] == hdr.signbias[1] {
                    hdr.fixcompref = 2;
                    hdr.varcompref = [0, 1];
                } else if hdr.signbias[0] == hdr.signbias[2] {
                    hdr.fixcompref = 1;
                    hdr.varcompref = [0, 2];
                } else {
                    hdr.fixcompref = 0;
                    hdr.varcompref = [1, 2];
                }
            }
        }
    }

    hdr.refreshctx = if errorres { false } else { r.read_bool()? };
    hdr.parallelmode = if errorres { true } else { r.read_bool()? };
    hdr.framectxid = r.read_u8(2)? as usize;

    // loop filter; deltas persist across frames until updated
    let mut lf = persist.lf;
    lf.level = r.read_u8(6)?;
    lf.sharpness = r.read_u8(3)?;
    lf.delta_enabled = r.read_bool()?;
    if lf.delta_enabled {
        if r.read_bool()? {
            for i in 0..4 {
                if r.read_bool()? {
                    lf.ref_deltas[i] = get_bits_with_sign(&mut r, 6)? as i8;
                }
            }
            for i in 0..2 {
                if r.read_bool()? {
                    lf.mode_deltas[i] = get_bits_with_sign(&mut r, 6)? as i8;
                }
            }
        }
    } else {
        lf.ref_deltas = [0; 4];
        lf.mode_deltas = [0; 2];
    }
    persist.lf = lf;
    hdr.filter = lf;

    // quantizers
    hdr.yac_qi = r.read_u8(8)?;
    hdr.ydc_qdelta = if r.read_bool()? {
        get_bits_with_sign(&mut r, 4)? as i8
    } else {
        0
    };
    hdr.uvdc_qdelta = if r.read_bool()? {
        get_bits_with_sign(&mut r, 4)? as i8
    } else {
        0
    };
    hdr.uvac_qdelta = if r.read_bool()? {
        get_bits_with_sign(&mut r, 4)? as i8
    } else {
        0
    };
    hdr.lossless = hdr.yac_qi == 0
        && hdr.ydc_qdelta == 0
        && hdr.uvdc_qdelta == 0
        && hdr.uvac_qdelta == 0;

    // segmentation; features persist like the loop-filter deltas
    let mut seg = persist.seg.clone();
    seg.enabled = r.read_bool()?;
    if seg.enabled {
        seg.update_map = r.read_bool()?;
        if seg.update_map {
            for i in 0..7 {
                seg.tree_probs[i] = if r.read_bool()? { r.read_u8(8)? } else { 255 };
            }
            seg.temporal = r.read_bool()?;
            if seg.temporal {
                for i in 0..3 {
                    seg.pred_probs[i] = if r.read_bool()? { r.read_u8(8)? } else { 255 };
                }
            } else {
                seg.pred_probs = [255; 3];
            }
        }
        if r.read_bool()? {
            seg.absolute_vals = r.read_bool()?;
            for i in 0..8 {
                let feat = &mut seg.feat[i];
                feat.q_enabled = r.read_bool()?;
                if feat.q_enabled {
                    feat.q_val = get_bits_with_sign(&mut r, 8)? as i16;
                }
                feat.lf_enabled = r.read_bool()?;
                if feat.lf_enabled {
                    feat.lf_val = get_bits_with_sign(&mut r, 6)? as i8;
                }
                feat.ref_enabled = r.read_bool()?;
                if feat.ref_enabled {
                    feat.ref_val = r.read_u8(2)?;
                }
                feat.skip_enabled = r.read_bool()?;
            }
        }
    } else {
        seg.update_map = false;
        seg.temporal = false;
        seg.feat[0] = SegFeature::default();
    }

    derive_seg_lookup(&mut seg, &hdr);
    persist.seg = seg.clone();
    hdr.seg = seg;

    // tile split
    let sb_cols = (hdr.width + 63) >> 6;
    let mut log2_cols = 0;
    while (sb_cols >> log2_cols) > 64 {
        log2_cols += 1;
    }
    let mut max = 0;
    while (sb_cols >> max) >= 4 {
        max += 1;
    }
    let max = max.max(1) - 1;
    while max > log2_cols {
        if r.read_bool()? {
            log2_cols += 1;
        } else {
            break;
        }
    }
    let log2_rows = decode012(&mut r)?;
    hdr.tiling = TileInfo {
        log2_cols,
        log2_rows,
        cols: 1 << log2_cols,
        rows: 1 << log2_rows,
    };

    hdr.compressed_size = r.read_u32(16)? as usize;
    r.align(1)?;
    hdr.compressed_offset = (r.position() / 8) as usize;
    if hdr.compressed_offset + hdr.compressed_size > data.len() {
        return Err(Error::InvalidData("compressed header overruns the packet"));
    }

    persist.last_keyframe = keyframe;
    Ok(HeaderResult::Frame(Box::new(hdr)))
}

/// Derive the per-segment dequantizers and loop-filter levels from the
/// segment feature deltas. Quantizer indices clip to the 8-bit table range
/// before lookup, levels to the 6-bit range.
fn derive_seg_lookup(seg: &mut Segmentation, hdr: &FrameHeader) {
    let n = if seg.enabled { 8 } else { 1 };
    for i in 0..n {
        let feat = &mut seg.feat[i];
        let qyac = if feat.q_enabled {
            if seg.absolute_vals {
                i32::from(feat.q_val)
            } else {
                i32::from(hdr.yac_qi) + i32::from(feat.q_val)
            }
        } else {
            i32::from(hdr.yac_qi)
        };
        let qydc = clip_uintp2(qyac + i32::from(hdr.ydc_qdelta), 8) as usize;
        let quvdc = clip_uintp2(qyac + i32::from(hdr.uvdc_qdelta), 8) as usize;
        let quvac = clip_uintp2(qyac + i32::from(hdr.uvac_qdelta), 8) as usize;
        let qyac = clip_uintp2(qyac, 8) as usize;

        feat.qmul[0][0] = data::DC_QLOOKUP[qydc];
        feat.qmul[0][1] = data::AC_QLOOKUP[qyac];
        feat.qmul[1][0] = data::DC_QLOOKUP[quvdc];
        feat.qmul[1][1] = data::AC_QLOOKUP[quvac];

        let sh = hdr.filter.level >= 32;
        let lflvl = if feat.lf_enabled {
            if seg.absolute_vals {
                i32::from(feat.lf_val)
            } else {
                i32::from(hdr.filter.level) + i32::from(feat.lf_val)
            }
        } else {
            i32::from(hdr.filter.level)
        };
        let scale = |delta: i32| -> u8 { clip_uintp2(lflvl + (delta << sh as u32), 6) };
        feat.lflvl[0][0] = scale(i32::from(hdr.filter.ref_deltas[0]));
        feat.lflvl[0][1] = feat.lflvl[0][0];
        for j in 1..4 {
            for m in 0..2 {
                feat.lflvl[j][m] = scale(
                    i32::from(hdr.filter.ref_deltas[j]) + i32::from(hdr.filter.mode_deltas[m]),
                );
            }
        }
    }
}

/// Per-axis scale factor and fixed-point step for a reference whose
/// dimensions differ from the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefScale {
    /// 16-bit fixed-point ratio reference/current per axis; 1<<16 = unscaled
    pub scale: [u32; 2],
    /// source step per destination pixel in 1/16-pel units
    pub step: [u16; 2],
    pub scaled: bool,
}

impl RefScale {
    pub const UNSCALED: RefScale = RefScale {
        scale: [1 << 16, 1 << 16],
        step: [16, 16],
        scaled: false,
    };
}

/// Compute the scale factor for one reference, or fail when the dimensions
/// fall outside the supported ratio range.
pub fn ref_scale(ref_w: usize, ref_h: usize, w: usize, h: usize) -> Result<RefScale> {
    if ref_w == w && ref_h == h {
        return Ok(RefScale::UNSCALED);
    }
    if 2 * ref_w < w || 2 * ref_h < h || ref_w > 16 * w || ref_h > 16 * h {
        return Err(Error::BadScale);
    }
    let sx = ((ref_w as u64) << 16) / w as u64;
    let sy = ((ref_h as u64) << 16) / h as u64;
    if sx as u32 == REF_INVALID_SCALE || sy as u32 == REF_INVALID_SCALE {
        return Err(Error::BadScale);
    }
    Ok(RefScale {
        scale: [sx as u32, sy as u32],
        step: [(16 * sx >> 16) as u16, (16 * sy >> 16) as u16],
        scaled: true,
    })
}

/// Parse the arithmetic-coded compressed header: transform mode, coefficient
/// model updates, then (on inter frames) the mode, reference, and MV
/// probability updates. Forward updates land in `probs` only; the parent
/// context is untouched until end-of-frame.
pub fn parse_compressed_header(
    c: &mut RangeCoder,
    hdr: &FrameHeader,
    probs: &mut FrameProbs,
) -> Result<(TxfmMode, CompPredMode)> {
    c.check_marker()?;

    let txfmmode = if hdr.lossless {
        TxfmMode::Only4x4
    } else {
        let mut v = c.get_uint(2);
        if v == 3 {
            v += c.get();
        }
        let mode = TxfmMode::from_index(v as usize);
        if mode == TxfmMode::Switchable {
            for i in 0..2 {
                if c.get_bool(252) {
                    probs.p.tx8p[i] = update_prob(c, probs.p.tx8p[i]);
                }
            }
            for i in 0..2 {
                for j in 0..2 {
                    if c.get_bool(252) {
                        probs.p.tx16p[i][j] = update_prob(c, probs.p.tx16p[i][j]);
                    }
                }
            }
            for i in 0..2 {
                for j in 0..3 {
                    if c.get_bool(252) {
                        probs.p.tx32p[i][j] = update_prob(c, probs.p.tx32p[i][j]);
                    }
                }
            }
        }
        mode
    };

    // coefficient model updates, stopping at the largest coded tx size
    let max_tx = match txfmmode {
        TxfmMode::Only4x4 => 0,
        TxfmMode::Allow8 => 1,
        TxfmMode::Allow16 => 2,
        _ => 3,
    };
    for tx in 0..4 {
        if c.get() != 0 {
            for pl in 0..2 {
                for inter in 0..2 {
                    for band in 0..6 {
                        let n_ctx = if band == 0 { 3 } else { 6 };
                        for cx in 0..n_ctx {
                            for n in 0..3 {
                                if c.get_bool(252) {
                                    let p = probs.coef[tx][pl][inter][band][cx][n];
                                    probs.coef[tx][pl][inter][band][cx][n] = update_prob(c, p);
                                }
                            }
                        }
                    }
                }
            }
        }
        if tx == max_tx {
            break;
        }
    }

    for i in 0..3 {
        if c.get_bool(252) {
            probs.p.skip[i] = update_prob(c, probs.p.skip[i]);
        }
    }

    let mut comppredmode = CompPredMode::Single;
    if !hdr.keyframe && !hdr.intraonly {
        for i in 0..7 {
            for j in 0..3 {
                if c.get_bool(252) {
                    probs.p.mv_mode[i][j] = update_prob(c, probs.p.mv_mode[i][j]);
                }
            }
        }

        if hdr.filtermode == FilterMode::Switchable {
            for i in 0..4 {
                for j in 0..2 {
                    if c.get_bool(252) {
                        probs.p.filter[i][j] = update_prob(c, probs.p.filter[i][j]);
                    }
                }
            }
        }

        for i in 0..4 {
            if c.get_bool(252) {
                probs.p.intra[i] = update_prob(c, probs.p.intra[i]);
            }
        }

        if hdr.allow_comp_inter {
            let mut m = c.get();
            if m != 0 {
                m += c.get();
            }
            comppredmode = CompPredMode::from_index(m as usize);
            if comppredmode == CompPredMode::Switchable {
                for i in 0..5 {
                    if c.get_bool(252) {
                        probs.p.comp[i] = update_prob(c, probs.p.comp[i]);
                    }
                }
            }
        }

        if comppredmode != CompPredMode::Comp {
            for i in 0..5 {
                for j in 0..2 {
                    if c.get_bool(252) {
                        probs.p.single_ref[i][j] = update_prob(c, probs.p.single_ref[i][j]);
                    }
                }
            }
        }
        if comppredmode != CompPredMode::Single {
            for i in 0..5 {
                if c.get_bool(252) {
                    probs.p.comp_ref[i] = update_prob(c, probs.p.comp_ref[i]);
                }
            }
        }

        for i in 0..4 {
            for j in 0..9 {
                if c.get_bool(252) {
                    probs.p.y_mode[i][j] = update_prob(c, probs.p.y_mode[i][j]);
                }
            }
        }

        // partition updates walk the levels from 64x64 down
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..3 {
                    if c.get_bool(252) {
                        probs.p.partition[3 - i][j][k] =
                            update_prob(c, probs.p.partition[3 - i][j][k]);
                    }
                }
            }
        }

        // MV probabilities use the plain (7-bit << 1) | 1 update rule
        let mv_update = |c: &mut RangeCoder, p: &mut u8| {
            if c.get_bool(252) {
                *p = ((c.get_uint(7) as u8) << 1) | 1;
            }
        };
        for i in 0..3 {
            mv_update(c, &mut probs.p.mv_joint[i]);
        }
        for i in 0..2 {
            mv_update(c, &mut probs.p.mv_comp[i].sign);
            for j in 0..10 {
                mv_update(c, &mut probs.p.mv_comp[i].classes[j]);
            }
            mv_update(c, &mut probs.p.mv_comp[i].class0);
            for j in 0..10 {
                mv_update(c, &mut probs.p.mv_comp[i].bits[j]);
            }
        }
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..3 {
                    mv_update(c, &mut probs.p.mv_comp[i].class0_fp[j][k]);
                }
            }
            for j in 0..3 {
                mv_update(c, &mut probs.p.mv_comp[i].fp[j]);
            }
        }
        if hdr.highprecision_mvs {
            for i in 0..2 {
                mv_update(c, &mut probs.p.mv_comp[i].class0_hp);
                mv_update(c, &mut probs.p.mv_comp[i].hp);
            }
        }
    }

    Ok((txfmmode, comppredmode))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MSB-first bit assembler for crafting header fixtures.
    pub struct BitWriter {
        bits: Vec<bool>,
    }

    impl BitWriter {
        pub fn new() -> Self {
            BitWriter { bits: Vec::new() }
        }

        pub fn put(&mut self, v: u32, n: u32) {
            for i in (0..n).rev() {
                self.bits.push((v >> i) & 1 != 0);
            }
        }

        pub fn finish(mut self) -> Vec<u8> {
            while self.bits.len() % 8 != 0 {
                self.bits.push(false);
            }
            self.bits
                .chunks(8)
                .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
                .collect()
        }
    }

    fn keyframe_bits(w: &mut BitWriter, width: u32, height: u32) {
        w.put(0b10, 2); // frame marker
        w.put(0, 1); // profile low
        w.put(0, 1); // profile high
        w.put(0, 1); // not show-existing
        w.put(0, 1); // keyframe (inverted)
        w.put(1, 1); // show this frame
        w.put(0, 1); // not error-resilient
        w.put(SYNC_CODE, 24);
        w.put(0, 3); // colorspace
        w.put(0, 1); // tv range
        w.put(width - 1, 16);
        w.put(height - 1, 16);
        w.put(0, 1); // no render size
        w.put(1, 1); // refresh context
        w.put(0, 1); // not parallel
        w.put(0, 2); // frame context id
        w.put(0, 6); // lf level
        w.put(0, 3); // sharpness
        w.put(0, 1); // no lf deltas
        w.put(100, 8); // yac qi
        w.put(0, 3); // no quant deltas
        w.put(0, 1); // no segmentation
        // tiles: with few sb columns no col bits are coded
        w.put(0, 1); // log2_tile_rows = 0
        w.put(0, 16); // compressed header size
    }

    #[test]
    fn keyframe_header_round_trip() {
        let mut w = BitWriter::new();
        keyframe_bits(&mut w, 320, 240);
        let data = w.finish();
        let refs = [None; 8];
        let mut persist = HeaderPersist::default();
        let hdr = match parse_frame_header(&data, &refs, &mut persist).unwrap() {
            HeaderResult::Frame(h) => h,
            _ => panic!("expected a frame"),
        };
        assert!(hdr.keyframe);
        assert!(!hdr.invisible);
        assert_eq!(hdr.width, 320);
        assert_eq!(hdr.height, 240);
        assert_eq!(hdr.refresh_mask, 0xff);
        assert_eq!(hdr.yac_qi, 100);
        assert!(hdr.refreshctx);
        assert!(!hdr.lossless);
        assert_eq!(hdr.tiling.cols, 1);
        assert_eq!(hdr.tiling.rows, 1);
        // dequantizers derive from the quantizer lookup
        assert_eq!(hdr.seg.feat[0].qmul[0][0], data::DC_QLOOKUP[100]);
        assert_eq!(hdr.seg.feat[0].qmul[0][1], data::AC_QLOOKUP[100]);
    }

    #[test]
    fn show_existing_consumes_only_the_lead_bits() {
        let mut w = BitWriter::new();
        w.put(0b10, 2);
        w.put(0, 2); // profile 0
        w.put(1, 1); // show-existing
        w.put(3, 3); // slot 3
        let data = w.finish();
        let refs = [None; 8];
        let mut persist = HeaderPersist::default();
        match parse_frame_header(&data, &refs, &mut persist).unwrap() {
            HeaderResult::ShowExisting(idx) => assert_eq!(idx, 3),
            _ => panic!("expected show-existing"),
        }
    }

    #[test]
    fn bad_marker_and_sync_code() {
        let mut w = BitWriter::new();
        w.put(0b01, 2);
        let data = w.finish();
        let mut persist = HeaderPersist::default();
        assert!(matches!(
            parse_frame_header(&data, &[None; 8], &mut persist),
            Err(Error::BadMarker)
        ));

        let mut w = BitWriter::new();
        w.put(0b10, 2);
        w.put(0, 3); // profile 0, not show-existing
        w.put(0, 1); // keyframe
        w.put(1, 1);
        w.put(0, 1);
        w.put(0x123456, 24); // wrong sync code
        let data = w.finish();
        assert!(matches!(
            parse_frame_header(&data, &[None; 8], &mut persist),
            Err(Error::BadSyncCode)
        ));
    }

    #[test]
    fn inter_frame_requires_references() {
        let mut w = BitWriter::new();
        w.put(0b10, 2);
        w.put(0, 2);
        w.put(0, 1); // not show-existing
        w.put(1, 1); // inter frame
        w.put(1, 1); // visible
        w.put(0, 1); // not error-resilient
        w.put(0, 2); // reset context
        w.put(0b00000001, 8); // refresh slot 0
        for _ in 0..3 {
            w.put(2, 3); // all three point at empty slot 2
            w.put(0, 1);
        }
        let data = w.finish();
        let mut persist = HeaderPersist::default();
        assert!(matches!(
            parse_frame_header(&data, &[None; 8], &mut persist),
            Err(Error::RefUnavailable)
        ));
    }

    #[test]
    fn compound_reference_assignment_follows_sign_bias() {
        let mut w = BitWriter::new();
        w.put(0b10, 2);
        w.put(0, 2); // profile 0
        w.put(0, 1); // not show-existing
        w.put(1, 1); // inter frame
        w.put(1, 1); // visible
        w.put(0, 1); // not error-resilient
        w.put(0, 2); // reset context
        w.put(0b0000_0010, 8); // refresh slot 1
        // three references with sign biases (0, 0, 1): the last stands alone
        w.put(0, 3);
        w.put(0, 1);
        w.put(1, 3);
        w.put(0, 1);
        w.put(2, 3);
        w.put(1, 1);
        w.put(1, 1); // size from first reference
        w.put(0, 1); // no render size
        w.put(0, 1); // integer-precision MVs
        w.put(1, 1); // switchable filter
        w.put(1, 1); // refresh context
        w.put(0, 1); // not parallel
        w.put(0, 2); // context id
        w.put(0, 6); // lf level
        w.put(0, 3); // sharpness
        w.put(0, 1); // no lf deltas
        w.put(60, 8); // base quantizer
        w.put(0, 3); // no quant deltas
        w.put(0, 1); // no segmentation
        w.put(0, 1); // one tile row
        w.put(0, 16); // compressed header size
        let data = w.finish();

        let refs = [Some((64usize, 64usize)); 8];
        let mut persist = HeaderPersist::default();
        let hdr = match parse_frame_header(&data, &refs, &mut persist).unwrap() {
            HeaderResult::Frame(h) => h,
            _ => panic!("expected a frame"),
        };
        assert!(hdr.allow_comp_inter);
        assert_eq!(hdr.fixcompref, 2);
        assert_eq!(hdr.varcompref, [0, 1]);
        assert_eq!(hdr.refidx, [0, 1, 2]);
        assert_eq!(hdr.signbias, [false, false, true]);
        assert_eq!((hdr.width, hdr.height), (64, 64));
        assert_eq!(hdr.filtermode, FilterMode::Switchable);
    }

    #[test]
    fn scale_factors_for_half_size_reference() {
        let rs = ref_scale(320, 180, 640, 360).unwrap();
        assert!(rs.scaled);
        assert_eq!(rs.scale, [0x8000, 0x8000]);
        assert_eq!(rs.step, [8, 8]);

        assert_eq!(ref_scale(640, 360, 640, 360).unwrap(), RefScale::UNSCALED);
        // more than twice as large is out of range
        assert!(matches!(ref_scale(1300, 360, 640, 360), Err(Error::BadScale)));
        // more than sixteen times as small is out of range
        assert!(matches!(ref_scale(32, 360, 640, 360), Err(Error::BadScale)));
    }

    #[test]
    fn segmentation_quantizer_clips_to_table_range() {
        let mut w = BitWriter::new();
        keyframe_bits(&mut w, 64, 64);
        let data = w.finish();
        let mut persist = HeaderPersist::default();
        // force a huge positive q delta through persisted state
        persist.seg.enabled = false;
        let hdr = match parse_frame_header(&data, &[None; 8], &mut persist).unwrap() {
            HeaderResult::Frame(h) => h,
            _ => unreachable!(),
        };
        assert_eq!(hdr.seg.feat[0].qmul[0][1], data::AC_QLOOKUP[100]);
    }
}
