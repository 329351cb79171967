//! Probability contexts, symbol counts, and the backward adaptation that
//! runs at the end of every frame that refreshes its context slot.

use crate::rac::RangeCoder;
use crate::vp9::data;

/// Per-component motion-vector probabilities.
#[derive(Debug, Clone, Copy)]
pub struct MvComponentProbs {
    pub sign: u8,
    pub classes: [u8; 10],
    pub class0: u8,
    pub bits: [u8; 10],
    pub class0_fp: [[u8; 3]; 2],
    pub fp: [u8; 3],
    pub class0_hp: u8,
    pub hp: u8,
}

/// Mode/tree probabilities adapted across frames.
#[derive(Debug, Clone, Copy)]
pub struct ProbContext {
    pub y_mode: [[u8; 9]; 4],
    pub uv_mode: [[u8; 9]; 10],
    pub filter: [[u8; 2]; 4],
    pub mv_mode: [[u8; 3]; 7],
    pub intra: [u8; 4],
    pub comp: [u8; 5],
    pub single_ref: [[u8; 2]; 5],
    pub comp_ref: [u8; 5],
    pub tx32p: [[u8; 3]; 2],
    pub tx16p: [[u8; 2]; 2],
    pub tx8p: [u8; 2],
    pub skip: [u8; 3],
    pub mv_joint: [u8; 3],
    pub mv_comp: [MvComponentProbs; 2],
    /// `[level][context][node]`, level 0 = 8x8
    pub partition: [[[u8; 3]; 4]; 4],
}

/// Coefficient-token context snapshot: `[band][ctx][node]` with three nodes
/// (end-of-block, zero, one).
#[derive(Debug, Clone, Copy, Default)]
pub struct CoefProbs(pub [[[u8; 3]; 6]; 6]);

/// One adaptable context slot: mode probabilities plus the coefficient
/// snapshots for each transform size, plane kind and intra/inter.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub p: ProbContext,
    pub coef: [[[CoefProbs; 2]; 2]; 4],
}

impl Default for FrameContext {
    fn default() -> Self {
        FrameContext {
            p: data::DEFAULT_PROBS,
            coef: *data::DEFAULT_COEF_PROBS,
        }
    }
}

/// Per-frame working coefficient probabilities: the three coded nodes plus
/// the lazily-filled magnitude cascade (nodes 3..10).
pub type CoefCascade = [[[u8; 11]; 6]; 6];

/// Working probabilities for the frame being decoded: forward updates land
/// here, never in the parent slot.
#[derive(Clone)]
pub struct FrameProbs {
    pub p: ProbContext,
    pub coef: [[[CoefCascade; 2]; 2]; 4],
    pub seg: [u8; 7],
    pub seg_pred: [u8; 3],
}

impl FrameProbs {
    pub fn from_context(ctx: &FrameContext) -> FrameProbs {
        let mut coef = [[[[[[0u8; 11]; 6]; 6]; 2]; 2]; 4];
        for tx in 0..4 {
            for pl in 0..2 {
                for inter in 0..2 {
                    for band in 0..6 {
                        for c in 0..6 {
                            coef[tx][pl][inter][band][c][..3]
                                .copy_from_slice(&ctx.coef[tx][pl][inter].0[band][c]);
                        }
                    }
                }
            }
        }
        FrameProbs {
            p: ctx.p,
            coef,
            seg: [255; 7],
            seg_pred: [255; 3],
        }
    }
}

/// Symbol occurrence counts collected while decoding one frame.
#[derive(Clone)]
pub struct Counts {
    pub y_mode: [[u32; 10]; 4],
    pub uv_mode: [[u32; 10]; 10],
    pub filter: [[u32; 3]; 4],
    pub mv_mode: [[u32; 4]; 7],
    pub intra: [[u32; 2]; 4],
    pub comp: [[u32; 2]; 5],
    pub single_ref: [[[u32; 2]; 2]; 5],
    pub comp_ref: [[u32; 2]; 5],
    pub tx32p: [[u32; 4]; 2],
    pub tx16p: [[u32; 3]; 2],
    pub tx8p: [[u32; 2]; 2],
    pub skip: [[u32; 2]; 3],
    pub mv_joint: [u32; 4],
    pub mv_comp: [MvComponentCounts; 2],
    pub partition: [[[u32; 4]; 4]; 4],
    pub coef: [[[[[[u32; 3]; 6]; 6]; 2]; 2]; 4],
    pub eob: [[[[[[u32; 2]; 6]; 6]; 2]; 2]; 4],
}

#[derive(Clone, Copy, Default)]
pub struct MvComponentCounts {
    pub sign: [u32; 2],
    pub classes: [u32; 11],
    pub class0: [u32; 2],
    pub bits: [[u32; 2]; 10],
    pub class0_fp: [[u32; 4]; 2],
    pub fp: [u32; 4],
    pub class0_hp: [u32; 2],
    pub hp: [u32; 2],
}

impl Default for Counts {
    fn default() -> Self {
        Counts {
            y_mode: Default::default(),
            uv_mode: Default::default(),
            filter: Default::default(),
            mv_mode: Default::default(),
            intra: Default::default(),
            comp: Default::default(),
            single_ref: Default::default(),
            comp_ref: Default::default(),
            tx32p: Default::default(),
            tx16p: Default::default(),
            tx8p: Default::default(),
            skip: Default::default(),
            mv_joint: Default::default(),
            mv_comp: Default::default(),
            partition: Default::default(),
            coef: [[[[[[0; 3]; 6]; 6]; 2]; 2]; 4],
            eob: [[[[[[0; 2]; 6]; 6]; 2]; 2]; 4],
        }
    }
}

impl Counts {
    /// Zero everything; on keyframes and intra-only frames only the
    /// coefficient statistics are collected so only those need clearing.
    pub fn clear(&mut self, coef_only: bool) {
        if coef_only {
            self.coef = [[[[[[0; 3]; 6]; 6]; 2]; 2]; 4];
            self.eob = [[[[[[0; 2]; 6]; 6]; 2]; 2]; 4];
        } else {
            *self = Counts::default();
        }
    }
}

/// Move `p` towards the observed frequency of `(c0, c1)`.
///
/// `max_count` saturates the update weight; `update_factor` is 128, or 112
/// on the first inter frame after a keyframe.
pub fn adapt_prob(p: &mut u8, c0: u32, c1: u32, max_count: u32, update_factor: u32) {
    let ct = c0 + c1;
    if ct == 0 {
        return;
    }
    let factor = update_factor * ct.min(max_count) / max_count;
    let p1 = u32::from(*p);
    let p2 = ((((u64::from(c0)) << 8) + u64::from(ct >> 1)) / u64::from(ct)) as u32;
    let p2 = p2.clamp(1, 255);
    *p = (p1 as i32 + (((p2 as i32 - p1 as i32) * factor as i32 + 128) >> 8)) as u8;
}

/// Inverse of the recentering used by differential forward updates.
fn inv_recenter_nonneg(v: i32, m: i32) -> i32 {
    if v > 2 * m {
        v
    } else if v & 1 != 0 {
        m - ((v + 1) >> 1)
    } else {
        m + (v >> 1)
    }
}

/// Read one differential forward probability update. Small deltas come
/// cheap; large ones pay a longer code, and everything recenters around the
/// previous value.
pub fn update_prob(c: &mut RangeCoder, p: u8) -> u8 {
    let d = if c.get() == 0 {
        c.get_uint(4) as i32
    } else if c.get() == 0 {
        c.get_uint(4) as i32 + 16
    } else if c.get() == 0 {
        c.get_uint(5) as i32 + 32
    } else {
        let mut d = c.get_uint(7) as i32;
        if d >= 65 {
            d = (d << 1) - 65 + c.get() as i32;
            d = d.min(189);
        }
        d + 64
    };
    let m = i32::from(data::INV_MAP_TABLE[d as usize]);
    if p <= 128 {
        (1 + inv_recenter_nonneg(m, i32::from(p) - 1)) as u8
    } else {
        (255 - inv_recenter_nonneg(m, 255 - i32::from(p))) as u8
    }
}

/// End-of-frame backward adaptation (run when the frame refreshes its
/// context and parallel mode is off). Mirrors the decode-side tree shapes:
/// each interior node adapts against the count mass of its two subtrees.
pub fn adapt(ctx: &mut FrameContext, cur: &FrameProbs, counts: &Counts, header: &AdaptHints) {
    let uf = if header.keyframe_like { 112 } else { 128 };

    // coefficients
    for tx in 0..4 {
        for pl in 0..2 {
            for inter in 0..2 {
                for band in 0..6 {
                    let n_ctx = if band == 0 { 3 } else { 6 };
                    for cx in 0..n_ctx {
                        let pp = &mut ctx.coef[tx][pl][inter].0[band][cx];
                        let e = &counts.eob[tx][pl][inter][band][cx];
                        let c = &counts.coef[tx][pl][inter][band][cx];
                        adapt_prob(&mut pp[0], e[0], e[1], 24, uf);
                        adapt_prob(&mut pp[1], c[0], c[1] + c[2], 24, uf);
                        adapt_prob(&mut pp[2], c[1], c[2], 24, uf);
                    }
                }
            }
        }
    }

    if header.intra_frame {
        // mode statistics are not collected on intra frames; carry over the
        // forward-updated values verbatim
        ctx.p.skip = cur.p.skip;
        ctx.p.tx32p = cur.p.tx32p;
        ctx.p.tx16p = cur.p.tx16p;
        ctx.p.tx8p = cur.p.tx8p;
        return;
    }

    let p = &mut ctx.p;

    for i in 0..3 {
        adapt_prob(&mut p.skip[i], counts.skip[i][0], counts.skip[i][1], 20, 128);
    }
    for i in 0..4 {
        adapt_prob(&mut p.intra[i], counts.intra[i][0], counts.intra[i][1], 20, 128);
    }

    if header.comp_pred_switchable {
        for i in 0..5 {
            adapt_prob(&mut p.comp[i], counts.comp[i][0], counts.comp[i][1], 20, 128);
        }
    }
    if header.comp_pred_any {
        for i in 0..5 {
            adapt_prob(
                &mut p.comp_ref[i],
                counts.comp_ref[i][0],
                counts.comp_ref[i][1],
                20,
                128,
            );
        }
    }
    if header.single_pred_any {
        for i in 0..5 {
            let c = &counts.single_ref[i];
            adapt_prob(&mut p.single_ref[i][0], c[0][0], c[0][1], 20, 128);
            adapt_prob(&mut p.single_ref[i][1], c[1][0], c[1][1], 20, 128);
        }
    }

    for i in 0..4 {
        for j in 0..4 {
            let pp = &mut p.partition[i][j];
            let c = &counts.partition[i][j];
            adapt_prob(&mut pp[0], c[0], c[1] + c[2] + c[3], 20, 128);
            adapt_prob(&mut pp[1], c[1], c[2] + c[3], 20, 128);
            adapt_prob(&mut pp[2], c[2], c[3], 20, 128);
        }
    }

    if header.tx_switchable {
        for i in 0..2 {
            let c16 = &counts.tx16p[i];
            let c32 = &counts.tx32p[i];
            adapt_prob(&mut p.tx8p[i], counts.tx8p[i][0], counts.tx8p[i][1], 20, 128);
            adapt_prob(&mut p.tx16p[i][0], c16[0], c16[1] + c16[2], 20, 128);
            adapt_prob(&mut p.tx16p[i][1], c16[1], c16[2], 20, 128);
            adapt_prob(&mut p.tx32p[i][0], c32[0], c32[1] + c32[2] + c32[3], 20, 128);
            adapt_prob(&mut p.tx32p[i][1], c32[1], c32[2] + c32[3], 20, 128);
            adapt_prob(&mut p.tx32p[i][2], c32[2], c32[3], 20, 128);
        }
    }

    if header.filter_switchable {
        for i in 0..4 {
            let pp = &mut p.filter[i];
            let c = &counts.filter[i];
            adapt_prob(&mut pp[0], c[0], c[1] + c[2], 20, 128);
            adapt_prob(&mut pp[1], c[1], c[2], 20, 128);
        }
    }

    // inter modes: tree order is zero, nearest, near, new
    for i in 0..7 {
        let pp = &mut p.mv_mode[i];
        let c = &counts.mv_mode[i];
        adapt_prob(&mut pp[0], c[2], c[1] + c[0] + c[3], 20, 128);
        adapt_prob(&mut pp[1], c[0], c[1] + c[3], 20, 128);
        adapt_prob(&mut pp[2], c[1], c[3], 20, 128);
    }

    {
        let pp = &mut p.mv_joint;
        let c = &counts.mv_joint;
        adapt_prob(&mut pp[0], c[0], c[1] + c[2] + c[3], 20, 128);
        adapt_prob(&mut pp[1], c[1], c[2] + c[3], 20, 128);
        adapt_prob(&mut pp[2], c[2], c[3], 20, 128);
    }

    for i in 0..2 {
        let comp = &mut p.mv_comp[i];
        let cc = &counts.mv_comp[i];

        adapt_prob(&mut comp.sign, cc.sign[0], cc.sign[1], 20, 128);

        let c = &cc.classes;
        let mut sum: u32 = c[1..11].iter().sum();
        adapt_prob(&mut comp.classes[0], c[0], sum, 20, 128);
        sum -= c[1];
        adapt_prob(&mut comp.classes[1], c[1], sum, 20, 128);
        sum -= c[2] + c[3];
        adapt_prob(&mut comp.classes[2], c[2] + c[3], sum, 20, 128);
        adapt_prob(&mut comp.classes[3], c[2], c[3], 20, 128);
        sum -= c[4] + c[5];
        adapt_prob(&mut comp.classes[4], c[4] + c[5], sum, 20, 128);
        adapt_prob(&mut comp.classes[5], c[4], c[5], 20, 128);
        sum -= c[6];
        adapt_prob(&mut comp.classes[6], c[6], sum, 20, 128);
        adapt_prob(&mut comp.classes[7], c[7] + c[8], c[9] + c[10], 20, 128);
        adapt_prob(&mut comp.classes[8], c[7], c[8], 20, 128);
        adapt_prob(&mut comp.classes[9], c[9], c[10], 20, 128);

        adapt_prob(&mut comp.class0, cc.class0[0], cc.class0[1], 20, 128);
        for j in 0..10 {
            adapt_prob(&mut comp.bits[j], cc.bits[j][0], cc.bits[j][1], 20, 128);
        }
        for j in 0..2 {
            let pp = &mut comp.class0_fp[j];
            let c = &cc.class0_fp[j];
            adapt_prob(&mut pp[0], c[0], c[1] + c[2] + c[3], 20, 128);
            adapt_prob(&mut pp[1], c[1], c[2] + c[3], 20, 128);
            adapt_prob(&mut pp[2], c[2], c[3], 20, 128);
        }
        {
            let pp = &mut comp.fp;
            let c = &cc.fp;
            adapt_prob(&mut pp[0], c[0], c[1] + c[2] + c[3], 20, 128);
            adapt_prob(&mut pp[1], c[1], c[2] + c[3], 20, 128);
            adapt_prob(&mut pp[2], c[2], c[3], 20, 128);
        }
        if header.high_precision_mvs {
            adapt_prob(&mut comp.class0_hp, cc.class0_hp[0], cc.class0_hp[1], 20, 128);
            adapt_prob(&mut comp.hp, cc.hp[0], cc.hp[1], 20, 128);
        }
    }

    // intra mode trees, y then uv: the tree visits dc, tm, vert, then the
    // hor/diagonal subtree
    for i in 0..4 {
        adapt_mode_tree(&mut p.y_mode[i], &counts.y_mode[i]);
    }
    for i in 0..10 {
        adapt_mode_tree(&mut p.uv_mode[i], &counts.uv_mode[i]);
    }
}

fn adapt_mode_tree(pp: &mut [u8; 9], c: &[u32; 10]) {
    use data::*;
    let mut sum = c[VERT_PRED as usize]
        + c[HOR_PRED as usize]
        + c[DIAG_DOWN_LEFT_PRED as usize]
        + c[DIAG_DOWN_RIGHT_PRED as usize]
        + c[VERT_RIGHT_PRED as usize]
        + c[HOR_DOWN_PRED as usize]
        + c[VERT_LEFT_PRED as usize]
        + c[HOR_UP_PRED as usize]
        + c[TM_PRED as usize];
    adapt_prob(&mut pp[0], c[DC_PRED as usize], sum, 20, 128);
    sum -= c[TM_PRED as usize];
    adapt_prob(&mut pp[1], c[TM_PRED as usize], sum, 20, 128);
    sum -= c[VERT_PRED as usize];
    adapt_prob(&mut pp[2], c[VERT_PRED as usize], sum, 20, 128);
    let s2 = c[HOR_PRED as usize] + c[DIAG_DOWN_RIGHT_PRED as usize] + c[VERT_RIGHT_PRED as usize];
    sum -= s2;
    adapt_prob(&mut pp[3], s2, sum, 20, 128);
    let s2b = s2 - c[HOR_PRED as usize];
    adapt_prob(&mut pp[4], c[HOR_PRED as usize], s2b, 20, 128);
    adapt_prob(
        &mut pp[5],
        c[DIAG_DOWN_RIGHT_PRED as usize],
        c[VERT_RIGHT_PRED as usize],
        20,
        128,
    );
    sum -= c[DIAG_DOWN_LEFT_PRED as usize];
    adapt_prob(&mut pp[6], c[DIAG_DOWN_LEFT_PRED as usize], sum, 20, 128);
    sum -= c[VERT_LEFT_PRED as usize];
    adapt_prob(&mut pp[7], c[VERT_LEFT_PRED as usize], sum, 20, 128);
    adapt_prob(
        &mut pp[8],
        c[HOR_DOWN_PRED as usize],
        c[HOR_UP_PRED as usize],
        20,
        128,
    );
}

/// The header-derived facts adaptation needs, so it does not have to see
/// the whole frame header.
pub struct AdaptHints {
    pub keyframe_like: bool,
    pub intra_frame: bool,
    pub high_precision_mvs: bool,
    pub tx_switchable: bool,
    pub filter_switchable: bool,
    pub comp_pred_switchable: bool,
    pub comp_pred_any: bool,
    pub single_pred_any: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_counts_leave_probability_unchanged() {
        for p0 in [1u8, 50, 128, 200, 255] {
            let mut p = p0;
            adapt_prob(&mut p, 0, 0, 20, 128);
            assert_eq!(p, p0);
        }
    }

    #[test]
    fn balanced_counts_move_towards_midpoint() {
        for p0 in [1u8, 50, 128, 200, 255] {
            for ct in [1u32, 5, 20, 100] {
                let mut p = p0;
                adapt_prob(&mut p, ct, ct, 20, 128);
                let before = (i32::from(p0) - 128).abs();
                let after = (i32::from(p) - 128).abs();
                assert!(after <= before, "p0={} ct={} -> {}", p0, ct, p);
            }
        }
    }

    #[test]
    fn adaptation_is_idempotent_at_the_fixpoint() {
        // counts that exactly match the probability, at saturating weight
        for p0 in [32u8, 64, 128, 192] {
            let c0 = u32::from(p0) * 10;
            let c1 = (256 - u32::from(p0)) * 10;
            let mut p = p0;
            adapt_prob(&mut p, c0, c1, 20, 128);
            assert_eq!(p, p0, "fixpoint moved for p={}", p0);
        }
    }

    #[test]
    fn update_prob_round_trips_basics() {
        // update_prob must always return a valid probability
        let data: Vec<u8> = (0..64).map(|i| (i * 37 + 11) as u8).collect();
        let mut c = RangeCoder::new(&data);
        for p in [1u8, 2, 127, 128, 129, 254, 255] {
            let q = update_prob(&mut c, p);
            assert!((1..=255).contains(&q));
        }
    }

    #[test]
    fn frame_probs_inherit_context_snapshot() {
        let ctx = FrameContext::default();
        let probs = FrameProbs::from_context(&ctx);
        assert_eq!(probs.p.skip, ctx.p.skip);
        assert_eq!(
            probs.coef[0][0][0][1][2][..3],
            ctx.coef[0][0][0].0[1][2][..]
        );
        // cascade slots start unfilled
        assert_eq!(probs.coef[0][0][0][1][2][3], 0);
    }

    #[test]
    fn coefficient_adaptation_follows_counts() {
        let mut ctx = FrameContext::default();
        let cur = FrameProbs::from_context(&ctx);
        let mut counts = Counts::default();
        // eob always hit at tx=0, luma, intra, band 1, ctx 0
        counts.eob[0][0][0][1][0] = [100, 0];
        let before = ctx.coef[0][0][0].0[1][0][0];
        let hints = AdaptHints {
            keyframe_like: false,
            intra_frame: true,
            high_precision_mvs: false,
            tx_switchable: false,
            filter_switchable: false,
            comp_pred_switchable: false,
            comp_pred_any: false,
            single_pred_any: false,
        };
        adapt(&mut ctx, &cur, &counts, &hints);
        assert!(ctx.coef[0][0][0].0[1][0][0] > before);
    }
}
