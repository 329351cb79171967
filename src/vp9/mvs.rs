//! Motion vector prediction: candidate search over spatial and temporal
//! neighbors, differential component decode, and clamping.

use crate::pool::Mv;
use crate::vp9::block::TileDecoder;
use crate::vp9::data;
use crate::vp9::{Block, InterPredMode};
use crate::Result;

#[inline]
fn clamp_mv(mv: Mv, min: (i32, i32), max: (i32, i32)) -> Mv {
    Mv {
        x: i32::from(mv.x).clamp(min.0, max.0) as i16,
        y: i32::from(mv.y).clamp(min.1, max.1) as i16,
    }
}

/// Candidate accumulator: `nearest` takes the first usable vector, `near`
/// the second distinct one.
struct Picker {
    want_second: bool,
    first: Option<Mv>,
}

impl Picker {
    fn new(want_second: bool) -> Picker {
        Picker {
            want_second,
            first: None,
        }
    }

    /// Returns `Some(result)` once the search can stop.
    fn offer(&mut self, mv: Mv) -> Option<Mv> {
        if !self.want_second {
            return Some(mv);
        }
        match self.first {
            None => {
                self.first = Some(mv);
                None
            }
            Some(prev) if prev != mv => Some(mv),
            Some(_) => None,
        }
    }
}

impl<'a, 'd> TileDecoder<'a, 'd> {
    /// Assemble the ordered candidate list for `refidx` and return the
    /// NEAREST (idx 0) or NEAR (idx 1) prediction. `z` picks the component
    /// of compound pairs when reusing quadrant vectors; `sb` selects the
    /// sub-block shortcut paths, -1 disables them.
    ///
    /// Candidates from the sub-block shortcuts are deduplicated and
    /// returned unclamped; spatial and temporal candidates clamp before
    /// deduplication on inner sub-blocks and only at return otherwise.
    fn find_ref_mvs(&mut self, b: &Block, refidx: i8, z: usize, idx: usize, sb: i32) -> Result<Mv> {
        let (row, col, row7) = (b.row, b.col, b.row7);
        let offs = &data::MV_REF_BLK_OFF[b.bs.idx()];
        let mi_stride = self.cur.mi_stride();
        let clamp_early = sb > 0;
        let mut pick = Picker::new(idx != 0);

        macro_rules! offer {
            ($mv:expr) => {{
                let cand = if clamp_early {
                    clamp_mv($mv, b.min_mv, b.max_mv)
                } else {
                    $mv
                };
                if let Some(res) = pick.offer(cand) {
                    return Ok(if clamp_early {
                        res
                    } else {
                        clamp_mv(res, b.min_mv, b.max_mv)
                    });
                }
            }};
        }

        let mut first_spatial = 0;
        if sb >= 0 {
            // inner sub-blocks reuse already-decoded quadrant vectors
            // first, verbatim
            match sb {
                1 | 2 => {
                    if let Some(r) = pick.offer(b.mv[0][z]) {
                        return Ok(r);
                    }
                }
                3 => {
                    for i in [2usize, 1, 0] {
                        if let Some(r) = pick.offer(b.mv[i][z]) {
                            return Ok(r);
                        }
                    }
                }
                _ => {}
            }

            // the two immediate spatial neighbors, from the context strips
            if row > 0 {
                let pair = self.cur.mv_table[(row - 1) * mi_stride + col];
                if pair.ref_idx[0] == refidx {
                    offer!(self.above.mv[2 * col + (sb as usize & 1)][0]);
                } else if pair.ref_idx[1] == refidx {
                    offer!(self.above.mv[2 * col + (sb as usize & 1)][1]);
                }
            }
            if col > self.tile_col_start {
                let pair = self.cur.mv_table[row * mi_stride + col - 1];
                if pair.ref_idx[0] == refidx {
                    offer!(self.left.mv[2 * row7 + (sb as usize >> 1)][0]);
                } else if pair.ref_idx[1] == refidx {
                    offer!(self.left.mv[2 * row7 + (sb as usize >> 1)][1]);
                }
            }
            first_spatial = 2;
        }

        // previously decoded vectors in the neighborhood with the same
        // reference
        for off in &offs[first_spatial..] {
            let c = i64::from(off[0]) + col as i64;
            let r = i64::from(off[1]) + row as i64;
            if c < self.tile_col_start as i64
                || c >= self.cols as i64
                || r < 0
                || r >= self.rows as i64
            {
                continue;
            }
            let pair = self.cur.mv_table[r as usize * mi_stride + c as usize];
            if pair.ref_idx[0] == refidx {
                offer!(pair.mv[0]);
            } else if pair.ref_idx[1] == refidx {
                offer!(pair.mv[1]);
            }
        }

        // co-located vector in the previous frame
        if self.use_last_frame_mvs {
            if let Some(prev) = self.prev {
                prev.progress()
                    .wait_for((((row >> 3) << 6) + 7) as u32, 0, self.cancel)?;
                let pair = prev.mv_table[row * mi_stride + col];
                if pair.ref_idx[0] == refidx {
                    offer!(pair.mv[0]);
                } else if pair.ref_idx[1] == refidx {
                    offer!(pair.mv[1]);
                }
            }
        }

        // neighbors using a different reference: usable after a sign flip
        // when the sign biases disagree
        let bias = self.hdr.signbias;
        let flip = |mv: Mv, other: i8| -> Mv {
            if bias[other as usize] != bias[refidx as usize] {
                Mv { x: -mv.x, y: -mv.y }
            } else {
                mv
            }
        };
        for off in offs.iter() {
            let c = i64::from(off[0]) + col as i64;
            let r = i64::from(off[1]) + row as i64;
            if c < self.tile_col_start as i64
                || c >= self.cols as i64
                || r < 0
                || r >= self.rows as i64
            {
                continue;
            }
            let pair = self.cur.mv_table[r as usize * mi_stride + c as usize];
            if pair.ref_idx[0] != refidx && pair.ref_idx[0] >= 0 {
                offer!(flip(pair.mv[0], pair.ref_idx[0]));
            }
            if pair.ref_idx[1] != refidx && pair.ref_idx[1] >= 0 && pair.mv[1] != pair.mv[0] {
                offer!(flip(pair.mv[1], pair.ref_idx[1]));
            }
        }

        if self.use_last_frame_mvs {
            if let Some(prev) = self.prev {
                // progress was already awaited above
                let pair = prev.mv_table[row * mi_stride + col];
                if pair.ref_idx[0] != refidx && pair.ref_idx[0] >= 0 {
                    offer!(flip(pair.mv[0], pair.ref_idx[0]));
                }
                if pair.ref_idx[1] != refidx && pair.ref_idx[1] >= 0 && pair.mv[1] != pair.mv[0] {
                    offer!(flip(pair.mv[1], pair.ref_idx[1]));
                }
            }
        }

        // fewer than the requested number of distinct candidates: zero
        Ok(Mv::default())
    }

    /// One differential MV component: sign, class, integer bits, fractional
    /// and high-precision suffix.
    fn read_mv_component(&mut self, comp: usize, hp: bool) -> i32 {
        let probs = self.probs.p.mv_comp[comp];
        let sign = self.c.get_prob(probs.sign);
        self.counts.mv_comp[comp].sign[sign as usize] += 1;
        let class = self.c.get_tree(&data::MV_CLASS_TREE, &probs.classes);
        self.counts.mv_comp[comp].classes[class] += 1;

        let n;
        if class != 0 {
            let mut bits = 0;
            for m in 0..class {
                let bit = self.c.get_prob(probs.bits[m]);
                self.counts.mv_comp[comp].bits[m][bit as usize] += 1;
                bits |= bit << m;
            }
            let mut v = bits << 3;
            let fp = self.c.get_tree(&data::MV_FP_TREE, &probs.fp) as u32;
            self.counts.mv_comp[comp].fp[fp as usize] += 1;
            v |= fp << 1;
            if hp {
                let bit = self.c.get_prob(probs.hp);
                self.counts.mv_comp[comp].hp[bit as usize] += 1;
                v |= bit;
            } else {
                v |= 1;
                // the suffix is counted even when it is not coded
                self.counts.mv_comp[comp].hp[1] += 1;
            }
            n = v + (8 << class);
        } else {
            let c0 = self.c.get_prob(probs.class0);
            self.counts.mv_comp[comp].class0[c0 as usize] += 1;
            let fp = self.c.get_tree(&data::MV_FP_TREE, &probs.class0_fp[c0 as usize]) as u32;
            self.counts.mv_comp[comp].class0_fp[c0 as usize][fp as usize] += 1;
            let mut v = (c0 << 3) | (fp << 1);
            if hp {
                let bit = self.c.get_prob(probs.class0_hp);
                self.counts.mv_comp[comp].class0_hp[bit as usize] += 1;
                v |= bit;
            } else {
                v |= 1;
                self.counts.mv_comp[comp].class0_hp[1] += 1;
            }
            n = v;
        }

        let n = n as i32 + 1;
        if sign != 0 {
            -n
        } else {
            n
        }
    }

    /// Fill `b.mv[mv_idx]` for the block's mode: prediction plus, for
    /// NEWMV, a decoded differential. Vectors round to half-pel when the
    /// frame does not use high-precision MVs or the vector is large.
    pub(crate) fn fill_mv(&mut self, b: &mut Block, mv_idx: usize, sb: i32) -> Result<()> {
        let mode = InterPredMode::from_unified(b.mode[mv_idx]);
        if mode == InterPredMode::Zero {
            b.mv[mv_idx] = [Mv::default(); 2];
            return Ok(());
        }

        let n_refs = if b.comp { 2 } else { 1 };
        for r in 0..n_refs {
            let search_sb = if mode == InterPredMode::New { -1 } else { sb };
            let pred = self.find_ref_mvs(
                b,
                b.refs[r] as i8,
                r,
                usize::from(mode == InterPredMode::Near),
                search_sb,
            )?;
            let mut mv = pred;

            let hp = self.hdr.highprecision_mvs
                && i32::from(mv.x).abs() < 64
                && i32::from(mv.y).abs() < 64;
            if (mode == InterPredMode::New || sb == -1) && !hp {
                // round the prediction to half-pel
                if mv.y & 1 != 0 {
                    mv.y += if mv.y < 0 { 1 } else { -1 };
                }
                if mv.x & 1 != 0 {
                    mv.x += if mv.x < 0 { 1 } else { -1 };
                }
            }
            if mode == InterPredMode::New {
                let joint = self.c.get_tree(&data::MV_JOINT_TREE, &self.probs.p.mv_joint);
                self.counts.mv_joint[joint] += 1;
                if joint & 2 != 0 {
                    mv.y = mv.y.wrapping_add(self.read_mv_component(0, hp) as i16);
                }
                if joint & 1 != 0 {
                    mv.x = mv.x.wrapping_add(self.read_mv_component(1, hp) as i16);
                }
            }
            b.mv[mv_idx][r] = mv;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_respects_block_bounds() {
        let min = (-200, -100);
        let max = (300, 50);
        let mv = Mv { x: -500, y: 500 };
        assert_eq!(clamp_mv(mv, min, max), Mv { x: -200, y: 50 });
        let mv = Mv { x: 10, y: -20 };
        assert_eq!(clamp_mv(mv, min, max), mv);
    }

    #[test]
    fn picker_returns_first_or_second_distinct() {
        let mut p = Picker::new(false);
        assert_eq!(p.offer(Mv { x: 1, y: 1 }), Some(Mv { x: 1, y: 1 }));

        let mut p = Picker::new(true);
        assert_eq!(p.offer(Mv { x: 1, y: 1 }), None);
        // duplicate of the first candidate is not distinct
        assert_eq!(p.offer(Mv { x: 1, y: 1 }), None);
        assert_eq!(p.offer(Mv { x: 2, y: 0 }), Some(Mv { x: 2, y: 0 }));
    }
}
