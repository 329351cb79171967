//! DV intra flavor: VLC-coded 8x8 blocks in fixed-size video segments.
//!
//! A video segment is five compressed macroblocks of 80 bytes each; every
//! macroblock carries four luma and two chroma blocks. Coefficients that do
//! not fit their own block spill into later blocks of the same macroblock,
//! then into the rest of the segment, so decoding takes three passes over
//! the same bit budget. A codeword interrupted by a block's bit budget
//! resumes mid-code in the next pass, which is why the coefficient reader
//! keeps its accumulator in the per-block state instead of using the
//! block-oriented lookup tables.

use std::collections::VecDeque;

use bitreader::BitReader;
use once_cell::sync::Lazy;

use crate::dsp::Dsp;
use crate::pool::Plane;
use crate::vlc::{CodeDef, VlcTable};
use crate::{Error, Result};

/// Bit budget per block inside a compressed macroblock (after the 9-bit DC,
/// DCT mode and class bits are drawn from the same budget): four luma
/// blocks, two chroma blocks, following the four header bytes.
const BLOCK_SIZES: [usize; 6] = [112, 112, 112, 112, 80, 80];

pub const BLOCKS_PER_MB: usize = 6;
pub const MBS_PER_SEGMENT: usize = 5;
const MB_BYTES: usize = 80;

/// Quantizer step offsets per class.
const QUANT_OFFSET: [u8; 4] = [6, 3, 0, 1];

/// Extra left-shift per (quantizer step, frequency area) applied while
/// storing coefficients; higher steps and higher frequencies shift more.
static QUANT_SHIFTS: Lazy<[[u8; 4]; 22]> = Lazy::new(|| {
    let mut t = [[0u8; 4]; 22];
    for (q, row) in t.iter_mut().enumerate() {
        for (a, s) in row.iter_mut().enumerate() {
            *s = ((21 - q) / 6 + a / 2).min(7) as u8;
        }
    }
    t
});

/// Frequency areas of the 8x8 grid used to pick the shift column.
fn area_of(pos: usize) -> usize {
    let (r, c) = (pos >> 3, pos & 7);
    match r.max(c) {
        0..=1 => 0,
        2..=3 => 1,
        4..=5 => 2,
        _ => 3,
    }
}

struct RlEntry {
    run: u8,
    level: u8,
    len: u8,
}

const EOB_RUN: u8 = 64;

/// `(run, level)` alphabet with canonically assigned prefix codes. Runs
/// include the step past the previous coefficient; levels are followed by
/// one sign bit, so every non-zero-level code exists in two signed forms.
#[rustfmt::skip]
const RL_ALPHABET: [RlEntry; 34] = [
    RlEntry { run: 1, level: 1, len: 2 },
    RlEntry { run: 1, level: 2, len: 3 },
    RlEntry { run: 0, level: 0, len: 4 }, // end of block
    RlEntry { run: 2, level: 1, len: 4 },
    RlEntry { run: 1, level: 3, len: 4 },
    RlEntry { run: 1, level: 4, len: 5 },
    RlEntry { run: 3, level: 1, len: 5 },
    RlEntry { run: 4, level: 1, len: 5 },
    RlEntry { run: 1, level: 5, len: 6 },
    RlEntry { run: 1, level: 6, len: 6 },
    RlEntry { run: 2, level: 2, len: 6 },
    RlEntry { run: 5, level: 1, len: 6 },
    RlEntry { run: 6, level: 1, len: 6 },
    RlEntry { run: 1, level: 7, len: 7 },
    RlEntry { run: 1, level: 8, len: 7 },
    RlEntry { run: 2, level: 3, len: 7 },
    RlEntry { run: 3, level: 2, len: 7 },
    RlEntry { run: 7, level: 1, len: 7 },
    RlEntry { run: 8, level: 1, len: 7 },
    RlEntry { run: 1, level: 9, len: 8 },
    RlEntry { run: 1, level: 10, len: 8 },
    RlEntry { run: 1, level: 11, len: 8 },
    RlEntry { run: 2, level: 4, len: 8 },
    RlEntry { run: 4, level: 2, len: 8 },
    RlEntry { run: 9, level: 1, len: 8 },
    RlEntry { run: 10, level: 1, len: 8 },
    RlEntry { run: 1, level: 12, len: 9 },
    RlEntry { run: 1, level: 13, len: 9 },
    RlEntry { run: 2, level: 5, len: 9 },
    RlEntry { run: 3, level: 3, len: 9 },
    RlEntry { run: 5, level: 2, len: 9 },
    RlEntry { run: 11, level: 1, len: 9 },
    RlEntry { run: 12, level: 1, len: 9 },
    RlEntry { run: 13, level: 1, len: 9 },
];

const MAX_RL_LEN: u8 = 10; // longest alphabet code plus its sign bit

struct DvTables {
    /// `(len, code)` -> `(run, level)`, walked bit by bit
    codes: Vec<(u8, u32, u8, i16)>,
    zigzag: [[u8; 64]; 2],
}

static TABLES: Lazy<DvTables> = Lazy::new(|| {
    let mut defs = Vec::new();
    let mut codes = Vec::new();
    let mut code = 0u32;
    let mut prev_len = RL_ALPHABET[0].len + u8::from(RL_ALPHABET[0].level != 0);
    for e in RL_ALPHABET.iter() {
        let signed = e.level != 0;
        let variants: &[i16] = if signed {
            &[i16::from(e.level), -i16::from(e.level)]
        } else {
            &[0]
        };
        for &lvl in variants {
            let len = e.len + u8::from(signed);
            code <<= len - prev_len;
            prev_len = len;
            defs.push(CodeDef {
                symbol: codes.len() as u16,
                code,
                len,
            });
            let run = if e.level == 0 { EOB_RUN } else { e.run };
            codes.push((len, code, run, lvl));
            code += 1;
        }
    }
    // prefix-freeness is what makes resumable decoding sound; verify it by
    // building a decoding table once
    VlcTable::build(8, &defs).expect("run-length alphabet is prefix-free");

    let mut zz = [0u8; 64];
    let mut pos = 0usize;
    for d in 0..15 {
        let range: Vec<usize> = (0..=d).collect();
        let it: Box<dyn Iterator<Item = usize>> = if d % 2 == 0 {
            Box::new(range.into_iter().rev())
        } else {
            Box::new(range.into_iter())
        };
        for r in it {
            let c = d - r;
            if r < 8 && c < 8 {
                zz[pos] = (r * 8 + c) as u8;
                pos += 1;
            }
        }
    }
    let mut zz248 = [0u8; 64];
    for (i, &p) in zz.iter().enumerate() {
        // the 2x4x8 mode interleaves the two fields: even rows first
        let (r, c) = ((p >> 3) as usize, (p & 7) as usize);
        let half = r & 1;
        zz248[i] = (((r >> 1) + half * 4) * 8 + c) as u8;
    }
    DvTables {
        codes,
        zigzag: [zz, zz248],
    }
});

/// Decode state of one block across the three passes, including a codeword
/// accumulator for codes interrupted by a bit budget.
#[derive(Clone, Copy, Default)]
pub struct BlockInfo {
    pub pos: usize,
    pub dct_248: bool,
    shift_row: usize,
    acc: u32,
    acc_len: u8,
    done: bool,
}

impl BlockInfo {
    pub fn complete(&self) -> bool {
        self.done
    }
}

/// One segment's worth of dequantized coefficient blocks.
pub struct Segment {
    pub blocks: [[i32; 64]; MBS_PER_SEGMENT * BLOCKS_PER_MB],
    pub info: [BlockInfo; MBS_PER_SEGMENT * BLOCKS_PER_MB],
}

/// Continue reading coefficients for one block from a bit queue until it
/// completes or the queue drains.
fn decode_ac(bits: &mut VecDeque<bool>, block: &mut [i32; 64], info: &mut BlockInfo) -> Result<()> {
    let t = &*TABLES;
    let scan = &t.zigzag[usize::from(info.dct_248)];
    while !info.done {
        let bit = match bits.pop_front() {
            Some(b) => b,
            None => return Ok(()), // resume in a later pass
        };
        info.acc = (info.acc << 1) | u32::from(bit);
        info.acc_len += 1;
        if info.acc_len > MAX_RL_LEN {
            return Err(Error::InvalidCode);
        }
        let hit = t
            .codes
            .iter()
            .find(|&&(len, code, _, _)| len == info.acc_len && code == info.acc);
        let (run, level) = match hit {
            Some(&(_, _, run, level)) => (run, level),
            None => continue,
        };
        info.acc = 0;
        info.acc_len = 0;
        if run == EOB_RUN {
            info.pos = 64;
            info.done = true;
            break;
        }
        info.pos += run as usize;
        if info.pos >= 64 {
            info.done = true;
            break;
        }
        let zz = scan[info.pos] as usize;
        let shift = QUANT_SHIFTS[info.shift_row][area_of(zz)];
        block[zz] = i32::from(level) << shift;
    }
    Ok(())
}

fn queue_bits(r: &mut BitReader, n: usize, q: &mut VecDeque<bool>) -> Result<()> {
    for _ in 0..n {
        q.push_back(r.read_bool()?);
    }
    Ok(())
}

/// Decode one 400-byte video segment into coefficient blocks, running the
/// block, macroblock, and segment coefficient passes.
pub fn decode_video_segment(data: &[u8]) -> Result<Segment> {
    if data.len() < MBS_PER_SEGMENT * MB_BYTES {
        return Err(Error::ShortBitstream);
    }
    let mut seg = Segment {
        blocks: [[0; 64]; 30],
        info: [BlockInfo::default(); 30],
    };
    let mut seg_spill: VecDeque<bool> = VecDeque::new();

    for mb in 0..MBS_PER_SEGMENT {
        let mb_data = &data[mb * MB_BYTES..(mb + 1) * MB_BYTES];
        let quant = usize::from(mb_data[3] & 0x0f);
        let mut mb_spill: VecDeque<bool> = VecDeque::new();

        // pass 1: each block decodes from its own bit budget; finished
        // blocks donate their leftover bits to the macroblock
        let mut r = BitReader::new(mb_data);
        r.skip(32)?;
        for blk in 0..BLOCKS_PER_MB {
            let idx = mb * BLOCKS_PER_MB + blk;
            let dc = r.read_i16(9)? as i32;
            let dct_248 = r.read_bool()?;
            let class = usize::from(r.read_u8(2)?);

            let info = &mut seg.info[idx];
            info.dct_248 = dct_248;
            info.shift_row = (quant + usize::from(QUANT_OFFSET[class])).min(21);
            // the overwrite-style IDCT expects the mid-gray offset folded
            // into the DC term
            seg.blocks[idx][0] = (dc << 2) + 1024;

            let mut own: VecDeque<bool> = VecDeque::new();
            queue_bits(&mut r, BLOCK_SIZES[blk] - 12, &mut own)?;
            decode_ac(&mut own, &mut seg.blocks[idx], &mut seg.info[idx])?;
            if seg.info[idx].done {
                mb_spill.append(&mut own);
            }
        }

        // pass 2: unfinished blocks continue, in order, from the
        // macroblock spill
        for blk in 0..BLOCKS_PER_MB {
            let idx = mb * BLOCKS_PER_MB + blk;
            if !seg.info[idx].done {
                decode_ac(&mut mb_spill, &mut seg.blocks[idx], &mut seg.info[idx])?;
                if !seg.info[idx].done {
                    break;
                }
            }
        }
        if seg
            .info
            .iter()
            .skip(mb * BLOCKS_PER_MB)
            .take(BLOCKS_PER_MB)
            .all(|i| i.done)
        {
            seg_spill.append(&mut mb_spill);
        }
    }

    // pass 3: the remaining blocks drain the segment-level spill
    for idx in 0..MBS_PER_SEGMENT * BLOCKS_PER_MB {
        if !seg.info[idx].done {
            decode_ac(&mut seg_spill, &mut seg.blocks[idx], &mut seg.info[idx])?;
            if !seg.info[idx].done {
                debug!(
                    "block {} ran out of coefficients at position {}",
                    idx, seg.info[idx].pos
                );
            }
        }
    }

    Ok(seg)
}

/// Inverse-transform one decoded block into a plane at `(x, y)`.
pub fn reconstruct_block(dsp: &Dsp, plane: &mut Plane, x: usize, y: usize, block: &[i32; 64]) {
    let stride = plane.stride();
    let off = y * stride + x;
    (dsp.idct8x8_put)(plane.data_mut(), off, stride, block);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_build_and_cover_sign_pairs() {
        let t = &*TABLES;
        assert_eq!(t.codes.len(), (RL_ALPHABET.len() - 1) * 2 + 1);
        assert_eq!(
            t.codes.iter().filter(|&&(_, _, r, _)| r == EOB_RUN).count(),
            1
        );
    }

    #[test]
    fn zigzags_are_permutations() {
        for zz in TABLES.zigzag.iter() {
            let mut seen = [false; 64];
            for &p in zz.iter() {
                assert!(!seen[p as usize]);
                seen[p as usize] = true;
            }
        }
        assert_eq!(TABLES.zigzag[0][0], 0);
        assert_eq!(TABLES.zigzag[0][1], 1);
        assert_eq!(TABLES.zigzag[0][2], 8);
    }

    #[test]
    fn codeword_resumes_across_queue_boundaries() {
        // feed the first half of a two-bit codeword, then the rest: the
        // accumulator must survive the drain
        let t = &*TABLES;
        let (len, code, run, level) = t.codes[0];
        assert_eq!(len, 3); // smallest signed code: 2 bits plus sign
        let mut info = BlockInfo::default();
        let mut block = [0i32; 64];
        info.shift_row = 21; // shift 0 in the lowest area

        let mut q: VecDeque<bool> = VecDeque::new();
        q.push_back(code & 0b100 != 0);
        decode_ac(&mut q, &mut block, &mut info).unwrap();
        assert!(!info.complete());

        q.push_back(code & 0b010 != 0);
        q.push_back(code & 0b001 != 0);
        decode_ac(&mut q, &mut block, &mut info).unwrap();
        assert_eq!(info.pos, run as usize);
        let zz = TABLES.zigzag[0][info.pos] as usize;
        assert_eq!(block[zz], i32::from(level));
    }

    #[test]
    fn all_zero_segment_decodes_deterministically() {
        // zero bits repeat the shortest codeword, a run of one with a
        // positive unit level, so the low scan positions fill in and the
        // budgets drain mid-code without ever finishing a block
        let data = [0u8; MBS_PER_SEGMENT * MB_BYTES];
        let seg = decode_video_segment(&data).unwrap();
        for idx in 0..30 {
            assert_eq!(seg.blocks[idx][0], 1024);
            assert!(seg.blocks[idx][1] > 0);
            assert!(!seg.info[idx].complete());
        }
    }

    #[test]
    fn short_segment_is_rejected() {
        let data = [0u8; 100];
        assert!(matches!(
            decode_video_segment(&data),
            Err(Error::ShortBitstream)
        ));
    }

    #[test]
    fn reconstructed_gray_block() {
        let dsp = Dsp::new();
        let mut pic = crate::pool::Picture::new(16, 16, (1, 1)).unwrap();
        let mut block = [0i32; 64];
        block[0] = 1024;
        reconstruct_block(&dsp, &mut pic.planes[0], 8, 8, &block);
        assert_eq!(pic.planes[0].row(8)[8], 128);
        assert_eq!(pic.planes[0].row(15)[15], 128);
        assert_eq!(pic.planes[0].row(0)[0], 0);
    }

    #[test]
    fn quant_shift_grows_with_frequency_area() {
        for row in QUANT_SHIFTS.iter() {
            for a in 1..4 {
                assert!(row[a] >= row[a - 1]);
            }
        }
        assert_eq!(area_of(0), 0);
        assert_eq!(area_of(63), 3);
    }
}
