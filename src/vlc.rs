//! Variable-length code tables.
//!
//! Decoding tables are two-level: a first-level `2^k` array maps a `k`-bit
//! peek either directly to `(symbol, length)` or to a subtable that resolves
//! the remaining bits. Tables are built once from `(symbol, codeword,
//! length)` triples and immutable afterwards; the codec flavors keep theirs
//! in process-wide one-shot statics.

use bitreader::BitReader;

use crate::{Error, Result};

/// Longest supported codeword.
pub const MAX_CODE_LEN: u8 = 32;

/// One `(symbol, codeword, length)` triple. The codeword occupies the low
/// `len` bits of `code` and is matched most-significant-bit first.
#[derive(Debug, Clone, Copy)]
pub struct CodeDef {
    pub symbol: u16,
    pub code: u32,
    pub len: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    /// `> 0`: symbol of that many bits. `< 0`: subtable of width `-len`.
    /// `0`: no code with this prefix.
    len: i8,
    /// Symbol for direct entries, subtable base index otherwise.
    payload: u32,
}

/// An immutable two-level VLC decoding table.
pub struct VlcTable {
    lookup_bits: u8,
    entries: Vec<Entry>,
}

impl VlcTable {
    /// Build a decoding table with a `lookup_bits`-wide first level.
    ///
    /// Fails with `InvalidData` when two codewords collide on a prefix or a
    /// codeword exceeds [`MAX_CODE_LEN`].
    pub fn build(lookup_bits: u8, codes: &[CodeDef]) -> Result<VlcTable> {
        if lookup_bits == 0 || lookup_bits > 16 {
            return Err(Error::InvalidData("bad vlc lookup width"));
        }
        for c in codes {
            if c.len == 0 || c.len > MAX_CODE_LEN {
                return Err(Error::InvalidData("vlc code length out of range"));
            }
            if c.len < 32 && c.code >> c.len != 0 {
                return Err(Error::InvalidData("vlc codeword wider than length"));
            }
        }
        let mut entries = Vec::new();
        build_level(&mut entries, lookup_bits, codes)?;
        Ok(VlcTable {
            lookup_bits,
            entries,
        })
    }

    /// Decode one symbol, consuming exactly the matched prefix.
    pub fn read(&self, r: &mut BitReader) -> Result<u16> {
        let mut base = 0usize;
        let mut width = self.lookup_bits;
        loop {
            let peek = peek_bits(r, width)?;
            let e = self.entries[base + peek as usize];
            if e.len > 0 {
                if e.len as u64 > r.remaining() {
                    return Err(Error::ShortBitstream);
                }
                r.skip(e.len as u64)?;
                return Ok(e.payload as u16);
            } else if e.len < 0 {
                if width as u64 > r.remaining() {
                    return Err(Error::ShortBitstream);
                }
                r.skip(width as u64)?;
                base = e.payload as usize;
                width = (-e.len) as u8;
            } else {
                return Err(Error::InvalidCode);
            }
        }
    }
}

/// Peek up to `width` bits without consuming them, padding with zeros when
/// the buffer runs out before `width` bits are available.
fn peek_bits(r: &BitReader, width: u8) -> Result<u32> {
    let mut peek = r.relative_reader();
    let avail = peek.remaining().min(width as u64) as u8;
    let v = if avail > 0 { peek.read_u32(avail)? } else { 0 };
    Ok(v << (width - avail))
}

fn build_level(entries: &mut Vec<Entry>, width: u8, codes: &[CodeDef]) -> Result<usize> {
    let base = entries.len();
    entries.resize(base + (1usize << width), Entry::default());

    // Direct entries first, replicated over the unused low index bits.
    for c in codes.iter().filter(|c| c.len <= width) {
        let repeat = 1usize << (width - c.len);
        let start = (c.code as usize) << (width - c.len);
        for idx in start..start + repeat {
            let e = &mut entries[base + idx];
            if e.len != 0 {
                return Err(Error::InvalidData("vlc prefix collision"));
            }
            *e = Entry {
                len: c.len as i8,
                payload: u32::from(c.symbol),
            };
        }
    }

    // Longer codes are grouped by their `width`-bit prefix into subtables.
    let mut long: Vec<&CodeDef> = codes.iter().filter(|c| c.len > width).collect();
    long.sort_by_key(|c| c.code >> (c.len - width));
    let mut i = 0;
    while i < long.len() {
        let prefix = long[i].code >> (long[i].len - width);
        let mut j = i;
        let mut max_len = 0;
        while j < long.len() && long[j].code >> (long[j].len - width) == prefix {
            max_len = max_len.max(long[j].len - width);
            j += 1;
        }
        let sub_width = max_len.min(width);
        let sub: Vec<CodeDef> = long[i..j]
            .iter()
            .map(|c| CodeDef {
                symbol: c.symbol,
                code: c.code & ((1u32 << (c.len - width)) - 1),
                len: c.len - width,
            })
            .collect();
        if entries[base + prefix as usize].len != 0 {
            return Err(Error::InvalidData("vlc prefix collision"));
        }
        entries[base + prefix as usize] = Entry {
            len: -(sub_width as i8),
            payload: 0, // patched below, the subtable is appended after this level
        };
        let sub_base = build_level(entries, sub_width, &sub)?;
        entries[base + prefix as usize].payload = sub_base as u32;
        i = j;
    }
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(symbol: u16, code: u32, len: u8) -> CodeDef {
        CodeDef { symbol, code, len }
    }

    // 0 -> A, 10 -> B, 110 -> C, 1110xx -> D..G (stresses the subtable path
    // with a 3-bit first level)
    fn sample_codes() -> Vec<CodeDef> {
        vec![
            def(0, 0b0, 1),
            def(1, 0b10, 2),
            def(2, 0b110, 3),
            def(3, 0b111000, 6),
            def(4, 0b111001, 6),
            def(5, 0b111010, 6),
            def(6, 0b111011, 6),
        ]
    }

    #[test]
    fn direct_and_subtable_reads() {
        let vlc = VlcTable::build(3, &sample_codes()).unwrap();
        // B A C E  =>  10 0 110 111001
        let data = [0b1001_1011, 0b1001_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(vlc.read(&mut r).unwrap(), 1);
        assert_eq!(vlc.read(&mut r).unwrap(), 0);
        assert_eq!(vlc.read(&mut r).unwrap(), 2);
        assert_eq!(vlc.read(&mut r).unwrap(), 4);
        assert_eq!(r.position(), 12);
    }

    #[test]
    fn unassigned_prefix_is_invalid_code() {
        let vlc = VlcTable::build(3, &sample_codes()).unwrap();
        // 1111xx matches no code
        let data = [0b1111_0000];
        let mut r = BitReader::new(&data);
        assert!(matches!(vlc.read(&mut r), Err(Error::InvalidCode)));
    }

    #[test]
    fn truncated_code_is_short_bitstream() {
        let vlc = VlcTable::build(3, &sample_codes()).unwrap();
        // only 4 bits left: '1110' promises a 6-bit code that never arrives
        let data = [0b0000_1110];
        let mut r = BitReader::new(&data);
        r.skip(4).unwrap();
        assert!(matches!(vlc.read(&mut r), Err(Error::ShortBitstream)));
    }

    #[test]
    fn prefix_collision_rejected() {
        let codes = vec![def(0, 0b10, 2), def(1, 0b101, 3)];
        assert!(matches!(
            VlcTable::build(4, &codes),
            Err(Error::InvalidData(_))
        ));
        let codes = vec![def(0, 0b10, 2), def(1, 0b10, 2)];
        assert!(VlcTable::build(4, &codes).is_err());
    }

    #[test]
    fn overlong_code_rejected() {
        let codes = vec![def(0, 0, 33)];
        assert!(VlcTable::build(8, &codes).is_err());
    }
}
