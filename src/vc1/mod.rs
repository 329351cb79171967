//! VC-1 / WMV3 frame-director flavor.
//!
//! Shares the bitstream and reference layers with the other decoders and
//! adds the VC-1 specific pieces: sequence / entry-point / picture headers
//! with the I/P/B/BI disambiguation (including field pairs), the intensity
//! compensation lookup tables with their last/next/current rotation, and
//! the two B-frame motion vector scaling rules.

pub mod header;
pub mod ic;
pub mod mv;

use once_cell::sync::Lazy;

use crate::pool::Picture;
use crate::vlc::{CodeDef, VlcTable};

pub use header::{
    field_pair_types, EntryPointHeader, FrameHeader, MvMode, Profile, SequenceHeader,
};
pub use ic::IntensityComp;

/// B-fraction denominator for direct-mode MV scaling.
pub const B_FRACTION_DEN: i32 = 256;

/// Numerators (over [`B_FRACTION_DEN`]) for the coded B-fractions. The
/// last two entries mark the invalid code and the BI-picture escape.
pub const BFRACTION_LUT: [i16; 23] = [
    128, 85, 170, 64, 192, 51, 102, 153, 204, 43, 215, 37, 74, 111, 148, 185, 222, 32, 96, 160,
    224, -1, 0,
];

/// Index of the BI escape in [`BFRACTION_LUT`].
pub const BFRACTION_BI: u16 = 22;
const BFRACTION_INVALID: u16 = 21;

/// The B-fraction code: seven short codes for the common fractions, longer
/// codes for the eighths, one invalid pattern and the BI escape.
pub static BFRACTION_VLC: Lazy<VlcTable> = Lazy::new(|| {
    let mut codes = Vec::new();
    for sym in 0..7u16 {
        codes.push(CodeDef {
            symbol: sym,
            code: u32::from(sym),
            len: 3,
        });
    }
    for sym in 7..21u16 {
        codes.push(CodeDef {
            symbol: sym,
            code: 112 + u32::from(sym) - 7,
            len: 7,
        });
    }
    codes.push(CodeDef {
        symbol: BFRACTION_INVALID,
        code: 126,
        len: 7,
    });
    codes.push(CodeDef {
        symbol: BFRACTION_BI,
        code: 127,
        len: 7,
    });
    VlcTable::build(3, &codes).expect("bfraction code table is prefix-free")
});

/// Cosmetic fallback for sprite streams whose sprite plane never arrived:
/// paint mid-gray rather than leaving uninitialized content. Not an error
/// path.
pub fn sprite_flush(pic: &mut Picture) {
    pic.planes[0].data_mut().fill(128);
    pic.planes[1].data_mut().fill(128);
    pic.planes[2].data_mut().fill(128);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitreader::BitReader;

    #[test]
    fn bfraction_half_is_shortest_code() {
        // '000' = 1/2
        let data = [0b0000_0000u8];
        let mut r = BitReader::new(&data);
        let sym = BFRACTION_VLC.read(&mut r).unwrap();
        assert_eq!(sym, 0);
        assert_eq!(BFRACTION_LUT[sym as usize], 128);
        assert_eq!(r.position(), 3);
    }

    #[test]
    fn bfraction_bi_escape() {
        let data = [0b1111_1110u8];
        let mut r = BitReader::new(&data);
        let sym = BFRACTION_VLC.read(&mut r).unwrap();
        assert_eq!(sym, BFRACTION_BI);
        assert_eq!(BFRACTION_LUT[sym as usize], 0);
    }

    #[test]
    fn sprite_flush_paints_mid_gray() {
        let mut pic = Picture::new(32, 32, (1, 1)).unwrap();
        sprite_flush(&mut pic);
        assert!(pic.planes[0].data().iter().all(|&v| v == 128));
        assert!(pic.planes[1].data().iter().all(|&v| v == 128));
    }
}
