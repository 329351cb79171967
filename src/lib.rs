//! Decoder cores for block-based, motion-compensated, transform-coded video.
//!
//! The crate is organized around four cooperating layers: the bitstream
//! readers ([`rac`], [`vlc`]), the reference pool with its row-progress
//! signalling ([`pool`]), the DSP kernel tables ([`dsp`]), and one frame
//! director per codec flavor ([`vp9`], [`vc1`], [`dv`]). The VP9 decoder is
//! the complete pipeline; the VC-1 and DV flavors share the lower layers and
//! bring their own header and block logic.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#[macro_use]
extern crate log;

pub mod dsp;
pub mod dv;
pub mod pool;
pub mod rac;
pub mod vc1;
pub mod vlc;
pub mod vp9;

pub use crate::pool::{Picture, Progress};
pub use crate::vp9::Vp9Decoder;

/// Describes decoder failures.
///
/// Covers bitstream-level failures (short data, undecodable codes, marker
/// bits), header-level failures (sync codes, unsupported profiles, missing
/// or unscalable references), resource failures, and cooperative
/// cancellation.
#[derive(Debug)]
pub enum Error {
    /// A read ran past the end of the compressed buffer.
    ShortBitstream,
    /// A VLC or tree-coded symbol does not decode.
    InvalidCode,
    /// A marker bit that must be zero was set.
    BadMarker,
    /// Keyframe sync code mismatch.
    BadSyncCode,
    /// Unsupported profile or color-space combination.
    BadProfile(&'static str),
    /// A referenced slot holds no frame.
    RefUnavailable,
    /// Reference dimensions would require a scale outside the supported range.
    BadScale,
    /// Buffer allocation failed.
    Alloc,
    /// Cooperative cancellation was observed.
    Cancelled,
    /// Parse error caused by corrupt or malformed data.
    InvalidData(&'static str),
    /// Parse error caused by limited decoder support rather than invalid data.
    Unsupported(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

impl From<bitreader::BitReaderError> for Error {
    fn from(_: bitreader::BitReaderError) -> Error {
        Error::ShortBitstream
    }
}

impl From<fallible_collections::TryReserveError> for Error {
    fn from(_: fallible_collections::TryReserveError) -> Error {
        Error::Alloc
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Error {
        Error::InvalidData("integer conversion failed")
    }
}

/// Result shorthand using our Error enum.
pub type Result<T> = std::result::Result<T, Error>;

#[inline]
pub(crate) fn clip_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Clamp to an unsigned `bits`-wide range, like the header fields that are
/// specified as saturating rather than wrapping.
#[inline]
pub(crate) fn clip_uintp2(v: i32, bits: u32) -> u8 {
    v.clamp(0, (1 << bits) - 1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitreader_underflow_maps_to_short_bitstream() {
        let data = [0u8; 1];
        let mut r = bitreader::BitReader::new(&data);
        r.read_u8(8).unwrap();
        let err: Error = r.read_u8(1).unwrap_err().into();
        assert!(matches!(err, Error::ShortBitstream));
    }

    #[test]
    fn clip_helpers() {
        assert_eq!(clip_u8(-5), 0);
        assert_eq!(clip_u8(300), 255);
        assert_eq!(clip_uintp2(70, 6), 63);
        assert_eq!(clip_uintp2(-1, 6), 0);
    }
}
