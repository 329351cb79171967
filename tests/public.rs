// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end decode tests over hand-assembled bitstreams.

use blockdec::vp9::data;
use blockdec::{Error, Vp9Decoder};

/// MSB-first bit assembler for the uncompressed header.
struct BitWriter {
    bits: Vec<bool>,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter { bits: Vec::new() }
    }

    fn put(&mut self, v: u32, n: u32) {
        for i in (0..n).rev() {
            self.bits.push((v >> i) & 1 != 0);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
        self.bits
            .chunks(8)
            .map(|c| c.iter().fold(0u8, |a, &b| (a << 1) | b as u8))
            .collect()
    }
}

/// Matching boolean range encoder, carry propagation included, so the
/// arithmetic-coded parts can be produced symbol by symbol.
struct BoolWriter {
    low: u32,
    range: u32,
    count: i32,
    out: Vec<u8>,
}

impl BoolWriter {
    fn new() -> Self {
        BoolWriter {
            low: 0,
            range: 255,
            count: -24,
            out: Vec::new(),
        }
    }

    fn put(&mut self, prob: u8, bit: u32) {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        if bit != 0 {
            self.low += split;
            self.range -= split;
        } else {
            self.range = split;
        }
        let mut shift = (self.range.leading_zeros() - 24) as i32;
        self.range <<= shift;
        self.count += shift;
        if self.count >= 0 {
            let offset = shift - self.count;
            if (self.low << (offset - 1)) & 0x8000_0000 != 0 {
                for x in (0..self.out.len()).rev() {
                    if self.out[x] == 0xff {
                        self.out[x] = 0;
                    } else {
                        self.out[x] += 1;
                        break;
                    }
                }
            }
            self.out.push((self.low >> (24 - offset)) as u8);
            self.low <<= offset;
            self.low &= 0xff_ffff;
            shift = self.count;
            self.count -= 8;
        }
        self.low <<= shift;
    }

    fn finish(mut self) -> Vec<u8> {
        for _ in 0..32 {
            self.put(128, 0);
        }
        self.out
    }
}

/// A 16x16 keyframe: one forced-split superblock down to a single 16x16
/// intra DC block with the skip flag set, so the whole frame reconstructs
/// to flat mid-gray.
fn flat_gray_keyframe() -> Vec<u8> {
    // arithmetic-coded compressed header
    let mut ch = BoolWriter::new();
    ch.put(128, 0); // marker
    ch.put(128, 0); // transform mode, low bit
    ch.put(128, 0); // transform mode, high bit: 4x4 only
    ch.put(128, 0); // no coefficient updates for 4x4
    for _ in 0..3 {
        ch.put(252, 0); // no skip-probability updates
    }
    let compressed = ch.finish();

    // tile payload: partition none at the 16x16 level, skip, DC/DC modes
    let mut td = BoolWriter::new();
    td.put(128, 0); // marker
    td.put(data::KF_PARTITION_PROBS[2][0][0], 0); // partition: none
    td.put(data::DEFAULT_PROBS.skip[0], 1); // skip
    td.put(data::KF_YMODE_PROBS[2][2][0], 0); // y mode: dc
    td.put(data::KF_UVMODE_PROBS[2][0], 0); // uv mode: dc
    let tile = td.finish();

    let mut w = BitWriter::new();
    w.put(0b10, 2); // frame marker
    w.put(0, 2); // profile 0
    w.put(0, 1); // not show-existing
    w.put(0, 1); // keyframe
    w.put(1, 1); // show frame
    w.put(0, 1); // not error-resilient
    w.put(0x498342, 24); // sync code
    w.put(0, 3); // colorspace
    w.put(0, 1); // tv range
    w.put(15, 16); // width - 1
    w.put(15, 16); // height - 1
    w.put(0, 1); // no render size
    w.put(1, 1); // refresh context
    w.put(0, 1); // not parallel
    w.put(0, 2); // frame context id
    w.put(0, 6); // loop filter level
    w.put(0, 3); // sharpness
    w.put(0, 1); // no loop-filter deltas
    w.put(100, 8); // base quantizer
    w.put(0, 3); // no quantizer deltas
    w.put(0, 1); // no segmentation
    w.put(0, 1); // one tile row
    w.put(compressed.len() as u32, 16);

    let mut packet = w.finish();
    packet.extend_from_slice(&compressed);
    packet.extend_from_slice(&tile);
    packet
}

#[test]
fn keyframe_decodes_to_flat_gray() {
    let _ = env_logger::builder().is_test(true).try_init();
    let packet = flat_gray_keyframe();
    let mut dec = Vp9Decoder::new();
    let out = dec.decode_packet(&packet).expect("keyframe decode failed");
    assert_eq!(out.len(), 1);
    let pic = &out[0];
    assert_eq!((pic.width, pic.height), (16, 16));
    assert!(pic.keyframe);
    for pl in 0..3 {
        let plane = &pic.planes[pl];
        for y in 0..plane.height() {
            for (x, &v) in plane.row(y)[..plane.width()].iter().enumerate() {
                assert_eq!(v, 128, "plane {} at {},{}", pl, x, y);
            }
        }
    }
    // a keyframe refreshes every reference slot
    for slot in 0..8 {
        assert!(dec.reference(slot).is_ok(), "slot {} empty", slot);
    }
}

#[test]
fn keyframes_decode_repeatedly() {
    let packet = flat_gray_keyframe();
    let mut dec = Vp9Decoder::new();
    for _ in 0..3 {
        let out = dec.decode_packet(&packet).unwrap();
        assert_eq!(out.len(), 1);
    }
}

#[test]
fn superframe_of_two_keyframes() {
    let frame = flat_gray_keyframe();
    assert!(frame.len() < 256);
    let mut packet = Vec::new();
    packet.extend_from_slice(&frame);
    packet.extend_from_slice(&frame);
    let marker = 0b1100_0001u8; // two frames, one byte per size
    packet.push(marker);
    packet.push(frame.len() as u8);
    packet.push(frame.len() as u8);
    packet.push(marker);

    let mut dec = Vp9Decoder::new();
    let out = dec.decode_packet(&packet).unwrap();
    assert_eq!(out.len(), 2);
}

#[test]
fn show_existing_frame_borrows_the_slot() {
    let packet = flat_gray_keyframe();
    let mut dec = Vp9Decoder::new();
    let first = dec.decode_packet(&packet).unwrap().remove(0);

    // frame marker, profile 0, show-existing, slot 3
    let show = [0b1000_1011u8];
    let out = dec.decode_packet(&show).unwrap();
    assert_eq!(out.len(), 1);
    assert!(std::sync::Arc::ptr_eq(&out[0], &first));
}

#[test]
fn truncated_packet_fails_cleanly() {
    let mut packet = flat_gray_keyframe();
    packet.truncate(6);
    let mut dec = Vp9Decoder::new();
    assert!(dec.decode_packet(&packet).is_err());
    // and the pool stays empty: the failed frame was never promoted
    assert!(dec.reference(0).is_err());
}

#[test]
fn cancellation_interrupts_decode() {
    let packet = flat_gray_keyframe();
    let mut dec = Vp9Decoder::new();
    dec.cancel_token().cancel();
    assert!(matches!(
        dec.decode_packet(&packet),
        Err(Error::Cancelled)
    ));
}

#[test]
fn flush_drops_references() {
    let packet = flat_gray_keyframe();
    let mut dec = Vp9Decoder::new();
    dec.decode_packet(&packet).unwrap();
    assert!(dec.reference(0).is_ok());
    dec.flush();
    assert!(matches!(dec.reference(0), Err(Error::RefUnavailable)));
}

#[test]
fn bad_sync_code_is_reported() {
    let mut packet = flat_gray_keyframe();
    // corrupt the sync code, which sits right after the first byte
    packet[1] ^= 0x40;
    let mut dec = Vp9Decoder::new();
    assert!(matches!(
        dec.decode_packet(&packet),
        Err(Error::BadSyncCode)
    ));
}
