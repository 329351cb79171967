//! Reference pictures, the eight-slot reference pool, and row-progress
//! signalling for frame-parallel consumers.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use fallible_collections::TryVec;

use crate::{Error, Result};

/// Number of reference slots a frame director may refresh.
pub const NUM_REF_SLOTS: usize = 8;

/// Plane rows are padded out to this alignment.
const STRIDE_ALIGN: usize = 32;

/// A motion vector in eighth-pel units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mv {
    pub x: i16,
    pub y: i16,
}

static_assertions::assert_eq_size!(Mv, u32);

/// Per-8x8-unit motion vectors and reference indices, kept on each picture
/// so later frames can predict from it. `ref_idx` is -1 for intra units.
#[derive(Debug, Clone, Copy)]
pub struct MvRefPair {
    pub mv: [Mv; 2],
    pub ref_idx: [i8; 2],
}

impl Default for MvRefPair {
    fn default() -> Self {
        MvRefPair {
            mv: [Mv::default(); 2],
            ref_idx: [-1, -1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    I,
    P,
    B,
    /// Intra-coded B picture (VC-1).
    Bi,
}

/// One image plane. Samples are bytes; rows are `stride` bytes apart.
pub struct Plane {
    data: TryVec<u8>,
    width: usize,
    height: usize,
    stride: usize,
}

impl Plane {
    fn new(width: usize, height: usize) -> Result<Plane> {
        let stride = (width + STRIDE_ALIGN - 1) & !(STRIDE_ALIGN - 1);
        let mut data = TryVec::new();
        data.resize_with(stride * height, || 0u8)?;
        Ok(Plane {
            data,
            width,
            height,
            stride,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.stride..y * self.stride + self.stride]
    }
}

/// Monotone per-picture decode progress, in units of pixel rows (index 0)
/// or field rows (index 1 for the bottom field of interlaced content).
///
/// Later reports with lower values have no effect; waits for a value at or
/// below the current progress return immediately.
pub struct Progress {
    rows: Mutex<[i64; 2]>,
    cond: Condvar,
}

impl Default for Progress {
    fn default() -> Self {
        Progress {
            rows: Mutex::new([-1, -1]),
            cond: Condvar::new(),
        }
    }
}

impl Progress {
    /// Announce that all rows up to and including `row` are reconstructed
    /// and loop-filtered.
    pub fn report(&self, row: u32, field: usize) {
        let mut rows = self.rows.lock().unwrap();
        if rows[field] < i64::from(row) {
            rows[field] = i64::from(row);
            self.cond.notify_all();
        }
    }

    /// Current progress, or -1 when nothing has been reported yet.
    pub fn current(&self, field: usize) -> i64 {
        self.rows.lock().unwrap()[field]
    }

    /// Block until progress reaches `row`, or the token is cancelled.
    pub fn wait_for(&self, row: u32, field: usize, cancel: &CancelToken) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        while rows[field] < i64::from(row) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let (guard, _) = self
                .cond
                .wait_timeout(rows, Duration::from_millis(10))
                .unwrap();
            rows = guard;
        }
        Ok(())
    }
}

/// Cooperative cancellation flag, checked at tile boundaries and inside
/// every progress wait.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A decoded picture: three planes plus the side tables later frames
/// predict from.
///
/// A picture is mutable only while the decoder owns it exclusively; once it
/// is promoted into the reference pool it is only reachable behind `Arc`
/// and therefore sealed.
pub struct Picture {
    pub planes: [Plane; 3],
    pub width: usize,
    pub height: usize,
    /// Chroma subsampling shift, horizontal and vertical.
    pub ss: (u8, u8),
    pub keyframe: bool,
    pub pict_type: PictureType,
    pub invisible: bool,
    /// One segment id per 8x8 unit, `mi_stride()` units per row.
    pub(crate) seg_map: TryVec<u8>,
    /// One MV/reference pair per 8x8 unit.
    pub(crate) mv_table: TryVec<MvRefPair>,
    progress: Progress,
}

impl Picture {
    pub fn new(width: usize, height: usize, ss: (u8, u8)) -> Result<Picture> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidData("zero picture dimension"));
        }
        let cw = (width + (1usize << ss.0) - 1) >> ss.0;
        let ch = (height + (1usize << ss.1) - 1) >> ss.1;
        let mi_stride = ((width + 63) >> 6) << 3;
        let mi_rows = ((height + 63) >> 6) << 3;
        let mut seg_map = TryVec::new();
        seg_map.resize_with(mi_stride * mi_rows, || 0u8)?;
        let mut mv_table = TryVec::new();
        mv_table.resize_with(mi_stride * mi_rows, MvRefPair::default)?;
        Ok(Picture {
            planes: [
                Plane::new(width, height)?,
                Plane::new(cw, ch)?,
                Plane::new(cw, ch)?,
            ],
            width,
            height,
            ss,
            keyframe: false,
            pict_type: PictureType::I,
            invisible: false,
            seg_map,
            mv_table,
            progress: Progress::default(),
        })
    }

    /// 8x8 units per side-table row.
    #[inline]
    pub(crate) fn mi_stride(&self) -> usize {
        ((self.width + 63) >> 6) << 3
    }

    #[inline]
    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}

/// The fixed-size pool of reference slots.
///
/// Slot replacement is atomic with respect to `take_reference`; the mutex is
/// held only across the slot updates themselves.
#[derive(Default)]
pub struct RefPool {
    slots: Mutex<[Option<Arc<Picture>>; NUM_REF_SLOTS]>,
}

impl RefPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain a fresh frame buffer for the current frame.
    pub fn acquire_buffer(&self, width: usize, height: usize, ss: (u8, u8)) -> Result<Picture> {
        Picture::new(width, height, ss)
    }

    /// Borrow slot `idx`. The borrow stays valid for as long as the caller
    /// keeps the `Arc`, even across later slot replacements.
    pub fn take_reference(&self, idx: usize) -> Result<Arc<Picture>> {
        self.slots.lock().unwrap()[idx]
            .as_ref()
            .cloned()
            .ok_or(Error::RefUnavailable)
    }

    /// Whether slot `idx` currently holds a picture.
    pub fn has_reference(&self, idx: usize) -> bool {
        self.slots.lock().unwrap()[idx].is_some()
    }

    /// Store the finished current frame into every slot selected by
    /// `refresh_mask`, dropping whatever the slots held before.
    pub fn store_current(&self, current: &Arc<Picture>, refresh_mask: u8) {
        let mut slots = self.slots.lock().unwrap();
        for (i, slot) in slots.iter_mut().enumerate() {
            if refresh_mask & (1 << i) != 0 {
                *slot = Some(Arc::clone(current));
            }
        }
    }

    /// Drop all slots, e.g. on seek or stream end.
    pub fn flush(&self) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            *slot = None;
        }
    }

    /// Number of live slot borrows, for diagnostics and tests.
    pub fn live_slots(&self) -> usize {
        self.slots.lock().unwrap().iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn store_and_take_follow_refresh_mask() {
        let pool = RefPool::new();
        let pic = Arc::new(Picture::new(64, 64, (1, 1)).unwrap());
        pool.store_current(&pic, 0b0000_0101);
        assert_eq!(pool.live_slots(), 2);
        assert!(pool.take_reference(0).is_ok());
        assert!(matches!(pool.take_reference(1), Err(Error::RefUnavailable)));
        assert!(pool.take_reference(2).is_ok());

        // replacing a slot keeps earlier borrows alive
        let borrow = pool.take_reference(0).unwrap();
        let pic2 = Arc::new(Picture::new(64, 64, (1, 1)).unwrap());
        pool.store_current(&pic2, 0b0000_0001);
        assert_eq!(borrow.width, 64);
        assert!(Arc::ptr_eq(&pool.take_reference(0).unwrap(), &pic2));
    }

    #[test]
    fn progress_is_monotone_and_wakes_waiters() {
        let pic = Arc::new(Picture::new(64, 64, (1, 1)).unwrap());
        let cancel = CancelToken::new();

        let p = Arc::clone(&pic);
        let c = cancel.clone();
        let waiter = thread::spawn(move || p.progress().wait_for(32, 0, &c));

        pic.progress().report(16, 0);
        pic.progress().report(48, 0);
        // stale report must not move progress backwards
        pic.progress().report(8, 0);
        waiter.join().unwrap().unwrap();
        assert_eq!(pic.progress().current(0), 48);

        // waits at or below current progress return immediately
        pic.progress().wait_for(48, 0, &cancel).unwrap();
    }

    #[test]
    fn cancelled_wait_returns_error() {
        let pic = Picture::new(64, 64, (1, 1)).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            pic.progress().wait_for(1, 0, &cancel),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn plane_geometry() {
        let pic = Picture::new(66, 34, (1, 1)).unwrap();
        assert_eq!(pic.planes[0].width(), 66);
        assert_eq!(pic.planes[0].stride() % STRIDE_ALIGN, 0);
        assert_eq!(pic.planes[1].width(), 33);
        assert_eq!(pic.planes[1].height(), 17);
        assert_eq!(pic.mi_stride(), 16);
    }
}
