//! Address-space segments.
//!
//! A process's virtual address space is a sorted, non-overlapping array of
//! segments, each a contiguous range with one protection. Sortedness is by
//! construction: every mutation goes through the functions here, which
//! reject overlap at insert time. Gap search for placement walks the same
//! sorted array.

extern crate alloc;

use alloc::vec::Vec;

use bitflags::bitflags;
use muon_syscall::mman;

use crate::{USER_ADDR_MAX, USER_ADDR_MIN, page_align_down, page_align_up};

bitflags! {
    /// Segment protection bits.
    ///
    /// User and kernel access are independent; `FORK` selects copy-on-fork
    /// (set) versus share-on-fork (clear).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u32 {
        /// User-mode read.
        const READ = mman::PROT_READ;
        /// User-mode write.
        const WRITE = mman::PROT_WRITE;
        /// User-mode execute.
        const EXEC = mman::PROT_EXEC;
        /// Kernel-mode read.
        const KREAD = mman::PROT_KREAD;
        /// Kernel-mode write.
        const KWRITE = mman::PROT_KWRITE;
        /// Copy the segment into forked children instead of sharing it.
        const FORK = mman::PROT_FORK;
    }
}

/// A contiguous virtual range with uniform protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Base address (page-aligned).
    pub addr: usize,
    /// Size in bytes (page-aligned, nonzero).
    pub size: usize,
    /// Protection bits.
    pub prot: Prot,
}

impl Segment {
    /// Creates a segment. `addr` and `size` must be page-aligned.
    pub const fn new(addr: usize, size: usize, prot: Prot) -> Self {
        Self { addr, size, prot }
    }

    /// One past the last address of the segment.
    pub const fn end(&self) -> usize {
        self.addr + self.size
    }

    /// Whether `addr` falls inside the segment.
    pub const fn contains(&self, addr: usize) -> bool {
        self.addr <= addr && addr < self.end()
    }
}

// Segments order by base address, then size. Protection is identity-
// irrelevant for placement.
impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.addr, self.size).cmp(&(other.addr, other.size))
    }
}

/// Errors from segment-set mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// The new segment overlaps an existing one.
    Overlap,
    /// The segment lies outside the userspace half or is malformed.
    BadRange,
    /// No gap large enough was found.
    NoSpace,
}

/// Whether two segments share at least one address.
pub const fn are_segments_overlapping(a: &Segment, b: &Segment) -> bool {
    a.addr < b.addr + b.size && b.addr < a.addr + a.size
}

/// Whether a segment lies entirely within the userspace half and is
/// page-aligned with a nonzero size that does not wrap.
pub const fn is_userspace_segment(segment: &Segment) -> bool {
    segment.addr % crate::PAGE_SIZE == 0
        && segment.size % crate::PAGE_SIZE == 0
        && segment.size != 0
        && segment.addr >= USER_ADDR_MIN
        && segment.addr.checked_add(segment.size).is_some()
        && segment.addr + segment.size <= USER_ADDR_MAX
}

/// Index of the first segment that could overlap `new_segment`.
///
/// Binary-searches to the lower bound so the scan does not restart from
/// index zero on every insertion.
fn lower_bound(segments: &[Segment], new_segment: &Segment) -> usize {
    segments.partition_point(|s| s.end() <= new_segment.addr)
}

/// Finds a segment overlapping `new_segment`, if any.
pub fn find_overlapping_segment<'a>(
    segments: &'a [Segment],
    new_segment: &Segment,
) -> Option<&'a Segment> {
    let start = lower_bound(segments, new_segment);
    segments[start..]
        .iter()
        .take_while(|s| s.addr < new_segment.end())
        .find(|s| are_segments_overlapping(s, new_segment))
}

/// Whether `new_segment` overlaps any existing segment.
pub fn is_segment_overlapping(segments: &[Segment], new_segment: &Segment) -> bool {
    find_overlapping_segment(segments, new_segment).is_some()
}

/// Inserts `new_segment`, preserving sorted order.
///
/// # Errors
///
/// Rejects overlap with an existing segment and ranges outside the
/// userspace half.
pub fn add_segment(segments: &mut Vec<Segment>, new_segment: Segment) -> Result<(), SegmentError> {
    if !is_userspace_segment(&new_segment) {
        return Err(SegmentError::BadRange);
    }
    if is_segment_overlapping(segments, &new_segment) {
        return Err(SegmentError::Overlap);
    }
    let at = segments.partition_point(|s| *s < new_segment);
    segments.insert(at, new_segment);
    Ok(())
}

/// Finds an address for a new segment of `size` bytes.
///
/// With `MAP_FIXED` the requested range must fit exactly where asked
/// (page-aligned, in the user half, no overlap). Otherwise the first gap
/// from the bottom of the user half that accommodates the (page-rounded)
/// size wins.
pub fn place_segment(
    segments: &[Segment],
    addr_hint: usize,
    size: usize,
    flags: u32,
) -> Result<usize, SegmentError> {
    if size == 0 {
        return Err(SegmentError::BadRange);
    }
    let size = page_align_up(size);

    if flags & mman::MAP_FIXED != 0 {
        if addr_hint % crate::PAGE_SIZE != 0 {
            return Err(SegmentError::BadRange);
        }
        let want = Segment::new(addr_hint, size, Prot::empty());
        if !is_userspace_segment(&want) {
            return Err(SegmentError::BadRange);
        }
        if is_segment_overlapping(segments, &want) {
            return Err(SegmentError::Overlap);
        }
        return Ok(addr_hint);
    }

    // First-fit over the gaps of the sorted array. A nonzero hint biases
    // the search start but is not binding.
    let mut cursor = USER_ADDR_MIN.max(page_align_down(addr_hint));
    for segment in segments {
        if segment.end() <= cursor {
            continue;
        }
        if cursor + size <= segment.addr {
            return Ok(cursor);
        }
        cursor = segment.end();
    }
    if cursor
        .checked_add(size)
        .is_some_and(|end| end <= USER_ADDR_MAX)
    {
        Ok(cursor)
    } else {
        Err(SegmentError::NoSpace)
    }
}

/// Removes `[addr, addr + size)` from the set, splitting segments that
/// straddle the boundary. Returns the removed pieces so the caller can
/// drop their page mappings.
pub fn unmap_range(segments: &mut Vec<Segment>, addr: usize, size: usize) -> Vec<Segment> {
    let end = addr + size;
    let mut removed = Vec::new();
    let mut result = Vec::with_capacity(segments.len());

    for segment in segments.drain(..) {
        if segment.end() <= addr || end <= segment.addr {
            result.push(segment);
            continue;
        }
        // Leading remainder.
        if segment.addr < addr {
            result.push(Segment::new(segment.addr, addr - segment.addr, segment.prot));
        }
        // Removed middle.
        let cut_start = segment.addr.max(addr);
        let cut_end = segment.end().min(end);
        removed.push(Segment::new(cut_start, cut_end - cut_start, segment.prot));
        // Trailing remainder.
        if end < segment.end() {
            result.push(Segment::new(end, segment.end() - end, segment.prot));
        }
    }

    *segments = result;
    removed
}

/// Applies `prot` to `[addr, addr + size)`, splitting straddling segments.
/// Untouched parts keep their protection. Returns the ranges whose
/// protection actually changed.
pub fn protect_range(
    segments: &mut Vec<Segment>,
    addr: usize,
    size: usize,
    prot: Prot,
) -> Vec<Segment> {
    let end = addr + size;
    let mut changed = Vec::new();
    let mut result = Vec::with_capacity(segments.len());

    for segment in segments.drain(..) {
        if segment.end() <= addr || end <= segment.addr || segment.prot == prot {
            result.push(segment);
            continue;
        }
        if segment.addr < addr {
            result.push(Segment::new(segment.addr, addr - segment.addr, segment.prot));
        }
        let mid_start = segment.addr.max(addr);
        let mid_end = segment.end().min(end);
        let mid = Segment::new(mid_start, mid_end - mid_start, prot);
        changed.push(mid);
        result.push(mid);
        if end < segment.end() {
            result.push(Segment::new(end, segment.end() - end, segment.prot));
        }
    }

    *segments = result;
    changed
}
