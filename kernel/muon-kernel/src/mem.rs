//! Machine memory abstraction and user-memory access.
//!
//! The kernel manipulates address spaces through the [`Mmu`] trait: create
//! and destroy spaces, install and remove segment mappings, and move bytes
//! in and out. On real hardware the implementation edits page tables; the
//! [`ModelMmu`] here models spaces as sparse page maps, which is what the
//! host build and the test suite run on.
//!
//! [`ProcessSpace`] is the bridge to the VFS's [`UserSpace`]: every user
//! copy validates its range against the owning process's segment table
//! before touching memory, so a stray pointer fails with `EFAULT` instead
//! of reaching another mapping.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::sync::SpinLock;
use muon_fs::{FsError, UserSpace};
use muon_mm::segment::{Prot, Segment};
use muon_mm::{PAGE_SIZE, page_align_down};

/// Identifies one address space to the [`Mmu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpaceId(pub u64);

/// The machine's memory-management unit.
pub trait Mmu: Send + Sync {
    /// Creates an empty address space.
    fn create_space(&self) -> SpaceId;

    /// Destroys a space and every mapping in it.
    fn destroy_space(&self, space: SpaceId);

    /// Installs backing pages for a segment.
    fn map(&self, space: SpaceId, segment: &Segment);

    /// Removes the mapping of a segment range.
    fn unmap(&self, space: SpaceId, segment: &Segment);

    /// Updates the installed protection of a segment range.
    fn protect(&self, space: SpaceId, segment: &Segment);

    /// Clones mapped pages of `segment` from one space into another.
    /// With `share`, both spaces end up referencing the same frames.
    fn clone_range(&self, from: SpaceId, to: SpaceId, segment: &Segment, share: bool);

    /// Installs the space on the CPU. A no-op in the host model.
    fn switch(&self, space: SpaceId) {
        let _ = space;
    }

    /// Kernel-mode read, ignoring user protections.
    fn read(&self, space: SpaceId, addr: usize, out: &mut [u8]) -> bool;

    /// Kernel-mode write, ignoring user protections.
    fn write(&self, space: SpaceId, addr: usize, data: &[u8]) -> bool;
}

// ── Host model ──────────────────────────────────────────────────────

type PageFrame = Arc<SpinLock<[u8; PAGE_SIZE]>>;

#[derive(Default)]
struct SpaceModel {
    pages: BTreeMap<usize, PageFrame>,
}

/// Sparse-page model of the MMU, used by host builds and tests.
pub struct ModelMmu {
    spaces: SpinLock<BTreeMap<u64, SpaceModel>>,
    next_space: SpinLock<u64>,
}

impl ModelMmu {
    /// Creates a model with no spaces.
    pub fn new() -> Self {
        Self {
            spaces: SpinLock::new(BTreeMap::new()),
            next_space: SpinLock::new(1),
        }
    }

    fn with_space<R>(&self, space: SpaceId, f: impl FnOnce(&mut SpaceModel) -> R) -> Option<R> {
        let mut spaces = self.spaces.lock();
        spaces.get_mut(&space.0).map(f)
    }
}

impl Default for ModelMmu {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmu for ModelMmu {
    fn create_space(&self) -> SpaceId {
        let mut next = self.next_space.lock();
        let id = *next;
        *next += 1;
        self.spaces.lock().insert(id, SpaceModel::default());
        SpaceId(id)
    }

    fn destroy_space(&self, space: SpaceId) {
        self.spaces.lock().remove(&space.0);
    }

    fn map(&self, space: SpaceId, segment: &Segment) {
        self.with_space(space, |model| {
            let mut page = segment.addr;
            while page < segment.end() {
                model
                    .pages
                    .entry(page)
                    .or_insert_with(|| Arc::new(SpinLock::new([0; PAGE_SIZE])));
                page += PAGE_SIZE;
            }
        });
    }

    fn unmap(&self, space: SpaceId, segment: &Segment) {
        self.with_space(space, |model| {
            let mut page = segment.addr;
            while page < segment.end() {
                model.pages.remove(&page);
                page += PAGE_SIZE;
            }
        });
    }

    fn protect(&self, _space: SpaceId, _segment: &Segment) {
        // Protection is enforced at the segment table; the model keeps no
        // per-page permission bits.
    }

    fn clone_range(&self, from: SpaceId, to: SpaceId, segment: &Segment, share: bool) {
        let mut spaces = self.spaces.lock();
        let mut page = segment.addr;
        while page < segment.end() {
            let frame = spaces
                .get(&from.0)
                .and_then(|model| model.pages.get(&page).cloned());
            if let (Some(frame), Some(target)) = (frame, spaces.get_mut(&to.0)) {
                let copy = if share {
                    frame
                } else {
                    Arc::new(SpinLock::new(*frame.lock()))
                };
                target.pages.insert(page, copy);
            }
            page += PAGE_SIZE;
        }
    }

    fn read(&self, space: SpaceId, addr: usize, out: &mut [u8]) -> bool {
        self.with_space(space, |model| {
            let mut done = 0;
            while done < out.len() {
                let at = addr + done;
                let page = page_align_down(at);
                let Some(frame) = model.pages.get(&page) else {
                    return false;
                };
                let offset = at - page;
                let step = (PAGE_SIZE - offset).min(out.len() - done);
                out[done..done + step].copy_from_slice(&frame.lock()[offset..offset + step]);
                done += step;
            }
            true
        })
        .unwrap_or(false)
    }

    fn write(&self, space: SpaceId, addr: usize, data: &[u8]) -> bool {
        self.with_space(space, |model| {
            let mut done = 0;
            while done < data.len() {
                let at = addr + done;
                let page = page_align_down(at);
                let Some(frame) = model.pages.get(&page) else {
                    return false;
                };
                let offset = at - page;
                let step = (PAGE_SIZE - offset).min(data.len() - done);
                frame.lock()[offset..offset + step].copy_from_slice(&data[done..done + step]);
                done += step;
            }
            true
        })
        .unwrap_or(false)
    }
}

// ── Segment-validated user access ───────────────────────────────────

/// One process's user address space, as seen by the VFS copy layer.
///
/// Ranges are checked against the segment table with the access direction
/// before any byte moves; the original kernel skipped this check, the
/// redesign requires it.
pub struct ProcessSpace {
    mmu: Arc<dyn Mmu>,
    space: SpaceId,
    segments: Arc<SpinLock<Vec<Segment>>>,
}

impl ProcessSpace {
    /// Builds the access object for a process.
    pub fn new(mmu: Arc<dyn Mmu>, space: SpaceId, segments: Arc<SpinLock<Vec<Segment>>>) -> Self {
        Self {
            mmu,
            space,
            segments,
        }
    }

    /// Whether `[addr, addr + len)` lies within segments granting `want`.
    fn validate(&self, addr: usize, len: usize, want: Prot) -> bool {
        if len == 0 {
            return true;
        }
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        let segments = self.segments.lock();
        let mut cursor = addr;
        for segment in segments.iter() {
            if segment.end() <= cursor {
                continue;
            }
            if segment.addr > cursor {
                return false;
            }
            if !segment.prot.contains(want) {
                return false;
            }
            cursor = segment.end();
            if cursor >= end {
                return true;
            }
        }
        false
    }
}

impl UserSpace for ProcessSpace {
    fn copy_in(&self, addr: usize, dst: &mut [u8]) -> Result<(), FsError> {
        if !self.validate(addr, dst.len(), Prot::READ) {
            return Err(FsError::BadAddress);
        }
        if self.mmu.read(self.space, addr, dst) {
            Ok(())
        } else {
            Err(FsError::BadAddress)
        }
    }

    fn copy_out(&self, addr: usize, src: &[u8]) -> Result<(), FsError> {
        if !self.validate(addr, src.len(), Prot::WRITE) {
            return Err(FsError::BadAddress);
        }
        if self.mmu.write(self.space, addr, src) {
            Ok(())
        } else {
            Err(FsError::BadAddress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muon_mm::segment::add_segment;

    fn mapped_space() -> (Arc<ModelMmu>, SpaceId, Arc<SpinLock<Vec<Segment>>>) {
        let mmu = Arc::new(ModelMmu::new());
        let space = mmu.create_space();
        let segments = Arc::new(SpinLock::new(Vec::new()));
        let seg = Segment::new(0x20_000, 2 * PAGE_SIZE, Prot::READ | Prot::WRITE);
        add_segment(&mut segments.lock(), seg).unwrap();
        mmu.map(space, &seg);
        (mmu, space, segments)
    }

    #[test]
    fn read_write_round_trip_across_pages() {
        let (mmu, space, _) = mapped_space();
        let addr = 0x20_000 + PAGE_SIZE - 3;
        assert!(mmu.write(space, addr, b"abcdef"));
        let mut back = [0u8; 6];
        assert!(mmu.read(space, addr, &mut back));
        assert_eq!(&back, b"abcdef");
    }

    #[test]
    fn unmapped_access_fails() {
        let mmu = ModelMmu::new();
        let space = mmu.create_space();
        let mut buf = [0u8; 4];
        assert!(!mmu.read(space, 0x20_000, &mut buf));
    }

    #[test]
    fn shared_clone_aliases_frames() {
        let (mmu, space, _) = mapped_space();
        let seg = Segment::new(0x20_000, PAGE_SIZE, Prot::READ | Prot::WRITE);
        let other = mmu.create_space();
        mmu.clone_range(space, other, &seg, true);

        mmu.write(space, 0x20_000, b"shared").then_some(()).unwrap();
        let mut back = [0u8; 6];
        assert!(mmu.read(other, 0x20_000, &mut back));
        assert_eq!(&back, b"shared");
    }

    #[test]
    fn copied_clone_detaches_frames() {
        let (mmu, space, _) = mapped_space();
        let seg = Segment::new(0x20_000, PAGE_SIZE, Prot::READ | Prot::WRITE);
        let other = mmu.create_space();
        mmu.write(space, 0x20_000, b"before").then_some(()).unwrap();
        mmu.clone_range(space, other, &seg, false);

        mmu.write(space, 0x20_000, b"parent").then_some(()).unwrap();
        let mut back = [0u8; 6];
        assert!(mmu.read(other, 0x20_000, &mut back));
        assert_eq!(&back, b"before");
    }

    #[test]
    fn process_space_validates_against_segments() {
        let (mmu, space, segments) = mapped_space();
        let ps = ProcessSpace::new(mmu, space, segments);

        let mut buf = [0u8; 8];
        assert!(ps.copy_in(0x20_000, &mut buf).is_ok());
        // Past the mapped segment: EFAULT, not a stray read.
        assert_eq!(
            ps.copy_in(0x20_000 + 2 * PAGE_SIZE, &mut buf),
            Err(FsError::BadAddress)
        );
    }

    #[test]
    fn validation_respects_protection_direction() {
        let mmu = Arc::new(ModelMmu::new());
        let space = mmu.create_space();
        let segments = Arc::new(SpinLock::new(Vec::new()));
        let seg = Segment::new(0x20_000, PAGE_SIZE, Prot::READ);
        add_segment(&mut segments.lock(), seg).unwrap();
        mmu.map(space, &seg);
        let ps = ProcessSpace::new(mmu, space, segments);

        let mut buf = [0u8; 4];
        assert!(ps.copy_in(0x20_000, &mut buf).is_ok());
        assert_eq!(ps.copy_out(0x20_000, &buf), Err(FsError::BadAddress));
    }
}
