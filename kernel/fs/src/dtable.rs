//! The descriptor table.
//!
//! A dense, growable array of `(descriptor, slot flags)` pairs under one
//! lock. Allocation finds the lowest free index at or above a minimum; the
//! `first_not_taken` hint keeps that search from rescanning the low end of
//! a large table on every open.
//!
//! The table is shared by reference between threads of a process; `fork`
//! builds a sibling table referencing the same descriptors (minus
//! close-on-fork slots), and `execve` sweeps close-on-exec slots.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::sync::SpinLock;
use muon_syscall::fcntl::{FD_CLOEXEC, FD_CLOFORK};

use crate::descriptor::Descriptor;
use crate::FsError;

/// Hard ceiling on table size.
const MAX_ENTRIES: usize = 4096;

struct Entry {
    desc: Arc<Descriptor>,
    flags: i32,
}

struct TableState {
    entries: Vec<Option<Entry>>,
    /// No free slot exists below this index.
    first_not_taken: usize,
}

/// A process family's descriptor table.
pub struct DescriptorTable {
    state: SpinLock<TableState>,
}

impl TableState {
    fn is_open(&self, index: usize) -> bool {
        self.entries.get(index).is_some_and(Option::is_some)
    }

    fn place(&mut self, index: usize, desc: Arc<Descriptor>, flags: i32) {
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some(Entry { desc, flags });
        if index == self.first_not_taken {
            self.first_not_taken = index + 1;
        }
    }

    fn take(&mut self, index: usize) -> Option<Entry> {
        let entry = self.entries.get_mut(index)?.take();
        if entry.is_some() && index < self.first_not_taken {
            self.first_not_taken = index;
        }
        entry
    }
}

impl DescriptorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            state: SpinLock::new(TableState {
                entries: Vec::new(),
                first_not_taken: 0,
            }),
        }
    }

    /// The descriptor at `index`, if open.
    pub fn get(&self, index: i32) -> Option<Arc<Descriptor>> {
        if index < 0 {
            return None;
        }
        let state = self.state.lock();
        state
            .entries
            .get(index as usize)?
            .as_ref()
            .map(|e| e.desc.clone())
    }

    /// Installs `desc` at the lowest free index at or above `min_index`.
    ///
    /// # Errors
    ///
    /// [`FsError::InvalidArgument`] for a negative minimum and
    /// [`FsError::LimitReached`] when the table is full.
    pub fn allocate(
        &self,
        desc: Arc<Descriptor>,
        flags: i32,
        min_index: i32,
    ) -> Result<i32, FsError> {
        if min_index < 0 {
            return Err(FsError::InvalidArgument);
        }
        let mut state = self.state.lock();
        let mut index = (min_index as usize).max(state.first_not_taken);
        while state.is_open(index) {
            index += 1;
        }
        if index >= MAX_ENTRIES {
            return Err(FsError::LimitReached);
        }
        state.place(index, desc, flags);
        Ok(index as i32)
    }

    /// Dups the descriptor at `src_index` into the lowest free slot at or
    /// above `min_index`.
    pub fn allocate_from(
        &self,
        src_index: i32,
        flags: i32,
        min_index: i32,
    ) -> Result<i32, FsError> {
        let desc = self.get(src_index).ok_or(FsError::BadDescriptor)?;
        self.allocate(desc, flags, min_index)
    }

    /// Replaces `to` with a dup of `from`, closing whatever `to` held.
    pub fn copy(&self, from: i32, to: i32, flags: i32) -> Result<i32, FsError> {
        if to < 0 || to as usize >= MAX_ENTRIES {
            return Err(FsError::InvalidArgument);
        }
        let desc = self.get(from).ok_or(FsError::BadDescriptor)?;
        let mut state = self.state.lock();
        state.take(to as usize);
        state.place(to as usize, desc, flags);
        Ok(to)
    }

    /// Closes `index`.
    pub fn free(&self, index: i32) -> Result<(), FsError> {
        self.free_keep(index).map(drop)
    }

    /// Closes `index` but hands the descriptor back to the caller.
    pub fn free_keep(&self, index: i32) -> Result<Arc<Descriptor>, FsError> {
        if index < 0 {
            return Err(FsError::BadDescriptor);
        }
        let mut state = self.state.lock();
        state
            .take(index as usize)
            .map(|e| e.desc)
            .ok_or(FsError::BadDescriptor)
    }

    /// Slot flags of `index`.
    pub fn get_flags(&self, index: i32) -> Result<i32, FsError> {
        if index < 0 {
            return Err(FsError::BadDescriptor);
        }
        let state = self.state.lock();
        state
            .entries
            .get(index as usize)
            .and_then(Option::as_ref)
            .map(|e| e.flags)
            .ok_or(FsError::BadDescriptor)
    }

    /// Replaces the slot flags of `index`.
    pub fn set_flags(&self, index: i32, flags: i32) -> Result<(), FsError> {
        if index < 0 {
            return Err(FsError::BadDescriptor);
        }
        let mut state = self.state.lock();
        match state.entries.get_mut(index as usize).and_then(Option::as_mut) {
            Some(entry) => {
                entry.flags = flags;
                Ok(())
            }
            None => Err(FsError::BadDescriptor),
        }
    }

    /// Closes every slot flagged close-on-exec. Runs during `execve`.
    pub fn on_execute(&self) {
        let mut state = self.state.lock();
        for index in 0..state.entries.len() {
            if state.entries[index]
                .as_ref()
                .is_some_and(|e| e.flags & FD_CLOEXEC != 0)
            {
                state.take(index);
            }
        }
    }

    /// Closes every slot at or above `index`. Returns how many closed.
    pub fn close_from(&self, index: i32) -> Result<usize, FsError> {
        if index < 0 {
            return Err(FsError::InvalidArgument);
        }
        let mut state = self.state.lock();
        let mut closed = 0;
        for i in (index as usize)..state.entries.len() {
            if state.take(i).is_some() {
                closed += 1;
            }
        }
        Ok(closed)
    }

    /// Builds a sibling table for a forked process: shares descriptors,
    /// copies slot flags, omits close-on-fork slots.
    pub fn fork(&self) -> Arc<Self> {
        let state = self.state.lock();
        let mut entries: Vec<Option<Entry>> = Vec::with_capacity(state.entries.len());
        for slot in &state.entries {
            entries.push(match slot {
                Some(entry) if entry.flags & FD_CLOFORK == 0 => Some(Entry {
                    desc: entry.desc.clone(),
                    flags: entry.flags,
                }),
                _ => None,
            });
        }
        let first_not_taken = entries.iter().position(Option::is_none).unwrap_or(entries.len());
        Arc::new(Self {
            state: SpinLock::new(TableState {
                entries,
                first_not_taken,
            }),
        })
    }

    /// Number of open slots.
    pub fn open_count(&self) -> usize {
        let state = self.state.lock();
        state.entries.iter().filter(|e| e.is_some()).count()
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::{Inode, InodeType};
    use crate::ioctx::IoCtx;
    use muon_core::id::{Dev, Ino};
    use muon_syscall::stat::Stat;

    struct NullInode;

    impl Inode for NullInode {
        fn inode_type(&self) -> InodeType {
            InodeType::Device
        }
        fn dev(&self) -> Dev {
            Dev::new(0)
        }
        fn ino(&self) -> Ino {
            Ino::new(0)
        }
        fn stat(&self, _ctx: &IoCtx) -> Result<Stat, FsError> {
            Ok(Stat::default())
        }
        fn is_seekable(&self) -> bool {
            false
        }
    }

    fn desc() -> Arc<Descriptor> {
        Descriptor::new(Arc::new(NullInode), 0)
    }

    #[test]
    fn allocate_picks_lowest_free_slot() {
        let table = DescriptorTable::new();
        assert_eq!(table.allocate(desc(), 0, 0).unwrap(), 0);
        assert_eq!(table.allocate(desc(), 0, 0).unwrap(), 1);
        table.free(0).unwrap();
        assert_eq!(table.allocate(desc(), 0, 0).unwrap(), 0);
    }

    #[test]
    fn allocate_honors_min_index() {
        let table = DescriptorTable::new();
        assert_eq!(table.allocate(desc(), 0, 5).unwrap(), 5);
        // Lower slots are still free and found afterwards.
        assert_eq!(table.allocate(desc(), 0, 0).unwrap(), 0);
    }

    #[test]
    fn allocate_then_free_is_idempotent() {
        let table = DescriptorTable::new();
        let index = table.allocate(desc(), 0, 0).unwrap();
        table.free(index).unwrap();
        assert!(table.get(index).is_none());
        assert_eq!(table.free(index), Err(FsError::BadDescriptor));
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn copy_replaces_target_slot() {
        let table = DescriptorTable::new();
        let a = table.allocate(desc(), 0, 0).unwrap();
        let b = table.allocate(desc(), 0, 0).unwrap();
        table.copy(a, b, 0).unwrap();
        let src = table.get(a).unwrap();
        let dst = table.get(b).unwrap();
        assert!(Arc::ptr_eq(&src, &dst));
    }

    #[test]
    fn fork_shares_descriptors_but_not_flags() {
        let table = DescriptorTable::new();
        let index = table.allocate(desc(), 0, 0).unwrap();
        let child = table.fork();

        // Same descriptor object behind both tables.
        assert!(Arc::ptr_eq(
            &table.get(index).unwrap(),
            &child.get(index).unwrap()
        ));

        // Flag changes in the parent are invisible in the child.
        table.set_flags(index, FD_CLOEXEC).unwrap();
        assert_eq!(child.get_flags(index).unwrap(), 0);
    }

    #[test]
    fn fork_omits_close_on_fork_slots() {
        let table = DescriptorTable::new();
        let keep = table.allocate(desc(), 0, 0).unwrap();
        let drop_slot = table.allocate(desc(), FD_CLOFORK, 0).unwrap();
        let child = table.fork();
        assert!(child.get(keep).is_some());
        assert!(child.get(drop_slot).is_none());
        // The freed slot is reusable in the child.
        assert_eq!(child.allocate(desc(), 0, 0).unwrap(), drop_slot);
    }

    #[test]
    fn on_execute_sweeps_cloexec_slots() {
        let table = DescriptorTable::new();
        let keep = table.allocate(desc(), 0, 0).unwrap();
        let sweep = table.allocate(desc(), FD_CLOEXEC, 0).unwrap();
        table.on_execute();
        assert!(table.get(keep).is_some());
        assert!(table.get(sweep).is_none());
    }

    #[test]
    fn close_from_clears_the_tail() {
        let table = DescriptorTable::new();
        for _ in 0..5 {
            table.allocate(desc(), 0, 0).unwrap();
        }
        assert_eq!(table.close_from(2).unwrap(), 3);
        assert_eq!(table.open_count(), 2);
    }
}
