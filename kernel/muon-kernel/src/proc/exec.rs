//! Program execution: image loading and the initial stack.
//!
//! `exec` runs under the calling process's memory lock discipline: the
//! old address space is torn down, a fresh one is built from the ELF
//! image, the descriptor table sheds its close-on-exec slots before any
//! argument bytes are copied, and the initial stack is laid out as argc,
//! the argv and envp pointer arrays, and the auxiliary vector.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::id::Tid;
use muon_core::kdebug;
use muon_elf::{ElfImage, PF_W, PF_X};
use muon_fs::{DstBuf, FsError};
use muon_mm::segment::{Prot, Segment, add_segment};
use muon_mm::{PAGE_SIZE, page_align_down, page_align_up};
use muon_syscall::auxv::{
    AT_ENTRY, AT_NULL, AT_PAGESZ, AT_TLS_ALIGN, AT_TLS_TEMPLATE_ADDR, AT_TLS_TEMPLATE_SIZE,
    AT_TLS_TOTAL_SIZE, AT_UTHREAD_SIZE,
};
use muon_syscall::errno::{EIO, ENOEXEC, ENOMEM};

use crate::config::{USER_STACK_SIZE, USER_STACK_TOP};
use crate::kernel::Kernel;
use crate::mem::Mmu;
use crate::proc::Process;
use crate::proc::signal::SigAction;
use crate::proc::thread::ThreadState;
use crate::vfs;

/// Baseline flags register for user entry: interrupts enabled.
const USER_FLAGS: usize = 0x202;

/// Size of the userspace thread descriptor advertised via auxv.
const UTHREAD_SIZE: usize = 128;

/// Replaces the process image of `tid`'s process with `path`.
///
/// # Errors
///
/// `ENOENT`-family errors from resolution, `ENOEXEC` for a bad image,
/// `ENOMEM` when the image does not fit the user half.
pub fn exec(
    kernel: &Arc<Kernel>,
    tid: Tid,
    path: &str,
    argv: &[String],
    envp: &[String],
) -> Result<(), i32> {
    let process = kernel
        .process_of(tid)
        .ok_or(muon_syscall::errno::ESRCH)?;

    // Read the whole image through the kernel-domain context.
    let inode = vfs::resolve(kernel, &process, path).map_err(|e| e.to_errno())?;
    let image_bytes = read_whole(kernel, &process, &inode).map_err(|e| e.to_errno())?;
    let image = ElfImage::parse(&image_bytes).map_err(|_| ENOEXEC)?;
    let entry = image.entry_point() as usize;
    if entry == 0 {
        return Err(ENOEXEC);
    }

    // Close-on-exec sweep happens before any argument copying.
    process.dtable.lock().on_execute();

    // Tear down the old address space and build the new one.
    let old_space = *process.space.lock();
    let new_space = kernel.mmu.create_space();
    {
        let mut segments = process.segments.lock();
        segments.clear();
    }
    kernel.mmu.destroy_space(old_space);
    *process.space.lock() = new_space;

    // Map PT_LOAD segments. Writable segments are private to the image
    // (copied on fork); read-only ones may be shared.
    for seg in image.load_segments() {
        let vaddr = seg.vaddr as usize;
        let memsz = seg.memsz as usize;
        if memsz == 0 {
            continue;
        }
        let base = page_align_down(vaddr);
        let size = page_align_up(vaddr + memsz) - base;
        let mut prot = Prot::READ | Prot::KREAD | Prot::KWRITE;
        if seg.flags & PF_W != 0 {
            prot |= Prot::WRITE | Prot::FORK;
        }
        if seg.flags & PF_X != 0 {
            prot |= Prot::EXEC;
        }
        let segment = Segment::new(base, size, prot);
        {
            let mut segments = process.segments.lock();
            add_segment(&mut segments, segment).map_err(|_| ENOMEM)?;
        }
        kernel.mmu.map(new_space, &segment);
        if !kernel.mmu.write(new_space, vaddr, seg.data) {
            return Err(EIO);
        }
    }

    // TLS template record for the auxiliary vector.
    let mut tls_aux = None;
    if let Some(tls) = image.tls_segment() {
        let total = page_align_up(tls.memsz as usize).max(PAGE_SIZE);
        let base = find_free_range(&process, total).ok_or(ENOMEM)?;
        let segment = Segment::new(base, total, Prot::READ | Prot::KREAD | Prot::KWRITE);
        {
            let mut segments = process.segments.lock();
            add_segment(&mut segments, segment).map_err(|_| ENOMEM)?;
        }
        kernel.mmu.map(new_space, &segment);
        if !kernel.mmu.write(new_space, base, tls.data) {
            return Err(EIO);
        }
        tls_aux = Some((base, tls.data.len(), tls.memsz as usize, tls.align as usize));
    }

    // User stack.
    let stack_base = USER_STACK_TOP - USER_STACK_SIZE;
    let stack_segment = Segment::new(
        stack_base,
        USER_STACK_SIZE,
        Prot::READ | Prot::WRITE | Prot::FORK | Prot::KREAD | Prot::KWRITE,
    );
    {
        let mut segments = process.segments.lock();
        add_segment(&mut segments, stack_segment).map_err(|_| ENOMEM)?;
    }
    kernel.mmu.map(new_space, &stack_segment);

    let sp = build_initial_stack(kernel, new_space, entry, argv, envp, tls_aux).ok_or(EIO)?;

    // Caught dispositions reset to default across exec.
    {
        let mut dispositions = process.dispositions.lock();
        for action in dispositions.iter_mut() {
            if action.handler > muon_syscall::signal::SIG_IGN {
                *action = SigAction::default();
            }
        }
    }
    process.family.lock().program_path = String::from(path);

    // Register initialization: entry, aligned stack top, interrupts on.
    kernel.threads.with(tid, |t| {
        t.frame = crate::proc::thread::RegisterFrame {
            ip: entry,
            sp,
            flags: USER_FLAGS,
            ..Default::default()
        };
        t.user_stack = (stack_base, USER_STACK_SIZE);
        if let Some((base, _, total, _)) = tls_aux {
            t.tls = (base, total);
        }
        if t.state == ThreadState::None {
            t.state = ThreadState::Runnable;
        }
    });

    kdebug!("exec: pid {} {} entry {:#x}", process.pid, path, entry);
    Ok(())
}

/// Reads an entire inode into memory.
fn read_whole(
    kernel: &Arc<Kernel>,
    process: &Arc<Process>,
    inode: &Arc<dyn muon_fs::Inode>,
) -> Result<Vec<u8>, FsError> {
    let ctx = kernel.kernel_ctx(process);
    let size = inode.size() as usize;
    let mut data = alloc::vec![0u8; size];
    let mut done = 0;
    while done < size {
        let read = inode.pread(&ctx, &mut DstBuf::Kernel(&mut data[done..]), done as u64)?;
        if read == 0 {
            break;
        }
        done += read;
    }
    data.truncate(done);
    Ok(data)
}

/// First-fit gap for a kernel-placed mapping (TLS block).
fn find_free_range(process: &Process, size: usize) -> Option<usize> {
    let segments = process.segments.lock();
    muon_mm::segment::place_segment(&segments, 0, size, 0).ok()
}

/// Writes argc, argv, envp, and the auxiliary vector below the stack
/// top. Returns the initial stack pointer (16-byte aligned, pointing at
/// argc).
fn build_initial_stack(
    kernel: &Arc<Kernel>,
    space: crate::mem::SpaceId,
    entry: usize,
    argv: &[String],
    envp: &[String],
    tls_aux: Option<(usize, usize, usize, usize)>,
) -> Option<usize> {
    // Strings live highest; the vectors sit below them.
    let mut cursor = USER_STACK_TOP;
    let mut write_string = |s: &str, cursor: &mut usize| -> Option<usize> {
        let bytes = s.as_bytes();
        *cursor -= bytes.len() + 1;
        let addr = *cursor;
        if !kernel.mmu.write(space, addr, bytes) {
            return None;
        }
        if !kernel.mmu.write(space, addr + bytes.len(), &[0]) {
            return None;
        }
        Some(addr)
    };

    let mut argv_ptrs = Vec::with_capacity(argv.len());
    for arg in argv {
        argv_ptrs.push(write_string(arg, &mut cursor)?);
    }
    let mut envp_ptrs = Vec::with_capacity(envp.len());
    for env in envp {
        envp_ptrs.push(write_string(env, &mut cursor)?);
    }

    let mut auxv: Vec<(usize, usize)> = alloc::vec![
        (AT_PAGESZ, PAGE_SIZE),
        (AT_ENTRY, entry),
        (AT_UTHREAD_SIZE, UTHREAD_SIZE),
    ];
    if let Some((addr, template, total, align)) = tls_aux {
        auxv.push((AT_TLS_TEMPLATE_ADDR, addr));
        auxv.push((AT_TLS_TEMPLATE_SIZE, template));
        auxv.push((AT_TLS_TOTAL_SIZE, total));
        auxv.push((AT_TLS_ALIGN, align));
    }
    auxv.push((AT_NULL, 0));

    // argc + argv + NULL + envp + NULL + auxv pairs.
    let words = 1 + argv_ptrs.len() + 1 + envp_ptrs.len() + 1 + auxv.len() * 2;
    let vectors_size = words * 8;
    let sp = (cursor - vectors_size) & !0xF;

    let mut block: Vec<u8> = Vec::with_capacity(words * 8);
    let mut push_word = |block: &mut Vec<u8>, word: usize| {
        block.extend_from_slice(&(word as u64).to_le_bytes());
    };
    push_word(&mut block, argv.len());
    for ptr in &argv_ptrs {
        push_word(&mut block, *ptr);
    }
    push_word(&mut block, 0);
    for ptr in &envp_ptrs {
        push_word(&mut block, *ptr);
    }
    push_word(&mut block, 0);
    for (key, value) in &auxv {
        push_word(&mut block, *key);
        push_word(&mut block, *value);
    }

    kernel.mmu.write(space, sp, &block).then_some(sp)
}
