//! Compile-time kernel configuration.

/// Kernel name reported by `kernelinfo("name")`.
pub const KERNEL_NAME: &str = "muon";

/// Kernel version reported by `kernelinfo("version")`.
pub const KERNEL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scheduler quantum in timer ticks.
pub const QUANTUM_TICKS: u32 = 10;

/// Nanoseconds per hardware timer tick (1 ms).
pub const TICK_NS: i64 = 1_000_000;

/// Heap invariant-scan level (0-3); see `muon_mm::heap`.
pub const HEAP_PARANOIA: u8 = 1;

/// User stack size for new process images.
pub const USER_STACK_SIZE: usize = 64 * 1024;

/// Top of the user stack; the stack grows downward from here.
pub const USER_STACK_TOP: usize = 0x7FFF_FFFF_F000;

/// Maximum byte count honoured by `getentropy`.
pub const GETENTROPY_MAX: usize = 256;

/// Maximum symlink traversals during path resolution.
pub const SYMLINK_DEPTH_MAX: usize = 8;

/// Capacity of the deferred timer-firing queue.
pub const TIMER_WORKER_CAPACITY: usize = 64;
