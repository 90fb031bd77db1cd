//! Time types and clock identifiers.
//!
//! `Timespec` is kept canonical: `0 <= tv_nsec < 1_000_000_000`, with the
//! sign carried by `tv_sec`. All arithmetic preserves canonical form, so
//! the derived lexicographic ordering is also the chronological ordering.

/// Nanoseconds per second.
pub const NANOSECONDS_PER_SECOND: i64 = 1_000_000_000;

/// A point in time or a duration, in seconds and nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(C)]
pub struct Timespec {
    /// Whole seconds.
    pub tv_sec: i64,
    /// Nanoseconds, `0..1_000_000_000` in canonical form.
    pub tv_nsec: i64,
}

impl Timespec {
    /// The zero timespec.
    pub const fn zero() -> Self {
        Self {
            tv_sec: 0,
            tv_nsec: 0,
        }
    }

    /// Builds a canonical timespec from possibly out-of-range nanoseconds.
    pub const fn make(tv_sec: i64, tv_nsec: i64) -> Self {
        let mut spec = Self { tv_sec, tv_nsec };
        spec = spec.canonicalized();
        spec
    }

    /// Builds a timespec from a total nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self::make(nanos / NANOSECONDS_PER_SECOND, nanos % NANOSECONDS_PER_SECOND)
    }

    /// Returns the total nanosecond count. Wide enough for any canonical value.
    pub const fn total_nanos(self) -> i128 {
        self.tv_sec as i128 * NANOSECONDS_PER_SECOND as i128 + self.tv_nsec as i128
    }

    /// Whether this is the zero timespec.
    pub const fn is_zero(self) -> bool {
        self.tv_sec == 0 && self.tv_nsec == 0
    }

    /// Folds excess nanoseconds into seconds and fixes negative nanoseconds.
    pub const fn canonicalized(self) -> Self {
        let mut sec = self.tv_sec + self.tv_nsec / NANOSECONDS_PER_SECOND;
        let mut nsec = self.tv_nsec % NANOSECONDS_PER_SECOND;
        if nsec < 0 {
            sec -= 1;
            nsec += NANOSECONDS_PER_SECOND;
        }
        Self {
            tv_sec: sec,
            tv_nsec: nsec,
        }
    }

    /// `true` when `tv_nsec` is within the canonical range.
    pub const fn is_canonical(self) -> bool {
        0 <= self.tv_nsec && self.tv_nsec < NANOSECONDS_PER_SECOND
    }

    /// Canonical sum.
    #[must_use]
    pub const fn add(self, other: Self) -> Self {
        Self {
            tv_sec: self.tv_sec + other.tv_sec,
            tv_nsec: self.tv_nsec + other.tv_nsec,
        }
        .canonicalized()
    }

    /// Canonical difference (may be negative in `tv_sec`).
    #[must_use]
    pub const fn sub(self, other: Self) -> Self {
        Self {
            tv_sec: self.tv_sec - other.tv_sec,
            tv_nsec: self.tv_nsec - other.tv_nsec,
        }
        .canonicalized()
    }

    /// `true` when the value represents a time before the epoch / a
    /// negative duration.
    pub const fn is_negative(self) -> bool {
        self.tv_sec < 0
    }
}

/// Timer setting: initial expiry plus reload interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Itimerspec {
    /// Period for periodic timers; zero for one-shot.
    pub it_interval: Timespec,
    /// Initial expiry: absolute time or delay depending on the timer flags.
    /// Zero disarms.
    pub it_value: Timespec,
}

impl Itimerspec {
    /// A disarmed timer setting.
    pub const fn zero() -> Self {
        Self {
            it_interval: Timespec::zero(),
            it_value: Timespec::zero(),
        }
    }
}

// ── Clock identifiers ───────────────────────────────────────────────

/// Wall-clock time.
pub const CLOCK_REALTIME: i32 = 0;
/// Monotonic time since an arbitrary origin; never steps.
pub const CLOCK_MONOTONIC: i32 = 1;
/// Monotonic time since boot, including suspend.
pub const CLOCK_BOOTTIME: i32 = 2;
/// Monotonic time since the init process started.
pub const CLOCK_INIT: i32 = 3;
/// CPU time consumed by the calling process (user + kernel).
pub const CLOCK_PROCESS_CPUTIME_ID: i32 = 4;
/// Kernel-mode CPU time consumed by the calling process.
pub const CLOCK_PROCESS_SYSTIME_ID: i32 = 5;
/// CPU time accumulated from waited-for children.
pub const CLOCK_CHILD_CPUTIME_ID: i32 = 6;
/// Kernel-mode CPU time accumulated from waited-for children.
pub const CLOCK_CHILD_SYSTIME_ID: i32 = 7;
/// CPU time consumed by the calling thread.
pub const CLOCK_THREAD_CPUTIME_ID: i32 = 8;
/// Kernel-mode CPU time consumed by the calling thread.
pub const CLOCK_THREAD_SYSTIME_ID: i32 = 9;

/// `clock_nanosleep`/`timer_settime` flag: `it_value` is an absolute time.
pub const TIMER_ABSTIME: i32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_canonicalizes_overflow() {
        let t = Timespec::make(1, 2_500_000_000);
        assert_eq!(t, Timespec { tv_sec: 3, tv_nsec: 500_000_000 });
    }

    #[test]
    fn sub_borrows_nanoseconds() {
        let a = Timespec::make(2, 100);
        let b = Timespec::make(1, 200);
        assert_eq!(a.sub(b), Timespec { tv_sec: 0, tv_nsec: 999_999_900 });
    }

    #[test]
    fn ordering_is_chronological() {
        let early = Timespec::make(1, 999_999_999);
        let late = Timespec::make(2, 0);
        assert!(early < late);
    }

    #[test]
    fn negative_durations() {
        let a = Timespec::make(0, 0);
        let b = Timespec::make(0, 1);
        let d = a.sub(b);
        assert!(d.is_negative());
        assert_eq!(d.total_nanos(), -1);
    }

    #[test]
    fn nanos_round_trip() {
        let t = Timespec::from_nanos(10_000_000);
        assert_eq!(t, Timespec { tv_sec: 0, tv_nsec: 10_000_000 });
        assert_eq!(t.total_nanos(), 10_000_000);
    }
}
