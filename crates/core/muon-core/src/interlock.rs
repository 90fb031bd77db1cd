//! Interlocked read-modify-write helpers.
//!
//! Applies an arbitrary pure function to a shared word with a
//! compare-and-swap loop, returning both the value that was replaced and
//! the value that was installed. The increment/decrement/add/sub wrappers
//! cover the common cases.

use core::sync::atomic::{AtomicUsize, Ordering};

/// The (old, new) pair produced by an interlocked modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterlockResult {
    /// Value the word held before the successful exchange.
    pub old: usize,
    /// Value installed by the successful exchange.
    pub new: usize,
}

/// Atomically replaces `*word` with `f(*word, user)`.
///
/// `f` must be pure: it may run several times if the CAS loses a race, and
/// only the final successful application is observable.
pub fn interlocked_modify(
    word: &AtomicUsize,
    f: fn(usize, usize) -> usize,
    user: usize,
) -> InterlockResult {
    let mut old = word.load(Ordering::Relaxed);
    loop {
        let new = f(old, user);
        match word.compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return InterlockResult { old, new },
            Err(actual) => old = actual,
        }
    }
}

fn add(value: usize, arg: usize) -> usize {
    value.wrapping_add(arg)
}

fn sub(value: usize, arg: usize) -> usize {
    value.wrapping_sub(arg)
}

/// Atomically increments `*word` by one.
pub fn interlocked_increment(word: &AtomicUsize) -> InterlockResult {
    interlocked_modify(word, add, 1)
}

/// Atomically decrements `*word` by one.
pub fn interlocked_decrement(word: &AtomicUsize) -> InterlockResult {
    interlocked_modify(word, sub, 1)
}

/// Atomically adds `arg` to `*word`.
pub fn interlocked_add(word: &AtomicUsize, arg: usize) -> InterlockResult {
    interlocked_modify(word, add, arg)
}

/// Atomically subtracts `arg` from `*word`.
pub fn interlocked_sub(word: &AtomicUsize, arg: usize) -> InterlockResult {
    interlocked_modify(word, sub, arg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_reports_both_values() {
        let word = AtomicUsize::new(41);
        let ret = interlocked_increment(&word);
        assert_eq!(ret, InterlockResult { old: 41, new: 42 });
        assert_eq!(word.load(Ordering::Relaxed), 42);
    }

    #[test]
    fn decrement_wraps_like_machine_arithmetic() {
        let word = AtomicUsize::new(0);
        let ret = interlocked_decrement(&word);
        assert_eq!(ret.old, 0);
        assert_eq!(ret.new, usize::MAX);
    }

    #[test]
    fn add_sub_round_trip() {
        let word = AtomicUsize::new(100);
        interlocked_add(&word, 23);
        assert_eq!(word.load(Ordering::Relaxed), 123);
        let ret = interlocked_sub(&word, 23);
        assert_eq!(ret.new, 100);
    }

    #[test]
    fn modify_applies_arbitrary_function() {
        fn double_plus(value: usize, arg: usize) -> usize {
            value * 2 + arg
        }
        let word = AtomicUsize::new(10);
        let ret = interlocked_modify(&word, double_plus, 1);
        assert_eq!(ret, InterlockResult { old: 10, new: 21 });
    }
}
