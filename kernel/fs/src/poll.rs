//! Event notification channels for inodes and streams.
//!
//! An inode that can become readable or writable owns a [`PollChannel`].
//! A poller registers a [`PollNode`] carrying the event mask it cares
//! about; whenever the inode's state changes it calls
//! [`PollChannel::signal`] with the now-true events, which records matched
//! events on every interested node and fires its wake condition.
//!
//! A multi-descriptor poll registers one node per target, all sharing one
//! wake condition, so the first event on any target wakes the poller.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use muon_core::sync::{SpinLock, WakeCondition};
use muon_syscall::poll::POLL_ALWAYS;

/// One poller's subscription on one channel.
pub struct PollNode {
    /// Events the poller asked for.
    pub events: i16,
    revents: SpinLock<i16>,
    cond: Arc<WakeCondition>,
}

impl PollNode {
    /// Creates a node interested in `events`, waking `cond` on a match.
    pub fn new(events: i16, cond: Arc<WakeCondition>) -> Arc<Self> {
        Arc::new(Self {
            events,
            revents: SpinLock::new(0),
            cond,
        })
    }

    /// Events that have fired so far.
    pub fn revents(&self) -> i16 {
        *self.revents.lock()
    }

    /// Records events and signals the poller. Error-class events
    /// (`POLLERR`/`POLLHUP`/`POLLNVAL`) are always reported.
    pub fn publish(&self, events: i16) {
        let matched = events & (self.events | POLL_ALWAYS);
        if matched == 0 {
            return;
        }
        *self.revents.lock() |= matched;
        self.cond.signal();
    }

    /// The wake condition shared with the poller.
    pub fn condition(&self) -> &Arc<WakeCondition> {
        &self.cond
    }
}

/// The registry of poll subscriptions attached to one inode or stream.
///
/// Registrations are weak: a subscription lives as long as the poller
/// holds its node, and dead entries are pruned on the next signal.
pub struct PollChannel {
    nodes: SpinLock<Vec<alloc::sync::Weak<PollNode>>>,
}

impl PollChannel {
    /// Creates an empty channel.
    pub const fn new() -> Self {
        Self {
            nodes: SpinLock::new(Vec::new()),
        }
    }

    /// Registers a subscription for as long as the caller keeps `node`.
    pub fn register(&self, node: &Arc<PollNode>) {
        self.nodes.lock().push(Arc::downgrade(node));
    }

    /// Removes a subscription registered earlier.
    pub fn unregister(&self, node: &Arc<PollNode>) {
        self.nodes
            .lock()
            .retain(|n| n.upgrade().is_some_and(|n| !Arc::ptr_eq(&n, node)));
    }

    /// Reports a state change to every interested subscription.
    pub fn signal(&self, events: i16) {
        // Snapshot so publishing (which may run wakers) happens unlocked;
        // prune entries whose poller is gone.
        let live: Vec<Arc<PollNode>> = {
            let mut nodes = self.nodes.lock();
            nodes.retain(|n| n.upgrade().is_some());
            nodes.iter().filter_map(alloc::sync::Weak::upgrade).collect()
        };
        for node in live {
            node.publish(events);
        }
    }
}

impl Default for PollChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muon_syscall::poll::{POLLHUP, POLLIN, POLLOUT};

    #[test]
    fn signal_matches_interest_mask() {
        let channel = PollChannel::new();
        let cond = Arc::new(WakeCondition::new());
        let node = PollNode::new(POLLIN, cond.clone());
        channel.register(&node);

        channel.signal(POLLOUT);
        assert_eq!(node.revents(), 0);
        assert!(!cond.is_signalled());

        channel.signal(POLLIN | POLLOUT);
        assert_eq!(node.revents(), POLLIN);
        assert!(cond.is_signalled());
    }

    #[test]
    fn hangup_is_always_reported() {
        let channel = PollChannel::new();
        let node = PollNode::new(POLLIN, Arc::new(WakeCondition::new()));
        channel.register(&node);
        channel.signal(POLLHUP);
        assert_eq!(node.revents(), POLLHUP);
    }

    #[test]
    fn shared_condition_wakes_on_any_target() {
        let a = PollChannel::new();
        let b = PollChannel::new();
        let cond = Arc::new(WakeCondition::new());
        let a_node = PollNode::new(POLLIN, cond.clone());
        let b_node = PollNode::new(POLLIN, cond.clone());
        a.register(&a_node);
        b.register(&b_node);
        b.signal(POLLIN);
        assert!(cond.is_signalled());
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let channel = PollChannel::new();
        let node = PollNode::new(POLLIN, Arc::new(WakeCondition::new()));
        channel.register(&node);
        drop(node);
        // Signalling after the poller is gone must not fire anything.
        channel.signal(POLLIN);
    }

    #[test]
    fn unregister_stops_delivery() {
        let channel = PollChannel::new();
        let node = PollNode::new(POLLIN, Arc::new(WakeCondition::new()));
        channel.register(&node);
        channel.unregister(&node);
        channel.signal(POLLIN);
        assert_eq!(node.revents(), 0);
    }
}
