//! Signal dispositions and delivery decisions.
//!
//! The pending-mask discipline: posting sets a bit in the process's
//! pending set; delivery happens on the return-to-user path, which asks
//! [`decide`] what the lowest deliverable pending signal means. Handler
//! deliveries synthesize a frame on the user stack (saved registers plus
//! the interrupted mask) and [`handler_entry_mask`] computes the mask the
//! handler runs under.

use muon_syscall::signal::{
    SA_NODEFER, SIG_DFL, SIG_IGN, SIGABRT, SIGBUS, SIGCHLD, SIGCONT, SIGFPE, SIGILL, SIGKILL,
    SIGQUIT, SIGSEGV, SIGSTOP, SIGSYS, SIGTRAP, SIGTSTP, SIGTTIN, SIGTTOU, SIGURG, SIGWINCH,
    SIGXCPU, SIGXFSZ, SigSet,
};

/// One signal's disposition.
#[derive(Debug, Clone, Copy)]
pub struct SigAction {
    /// Handler address, or the `SIG_DFL`/`SIG_IGN` sentinels.
    pub handler: usize,
    /// Signals additionally masked while the handler runs.
    pub mask: SigSet,
    /// `SA_*` flags.
    pub flags: i32,
}

impl Default for SigAction {
    fn default() -> Self {
        Self {
            handler: SIG_DFL,
            mask: SigSet::empty(),
            flags: 0,
        }
    }
}

/// What the default disposition of a signal does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    /// Terminate the process.
    Term,
    /// Discard the signal.
    Ign,
    /// Terminate the process and dump core.
    Core,
    /// Stop all threads of the process.
    Stop,
    /// Continue a stopped process.
    Cont,
}

/// The POSIX default-action table.
pub fn default_action(sig: i32) -> DefaultAction {
    match sig {
        SIGCHLD | SIGURG | SIGWINCH => DefaultAction::Ign,
        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV | SIGSYS | SIGXCPU
        | SIGXFSZ => DefaultAction::Core,
        SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => DefaultAction::Stop,
        SIGCONT => DefaultAction::Cont,
        _ => DefaultAction::Term,
    }
}

/// The effect of delivering one pending signal.
#[derive(Debug, Clone, Copy)]
pub enum Delivery {
    /// Run a user handler with the given disposition.
    Handler {
        /// The signal being delivered.
        sig: i32,
        /// A snapshot of the disposition at decision time.
        action: SigAction,
    },
    /// Terminate the process with a signalled status.
    Terminate {
        /// The fatal signal.
        sig: i32,
        /// Whether a core dump is called for.
        core: bool,
    },
    /// Stop every thread of the process.
    Stop {
        /// The stopping signal.
        sig: i32,
    },
    /// Nothing observable (ignored or continue-only).
    Ignore {
        /// The discarded signal.
        sig: i32,
    },
}

/// Decides what delivering `sig` under `action` means.
///
/// `SIGKILL` and `SIGSTOP` cannot be caught or ignored; their dispositions
/// are fixed.
pub fn decide(sig: i32, action: SigAction) -> Delivery {
    if sig == SIGKILL {
        return Delivery::Terminate { sig, core: false };
    }
    if sig == SIGSTOP {
        return Delivery::Stop { sig };
    }
    match action.handler {
        SIG_IGN => Delivery::Ignore { sig },
        SIG_DFL => match default_action(sig) {
            DefaultAction::Term => Delivery::Terminate { sig, core: false },
            DefaultAction::Core => Delivery::Terminate { sig, core: true },
            DefaultAction::Ign | DefaultAction::Cont => Delivery::Ignore { sig },
            DefaultAction::Stop => Delivery::Stop { sig },
        },
        _ => Delivery::Handler { sig, action },
    }
}

/// Lowest-numbered pending signal that the mask does not block.
pub fn next_deliverable(pending: SigSet, mask: SigSet) -> Option<i32> {
    pending.difference(mask).first()
}

/// The mask a handler runs under: the interrupted mask, the handler's
/// additional mask, and the delivered signal itself unless `SA_NODEFER`.
pub fn handler_entry_mask(current: SigSet, action: SigAction, sig: i32) -> SigSet {
    let mut mask = current.union(action.mask);
    if action.flags & SA_NODEFER == 0 {
        mask.add(sig);
    }
    mask
}
