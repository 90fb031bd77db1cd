//! Identifier newtypes shared across the kernel.
//!
//! Wrapping the raw integers keeps a `Pid` from being handed to something
//! expecting an inode number. Conversions are explicit via `new`/`get`.

use core::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident, $repr:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($repr);

        impl $name {
            /// Wraps a raw value.
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            /// Returns the raw value.
            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_type!(
    /// Process identifier. Also used for process-group and session ids.
    Pid,
    i32
);
id_type!(
    /// Kernel thread identifier (index into the thread arena).
    Tid,
    u32
);
id_type!(
    /// Inode number, unique within one device.
    Ino,
    u64
);
id_type!(
    /// Device id, identifying one filesystem instance.
    Dev,
    u64
);
id_type!(
    /// User id.
    Uid,
    u32
);
id_type!(
    /// Group id.
    Gid,
    u32
);

impl Uid {
    /// The superuser.
    pub const ROOT: Self = Self(0);
}

impl Gid {
    /// The superuser's group.
    pub const ROOT: Self = Self(0);
}
