//! Stage/order scheduling.
//!
//! Every middleware entry carries a coarse [`Stage`] and a fine integer
//! order. Before each run the chain is stably sorted by
//! `(stage.rank(), order)`, ascending, so:
//!
//! ```text
//! Default (rank 0) → BeforeSend (rank 1) → IoRead / IoWrite (rank 2)
//! ```
//!
//! General middlewares wrap everything, before-send middlewares run right
//! before the I/O boundary, and the single I/O handler is always innermost.
//! Entries with equal keys keep their registration order.

/// Coarse phase tag of a middleware entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    /// General middleware (logging, validation, envelopes).
    #[default]
    Default,
    /// Runs immediately before the I/O boundary (signing, final encoding).
    BeforeSend,
    /// Terminal hook that receives bytes off the wire.
    IoRead,
    /// Terminal hook that puts bytes on the wire.
    IoWrite,
}

impl Stage {
    /// Returns the sort rank of this stage; lower runs first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::BeforeSend => 1,
            Self::IoRead | Self::IoWrite => 2,
        }
    }

    /// Returns true for the terminal I/O stages.
    #[must_use]
    pub const fn is_io(self) -> bool {
        matches!(self, Self::IoRead | Self::IoWrite)
    }

    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::BeforeSend => "before_send",
            Self::IoRead => "io_read",
            Self::IoWrite => "io_write",
        }
    }

    /// Returns all stages in rank order.
    #[must_use]
    pub const fn all() -> [Stage; 4] {
        [Self::Default, Self::BeforeSend, Self::IoRead, Self::IoWrite]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of an I/O hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDirection {
    /// Receives bytes and decodes them into the message.
    Read,
    /// Encodes the message and sends it.
    Write,
}

impl IoDirection {
    /// Returns the stage an I/O hook of this direction is scheduled in.
    #[must_use]
    pub const fn stage(self) -> Stage {
        match self {
            Self::Read => Stage::IoRead,
            Self::Write => Stage::IoWrite,
        }
    }
}

impl std::fmt::Display for IoDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}
