//! Error types for NPU driver operations

use std::fmt;
use thiserror::Error;

/// Result type alias for NPU operations
pub type Result<T> = std::result::Result<T, NpuError>;

/// Errors that can occur during NPU operations
#[derive(Debug, Error)]
pub enum NpuError {
    /// I/O error while opening or mapping device memory
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Mapping a physical window failed
    #[error("Failed to map {base:#x}+{span:#x}: {reason}")]
    MapFailed {
        /// Physical base address
        base: u64,
        /// Requested span
        span: usize,
        /// Reason for failure
        reason: String,
    },

    /// Access outside a mapped window or staging region
    #[error("Out of bounds access: offset={offset:#x}, len={len}, limit={limit:#x}")]
    OutOfBounds {
        /// Requested offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Size of the window
        limit: usize,
    },

    /// Caller passed an unusable argument
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong
        reason: String,
    },

    /// Operation issued out of order
    #[error("Sequencer in invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// The selected register profile lacks the hardware block
    #[error("Profile {profile} has no {feature}")]
    Unsupported {
        /// Profile name
        profile: &'static str,
        /// Missing block
        feature: &'static str,
    },

    /// No profile with this name
    #[error("Unknown register profile: {name}")]
    UnknownProfile {
        /// Requested name
        name: String,
    },

    /// Two staging regions share bytes
    #[error("Staging regions overlap: {first} and {second}")]
    RegionOverlap {
        /// First region name
        first: &'static str,
        /// Second region name
        second: &'static str,
    },

    /// A DMA engine stayed busy past the wait budget
    #[error("DMA timeout on {engine} engine after {polls} polls")]
    DmaTimeout {
        /// Engine that stayed busy
        engine: Engine,
        /// Polls spent
        polls: u64,
    },

    /// The sequencer busy bit stayed set past the wait budget
    #[error("Sequencer busy timeout during {phase} after {polls} polls")]
    SequencerBusyTimeout {
        /// Phase that was waiting
        phase: Phase,
        /// Polls spent
        polls: u64,
    },
}

impl NpuError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a map failure error
    pub fn map_failed(base: u64, span: usize, reason: impl Into<String>) -> Self {
        Self::MapFailed {
            base,
            span,
            reason: reason.into(),
        }
    }

    /// Whether this error is one of the two wait-budget timeouts
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::DmaTimeout { .. } | Self::SequencerBusyTimeout { .. }
        )
    }
}

/// Streaming DMA direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    /// Memory → accelerator
    Read,
    /// Accelerator → memory
    Write,
    /// DMA block inside the legacy NPU
    Integrated,
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Integrated => write!(f, "integrated"),
        }
    }
}

/// Sequencer phase a wait belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Session reset before a run
    Reset,
    /// Weight load
    LoadWeights,
    /// Batch execution
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => write!(f, "session reset"),
            Self::LoadWeights => write!(f, "weight load"),
            Self::Execute => write!(f, "execution"),
        }
    }
}

/// A wait that ran out of budget.
///
/// Timeouts are reported, not raised: the sequencer logs them, records them
/// in a [`crate::PhaseReport`] and carries on with the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// A DMA engine status bit never cleared
    Dma {
        /// Engine that stayed busy
        engine: Engine,
        /// Polls spent
        polls: u64,
    },
    /// The sequencer busy bit never cleared
    SequencerBusy {
        /// Phase that was waiting
        phase: Phase,
        /// Polls spent
        polls: u64,
    },
}

impl From<Timeout> for NpuError {
    fn from(t: Timeout) -> Self {
        match t {
            Timeout::Dma { engine, polls } => Self::DmaTimeout { engine, polls },
            Timeout::SequencerBusy { phase, polls } => Self::SequencerBusyTimeout { phase, polls },
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        NpuError::from(*self).fmt(f)
    }
}
