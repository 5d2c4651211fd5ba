//! Host driver for the systolic matrix-multiply NPU.
//!
//! The accelerator sits behind two physical windows: a register bridge
//! holding the NPU control block and the streaming DMA dispatchers, and a
//! shared RAM window the dispatchers read operands from and write results to.
//!
//! # Layers
//!
//! ```text
//! validation   run_benchmark / run_mac_check / run_datapath
//!     │
//! sequencer    load_weights → get_matrix + load_matrix → wait_execution
//!     │            (pe: legacy MAC, integrated: legacy DMA)
//! msgdma       reset / push_read / push_write / is_busy
//!     │
//! mmio         RegisterBus + SharedMemory
//!     ├── MappedWindow   /dev/mem (NpuDevice)
//!     └── SimulatedNpu   software model
//! ```
//!
//! Register offsets, descriptor flag layouts and control values come from a
//! [`RegisterProfile`](npu_chip::RegisterProfile) chosen at start-up; the
//! matrix wire format lives in [`npu_chip::codec`].
//!
//! # Quick start
//!
//! ```no_run
//! use npu_driver::{run_benchmark, BenchmarkPlan, NpuConfig, NpuDevice};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NpuConfig::from_env()?;
//! let mut device = NpuDevice::open(&config)?;
//! let (mut seq, mut buf) = device.split();
//!
//! let report = run_benchmark(&mut seq, &mut buf, &BenchmarkPlan::default())?;
//! println!("passed: {}, speedup: {:?}", report.passed(), report.speedup());
//! # Ok(())
//! # }
//! ```
//!
//! # Timeouts
//!
//! Every status poll is bounded by a [`WaitPolicy`]. An expired wait is
//! logged, recorded in the operation's [`PhaseReport`], and the sequence
//! continues; use [`PhaseReport::into_result`] to abort instead.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod config;
mod device;
mod error;
mod integrated;
pub mod mmio;
pub mod msgdma;
mod pe;
pub mod sequencer;
pub mod sim;
pub mod staging;
pub mod validation;
pub mod wait;

#[cfg(test)]
mod testing;

pub use config::NpuConfig;
pub use device::{NpuDevice, DEV_MEM};
pub use error::{Engine, NpuError, Phase, Result, Timeout};
pub use integrated::IntegratedTransfer;
pub use mmio::{MappedWindow, RegisterBus, SharedMemory};
pub use msgdma::Dispatcher;
pub use sequencer::{Activity, PhaseReport, Sequencer, WaitRecord, WaitTarget};
pub use sim::{Faults, SimMemory, SimRegisters, SimulatedNpu};
pub use staging::{Region, RegionLayout, RegionPlan, SharedBuffer};
pub use validation::{
    run_benchmark, run_datapath, run_mac_check, BenchmarkPlan, BenchmarkReport, DatapathPlan,
    DatapathReport, MacReport, VerifyReport,
};
pub use wait::{WaitOutcome, WaitPolicy};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BenchmarkPlan, NpuConfig, NpuDevice, NpuError, PhaseReport, RegisterBus, Result,
        Sequencer, SharedBuffer, SharedMemory, SimulatedNpu, WaitPolicy,
    };
}
