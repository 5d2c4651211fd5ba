//! Accelerator control sequencer
//!
//! Orchestrates the two phases of a run over the streaming dispatchers:
//!
//! ```text
//! load_weights:  ctrl=load|start → feed weights → wait feed → wait idle → latch
//! execute:       get_matrix (arm drain) → load_matrix (rows, ctrl=exec|start, feed)
//! wait_execution: wait drain → wait idle
//! ```
//!
//! Waits are bounded by the sequencer's [`WaitPolicy`]. An expired wait is
//! logged and recorded in the returned [`PhaseReport`], then the sequence
//! carries on. Callers that prefer to abort use [`PhaseReport::into_result`].
//!
//! The hardware holds the real state machine; the sequencer only tracks what
//! it has issued, enough to refuse out-of-order calls.

use crate::error::{Engine, NpuError, Phase, Result, Timeout};
use crate::mmio::RegisterBus;
use crate::msgdma::Dispatcher;
use crate::wait::{WaitOutcome, WaitPolicy};
use npu_chip::matrix::{OPERAND_BYTES, OUTPUT_BYTES, ROWS_PER_MATRIX};
use npu_chip::regs::{DispatcherPair, NpuBlock, RegisterProfile};
use std::time::Duration;

// ── Reports ──────────────────────────────────────────────────────────────────

/// What a wait was polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    /// A DMA engine status bit
    Dma(Engine),
    /// The sequencer busy bit
    Sequencer,
}

/// One bounded wait inside a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRecord {
    /// What was polled
    pub target: WaitTarget,
    /// How it ended
    pub outcome: WaitOutcome,
}

/// Every wait a blocking operation performed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    phase: Phase,
    waits: Vec<WaitRecord>,
}

impl PhaseReport {
    pub(crate) const fn new(phase: Phase) -> Self {
        Self {
            phase,
            waits: Vec::new(),
        }
    }

    /// Record a wait; an expired one is logged as an error.
    pub(crate) fn record(&mut self, target: WaitTarget, outcome: WaitOutcome) {
        let record = WaitRecord { target, outcome };
        if let Some(timeout) = self.timeout_of(&record) {
            tracing::error!("{}: {timeout}", self.phase);
        }
        self.waits.push(record);
    }

    const fn timeout_of(&self, record: &WaitRecord) -> Option<Timeout> {
        match record.outcome {
            WaitOutcome::Ready { .. } => None,
            WaitOutcome::Expired { polls } => Some(match record.target {
                WaitTarget::Dma(engine) => Timeout::Dma { engine, polls },
                WaitTarget::Sequencer => Timeout::SequencerBusy {
                    phase: self.phase,
                    polls,
                },
            }),
        }
    }

    /// Phase this report covers.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Waits in the order they ran.
    pub fn waits(&self) -> &[WaitRecord] {
        &self.waits
    }

    /// Expired waits.
    pub fn timeouts(&self) -> Vec<Timeout> {
        self.waits.iter().filter_map(|w| self.timeout_of(w)).collect()
    }

    /// No wait expired.
    pub fn is_clean(&self) -> bool {
        self.waits.iter().all(|w| w.outcome.is_ready())
    }

    /// Status reads across all waits.
    pub fn total_polls(&self) -> u64 {
        self.waits.iter().map(|w| w.outcome.polls()).sum()
    }

    /// Turn the first timeout into an error.
    ///
    /// # Errors
    ///
    /// Returns `DmaTimeout` or `SequencerBusyTimeout` if any wait expired.
    pub fn into_result(self) -> Result<Self> {
        match self.timeouts().first() {
            Some(&timeout) => Err(timeout.into()),
            None => Ok(self),
        }
    }
}

// ── Sequencer ────────────────────────────────────────────────────────────────

/// What the sequencer has issued since the last wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Nothing outstanding
    Idle,
    /// Drain descriptor pushed for `count` matrices
    DrainArmed {
        /// Matrices the drain expects
        count: usize,
    },
    /// Feed pushed; results pending
    Executing {
        /// Matrices in flight
        count: usize,
    },
}

/// Default settling time of the legacy MAC PE.
pub const DEFAULT_PE_SETTLE: Duration = Duration::from_micros(1);

/// Drives one accelerator through a [`RegisterBus`].
#[derive(Debug)]
pub struct Sequencer<B> {
    pub(crate) bus: B,
    pub(crate) profile: &'static RegisterProfile,
    pub(crate) wait: WaitPolicy,
    pub(crate) pe_settle: Duration,
    activity: Activity,
    last_command: Option<u32>,
}

impl<B: RegisterBus> Sequencer<B> {
    /// Sequencer for `profile` with the default wait policy.
    pub fn new(bus: B, profile: &'static RegisterProfile) -> Self {
        tracing::debug!("Sequencer on profile {}", profile.name);
        Self {
            bus,
            profile,
            wait: WaitPolicy::default(),
            pe_settle: DEFAULT_PE_SETTLE,
            activity: Activity::Idle,
            last_command: None,
        }
    }

    /// Replace the wait policy.
    #[must_use]
    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Replace the MAC PE settling delay.
    #[must_use]
    pub fn with_pe_settle(mut self, settle: Duration) -> Self {
        self.pe_settle = settle;
        self
    }

    /// Register profile in use.
    pub const fn profile(&self) -> &'static RegisterProfile {
        self.profile
    }

    /// Wait policy in use.
    pub const fn wait_policy(&self) -> WaitPolicy {
        self.wait
    }

    /// What is outstanding.
    pub const fn activity(&self) -> Activity {
        self.activity
    }

    /// Last value written to the control register.
    pub const fn last_command(&self) -> Option<u32> {
        self.last_command
    }

    /// Underlying bus.
    pub const fn bus(&self) -> &B {
        &self.bus
    }

    // ── Register helpers ─────────────────────────────────────────────────────

    pub(crate) const fn npu(&self) -> &NpuBlock {
        &self.profile.npu
    }

    pub(crate) fn write_word(&self, index: usize, value: u32) {
        self.bus.write32(self.npu().offset(index), value);
    }

    pub(crate) fn read_word(&self, index: usize) -> u32 {
        self.bus.read32(self.npu().offset(index))
    }

    pub(crate) fn command(&mut self, value: u32) {
        self.write_word(self.npu().control, value);
        self.last_command = Some(value);
    }

    /// Whether the sequencer busy bit is set.
    pub fn is_busy(&self) -> bool {
        self.read_word(self.npu().status) & self.npu().busy_mask != 0
    }

    fn wait_sequencer_idle(&self) -> WaitOutcome {
        self.wait.wait_until(|| !self.is_busy())
    }

    fn dispatchers(&self) -> Result<DispatcherPair> {
        self.profile.dispatchers.ok_or(NpuError::Unsupported {
            profile: self.profile.name,
            feature: "streaming dispatchers",
        })
    }

    fn expect_idle(&self, operation: &str) -> Result<()> {
        match self.activity {
            Activity::Idle => Ok(()),
            other => Err(NpuError::invalid_state(format!(
                "{operation} while {other:?}; call wait_execution first"
            ))),
        }
    }

    // ── Session ──────────────────────────────────────────────────────────────

    /// Force the hardware to a clean baseline before a run.
    ///
    /// Parks the sequencer (control written twice), resets both dispatchers
    /// and waits for the busy bit to drop. Safe to call at any time.
    pub fn reset_session(&mut self) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Reset);

        self.command(NpuBlock::IDLE);
        self.command(NpuBlock::IDLE);

        if let Some(pair) = self.profile.dispatchers {
            for engine in [Dispatcher::read(&pair), Dispatcher::write(&pair)] {
                let outcome = engine.reset(&self.bus, &self.wait);
                report.record(WaitTarget::Dma(engine.engine()), outcome);
            }
        }

        let outcome = self.wait_sequencer_idle();
        report.record(WaitTarget::Sequencer, outcome);
        if !report.is_clean() {
            tracing::warn!("Session reset left the hardware busy");
        }

        self.activity = Activity::Idle;
        tracing::info!("Session reset ({} polls)", report.total_polls());
        report
    }

    // ── Weight load ──────────────────────────────────────────────────────────

    /// Stream `count` weight matrices from bus address `weights` and latch
    /// them into the array.
    ///
    /// # Errors
    ///
    /// Returns error if the profile has no dispatchers, `count` is zero or
    /// too large, or an execution is outstanding. Timeouts are reported in
    /// the returned [`PhaseReport`].
    pub fn load_weights(&mut self, weights: u32, count: usize) -> Result<PhaseReport> {
        self.expect_idle("load_weights")?;
        let pair = self.dispatchers()?;
        let len = transfer_len(count, OPERAND_BYTES)?;
        let read = Dispatcher::read(&pair);

        tracing::info!("Loading {count} weight matrices from {weights:#010x}");
        let mut report = PhaseReport::new(Phase::LoadWeights);

        self.command(self.npu().load_weights);
        read.push_read(&self.bus, weights, len)?;

        let outcome = read.wait_idle(&self.bus, &self.wait);
        report.record(WaitTarget::Dma(Engine::Read), outcome);

        let outcome = self.wait_sequencer_idle();
        report.record(WaitTarget::Sequencer, outcome);

        if let Some(latch) = self.npu().weight_latch {
            self.write_word(latch, 1);
            self.write_word(latch, 0);
            tracing::debug!("Weights latched");
        }

        Ok(report)
    }

    // ── Execution ────────────────────────────────────────────────────────────

    /// Arm the drain: `count` output matrices to bus address `outputs`.
    ///
    /// Must precede [`Self::load_matrix`] so no output beat is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the profile has no dispatchers, `count` is invalid
    /// or another execution is outstanding.
    pub fn get_matrix(&mut self, outputs: u32, count: usize) -> Result<()> {
        self.expect_idle("get_matrix")?;
        let pair = self.dispatchers()?;
        let len = transfer_len(count, OUTPUT_BYTES)?;

        Dispatcher::write(&pair).push_write(&self.bus, outputs, len)?;
        self.activity = Activity::DrainArmed { count };
        Ok(())
    }

    /// Start execution on `count` input matrices at bus address `inputs`.
    ///
    /// Writes the row count (when the profile has one), switches the
    /// sequencer to execute and pushes the feed.
    ///
    /// # Errors
    ///
    /// Returns error if no drain is armed, `count` differs from the armed
    /// drain, or the profile has no dispatchers.
    pub fn load_matrix(&mut self, inputs: u32, count: usize) -> Result<()> {
        let armed = match self.activity {
            Activity::DrainArmed { count: armed } => armed,
            other => {
                return Err(NpuError::invalid_state(format!(
                    "load_matrix while {other:?}; arm the drain with get_matrix first"
                )))
            }
        };
        if count != armed {
            return Err(NpuError::invalid_argument(format!(
                "feeding {count} matrices into a drain armed for {armed}"
            )));
        }
        let pair = self.dispatchers()?;
        let len = transfer_len(count, OPERAND_BYTES)?;

        if let Some(rows) = self.npu().row_count {
            let total = count
                .checked_mul(ROWS_PER_MATRIX)
                .and_then(|r| u32::try_from(r).ok())
                .ok_or_else(|| NpuError::invalid_argument("row count overflow"))?;
            self.write_word(rows, total);
        }

        self.command(self.npu().execute);
        Dispatcher::read(&pair).push_read(&self.bus, inputs, len)?;

        tracing::info!("Executing {count} matrices from {inputs:#010x}");
        self.activity = Activity::Executing { count };
        Ok(())
    }

    /// Arm the drain then start the feed.
    ///
    /// # Errors
    ///
    /// See [`Self::get_matrix`] and [`Self::load_matrix`].
    pub fn execute_batch(&mut self, inputs: u32, outputs: u32, count: usize) -> Result<()> {
        self.get_matrix(outputs, count)?;
        self.load_matrix(inputs, count)
    }

    /// Wait for the drain to finish and the sequencer to go idle.
    ///
    /// The output region is only valid after this returns.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless [`Self::load_matrix`] started a feed; a
    /// drain armed on its own never completes. Timeouts are reported in the
    /// returned [`PhaseReport`].
    pub fn wait_execution(&mut self) -> Result<PhaseReport> {
        if !matches!(self.activity, Activity::Executing { .. }) {
            return Err(NpuError::invalid_state(format!(
                "wait_execution while {:?}; nothing is feeding",
                self.activity
            )));
        }
        let pair = self.dispatchers()?;
        let mut report = PhaseReport::new(Phase::Execute);

        let write = Dispatcher::write(&pair);
        let outcome = write.wait_idle(&self.bus, &self.wait);
        report.record(WaitTarget::Dma(Engine::Write), outcome);

        let outcome = self.wait_sequencer_idle();
        report.record(WaitTarget::Sequencer, outcome);

        self.activity = Activity::Idle;
        tracing::info!("Execution complete ({} polls)", report.total_polls());
        Ok(report)
    }
}

/// Bytes for `count` matrices of `per_matrix` bytes.
///
/// The result always fits a descriptor length word, so callers can check it
/// before touching any register.
pub(crate) fn transfer_len(count: usize, per_matrix: usize) -> Result<usize> {
    if count == 0 {
        return Err(NpuError::invalid_argument("matrix count must be at least 1"));
    }
    count
        .checked_mul(per_matrix)
        .filter(|&len| u32::try_from(len).is_ok())
        .ok_or_else(|| {
            NpuError::invalid_argument(format!("{count} matrices exceed the DMA length word"))
        })
}
