//! Validation harness
//!
//! End-to-end checks that drive a sequencer and shared buffer exactly as an
//! application would and compare against the CPU reference:
//!
//! - [`run_benchmark`]: batched matmul through the streaming dispatchers,
//!   verified element-wise and timed against the CPU
//! - [`run_mac_check`]: `3 × 7 + 10` on the legacy MAC element
//! - [`run_datapath`]: one integrated-DMA transfer on the legacy bitstream
//!
//! A run whose waits time out is a failed verification, never an error.

use crate::error::{NpuError, Result};
use crate::integrated::IntegratedTransfer;
use crate::mmio::{RegisterBus, SharedMemory};
use crate::sequencer::{PhaseReport, Sequencer};
use crate::staging::{RegionLayout, RegionPlan, SharedBuffer};
use npu_chip::matrix::{OperandMatrix, OutputMatrix, DIM};
use std::fmt;
use std::time::{Duration, Instant};

/// Mismatch lines kept in a [`VerifyReport`].
pub const MAX_REPORTED_MISMATCHES: usize = 5;

// ── Verification ─────────────────────────────────────────────────────────────

/// One element that differs from the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Matrix index in the batch
    pub batch: usize,
    /// Row
    pub row: usize,
    /// Column
    pub col: usize,
    /// Value read back from the accelerator
    pub hardware: i32,
    /// Reference value
    pub expected: i32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} [{}, {}]: hw={:#010x} expected={:#010x}",
            self.batch, self.row, self.col, self.hardware, self.expected
        )
    }
}

/// Both views of the first matrix that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixDump {
    /// Matrix index in the batch
    pub batch: usize,
    /// Reference result
    pub expected: OutputMatrix,
    /// Accelerator result
    pub hardware: OutputMatrix,
}

impl fmt::Display for MatrixDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = DIM * 9 - 1;
        writeln!(f, "first mismatch in batch {}", self.batch)?;
        writeln!(f, "{:<width$}   {}", "expected", "hardware")?;
        for (exp, hw) in self.expected.rows().iter().zip(self.hardware.rows()) {
            let hex = |row: &[i32; DIM]| {
                row.iter()
                    .map(|v| format!("{v:08x}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            let marker = if exp == hw { ' ' } else { '*' };
            writeln!(f, "{} {marker} {}", hex(exp), hex(hw))?;
        }
        Ok(())
    }
}

/// Element-wise comparison of a batch against the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Elements compared
    pub checked: usize,
    /// Elements that differ
    pub mismatch_count: usize,
    /// The first few mismatches
    pub mismatches: Vec<Mismatch>,
    /// The first failing matrix, in full
    pub first_failure: Option<MatrixDump>,
}

impl VerifyReport {
    /// Compare `hardware` against `expected`, matrix by matrix.
    ///
    /// A missing hardware matrix counts as a full matrix of mismatches.
    pub fn compare(expected: &[OutputMatrix], hardware: &[OutputMatrix]) -> Self {
        let mut report = Self {
            checked: 0,
            mismatch_count: 0,
            mismatches: Vec::new(),
            first_failure: None,
        };
        for (batch, exp) in expected.iter().enumerate() {
            let Some(hw) = hardware.get(batch) else {
                report.checked += DIM * DIM;
                report.mismatch_count += DIM * DIM;
                continue;
            };
            for row in 0..DIM {
                for col in 0..DIM {
                    report.checked += 1;
                    let (h, e) = (hw.get(row, col), exp.get(row, col));
                    if h == e {
                        continue;
                    }
                    if report.first_failure.is_none() {
                        report.first_failure = Some(MatrixDump {
                            batch,
                            expected: *exp,
                            hardware: *hw,
                        });
                    }
                    if report.mismatches.len() < MAX_REPORTED_MISMATCHES {
                        report.mismatches.push(Mismatch {
                            batch,
                            row,
                            col,
                            hardware: h,
                            expected: e,
                        });
                    }
                    report.mismatch_count += 1;
                }
            }
        }
        report
    }

    /// Every element matched.
    pub const fn is_pass(&self) -> bool {
        self.mismatch_count == 0
    }
}

// ── Streaming benchmark ──────────────────────────────────────────────────────

/// Inputs to [`run_benchmark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkPlan {
    /// Matrices per batch
    pub batch: usize,
    /// Region offsets in the shared window
    pub layout: RegionLayout,
    /// Weight matrix
    pub weights: OperandMatrix,
}

impl BenchmarkPlan {
    /// Default matrices per batch.
    pub const DEFAULT_BATCH: usize = 100;

    /// Plan for `batch` matrices with identity weights.
    pub fn with_batch(batch: usize) -> Self {
        Self {
            batch,
            ..Self::default()
        }
    }
}

impl Default for BenchmarkPlan {
    fn default() -> Self {
        Self {
            batch: Self::DEFAULT_BATCH,
            layout: RegionLayout::default(),
            weights: OperandMatrix::identity(),
        }
    }
}

/// Outcome of one benchmark run.
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    /// Matrices in the batch
    pub batch: usize,
    /// CPU reference time
    pub cpu_time: Duration,
    /// Accelerator time: execute plus wait, weight load excluded
    pub npu_time: Duration,
    /// Session reset, weight load and execution, in order
    pub phases: Vec<PhaseReport>,
    /// Result comparison
    pub verify: VerifyReport,
}

impl BenchmarkReport {
    /// Outputs matched and no wait expired.
    pub fn passed(&self) -> bool {
        self.verify.is_pass() && self.phases.iter().all(PhaseReport::is_clean)
    }

    /// CPU time over accelerator time, for passing runs.
    #[allow(clippy::cast_precision_loss)]
    pub fn speedup(&self) -> Option<f64> {
        let npu = self.npu_time.as_nanos();
        (self.passed() && npu > 0).then(|| self.cpu_time.as_nanos() as f64 / npu as f64)
    }
}

/// Batched matmul through the streaming dispatchers, checked against the CPU.
///
/// Inputs follow the asymmetric pattern `((r*8 + c + b) mod 256) − 128`, so
/// transposition or lane swaps cannot cancel out.
///
/// # Errors
///
/// Returns error if the regions do not fit the shared window or the
/// profile cannot stream. Timeouts show up as a failed report.
pub fn run_benchmark<B, M>(
    seq: &mut Sequencer<B>,
    buf: &mut SharedBuffer<M>,
    plan: &BenchmarkPlan,
) -> Result<BenchmarkReport>
where
    B: RegisterBus,
    M: SharedMemory,
{
    let regions = RegionPlan::within(
        buf.memory().size(),
        seq.profile().shared_bus_base,
        plan.layout,
        1,
        plan.batch,
    )?;
    tracing::info!("Benchmark: {} matrices", plan.batch);

    let inputs: Vec<OperandMatrix> = (0..plan.batch).map(OperandMatrix::asymmetric).collect();
    buf.write_weights(&regions.weights(), &[plan.weights])?;
    buf.write_inputs(&regions.inputs(), &inputs)?;

    let cpu_start = Instant::now();
    let expected: Vec<OutputMatrix> = inputs.iter().map(|m| m.matmul(&plan.weights)).collect();
    let cpu_time = cpu_start.elapsed();

    let mut phases = vec![seq.reset_session()];
    buf.clear(&regions.outputs())?;
    phases.push(seq.load_weights(regions.weights().bus, 1)?);

    let npu_start = Instant::now();
    seq.execute_batch(regions.inputs().bus, regions.outputs().bus, plan.batch)?;
    phases.push(seq.wait_execution()?);
    let npu_time = npu_start.elapsed();

    let hardware = buf.read_outputs(&regions.outputs(), plan.batch)?;
    let verify = VerifyReport::compare(&expected, &hardware);
    if verify.is_pass() {
        tracing::info!("Benchmark verified: {} elements", verify.checked);
    } else {
        tracing::warn!("Benchmark failed: {} mismatches", verify.mismatch_count);
    }

    Ok(BenchmarkReport {
        batch: plan.batch,
        cpu_time,
        npu_time,
        phases,
        verify,
    })
}

// ── Legacy checks ────────────────────────────────────────────────────────────

/// Outcome of [`run_mac_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacReport {
    /// Accumulator read back
    pub result: i32,
    /// `y + x * weight`
    pub expected: i32,
}

impl MacReport {
    /// Result matched.
    pub const fn passed(&self) -> bool {
        self.result == self.expected
    }
}

/// Weight 7, x 3, y 10 on the single MAC element; expects 31.
///
/// # Errors
///
/// Returns `Unsupported` if the profile has no MAC element.
pub fn run_mac_check<B: RegisterBus>(seq: &mut Sequencer<B>) -> Result<MacReport> {
    let (weight, x, y) = (7, 3, 10);
    let result = seq.mac(weight, x, y)?;
    Ok(MacReport {
        result,
        expected: y + x * weight,
    })
}

/// Inputs to [`run_datapath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatapathPlan {
    /// Source rows, offset in the shared window
    pub source: usize,
    /// Output rows, offset in the shared window
    pub sink: usize,
    /// Rows to stream
    pub rows: u32,
}

impl Default for DatapathPlan {
    fn default() -> Self {
        Self {
            source: 0,
            sink: 0x0010_0000,
            rows: 8,
        }
    }
}

/// Outcome of [`run_datapath`].
#[derive(Debug, Clone)]
pub struct DatapathReport {
    /// Wait record of the transfer
    pub phase: PhaseReport,
    /// Leading output words
    pub beats: Vec<u32>,
}

impl DatapathReport {
    /// Output beats kept.
    pub const BEATS: usize = 16;

    /// Both DMA halves completed.
    pub fn passed(&self) -> bool {
        self.phase.is_clean()
    }
}

/// Stream a marker pattern through the integrated DMA and read back the
/// first output beats.
///
/// # Errors
///
/// Returns error if the profile has no integrated DMA or the plan leaves the
/// shared window.
pub fn run_datapath<B, M>(
    seq: &mut Sequencer<B>,
    buf: &mut SharedBuffer<M>,
    plan: &DatapathPlan,
) -> Result<DatapathReport>
where
    B: RegisterBus,
    M: SharedMemory,
{
    let base = seq.profile().shared_bus_base;
    let transfer = IntegratedTransfer::for_rows(
        bus_address(base, plan.source)?,
        bus_address(base, plan.sink)?,
        plan.rows,
    )?;
    transfer.validate()?;

    let pattern: Vec<u8> = (0..transfer.read_words)
        .flat_map(|i| ((i << 16) | 0x00AA).to_le_bytes())
        .collect();
    let out_len = transfer.write_words as usize * 4;

    let memory = buf.memory_mut();
    memory.write_bytes(plan.source, &pattern)?;
    memory.zero(plan.sink, out_len)?;

    let phase = seq.run_integrated(&transfer)?;

    let mut raw = vec![0u8; out_len.min(DatapathReport::BEATS * 4)];
    buf.memory().read_bytes(plan.sink, &mut raw)?;
    let beats = raw
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    Ok(DatapathReport { phase, beats })
}

fn bus_address(base: u32, offset: usize) -> Result<u32> {
    u32::try_from(offset)
        .ok()
        .and_then(|o| base.checked_add(o))
        .ok_or_else(|| NpuError::invalid_argument(format!("offset {offset:#x} beyond 32-bit bus")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use npu_chip::Matrix;

    #[test]
    fn compare_counts_and_caps() {
        let expected = vec![Matrix::<i32>::default(); 3];
        let mut hardware = expected.clone();
        for c in 0..DIM {
            hardware[1].set(2, c, 1);
        }
        let report = VerifyReport::compare(&expected, &hardware);
        assert_eq!(report.checked, 3 * 64);
        assert_eq!(report.mismatch_count, 8);
        assert_eq!(report.mismatches.len(), MAX_REPORTED_MISMATCHES);
        assert_eq!(report.mismatches[0].batch, 1);
        assert_eq!(report.mismatches[0].row, 2);
        assert_eq!(report.first_failure.unwrap().batch, 1);
        assert!(!report.is_pass());
    }

    #[test]
    fn missing_matrices_are_mismatches() {
        let expected = vec![Matrix::<i32>::default(); 2];
        let report = VerifyReport::compare(&expected, &expected[..1]);
        assert_eq!(report.mismatch_count, 64);
    }

    #[test]
    fn dump_marks_differing_rows() {
        let expected = Matrix::<i32>::default();
        let mut hardware = expected;
        hardware.set(0, 0, -1);
        let dump = MatrixDump {
            batch: 4,
            expected,
            hardware,
        };
        let text = dump.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2 + DIM);
        assert!(lines[2].contains('*'));
        assert!(lines[2].ends_with("ffffffff 00000000 00000000 00000000 00000000 00000000 00000000 00000000"));
        assert!(!lines[3].contains('*'));
    }

    #[test]
    fn default_plan() {
        let plan = BenchmarkPlan::default();
        assert_eq!(plan.batch, 100);
        assert_eq!(plan.weights, OperandMatrix::identity());
        assert_eq!(BenchmarkPlan::with_batch(10).layout, RegionLayout::default());
    }
}
