//! Integrated DMA datapath (legacy bitstream)
//!
//! Before the streaming dispatchers, the NPU block carried its own DMA. One
//! transfer moves `read_words` 32-bit words in and `write_words` out, and
//! both halves report completion in the status register.

use crate::error::{Engine, NpuError, Phase, Result};
use crate::mmio::RegisterBus;
use crate::sequencer::{PhaseReport, Sequencer, WaitTarget};
use npu_chip::regs::IntegratedDma;

/// One integrated-DMA run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegratedTransfer {
    /// Bus address of the input rows
    pub source: u32,
    /// Input length in 32-bit words
    pub read_words: u32,
    /// Bus address of the output rows
    pub sink: u32,
    /// Output length in 32-bit words
    pub write_words: u32,
    /// Rows the sequencer streams
    pub rows: u32,
}

impl IntegratedTransfer {
    /// Transfer of `rows` input rows: two words in, eight words out per row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either length overflows 32 bits.
    pub fn for_rows(source: u32, sink: u32, rows: u32) -> Result<Self> {
        let (read_words, write_words) = words_for(rows)?;
        Ok(Self {
            source,
            read_words,
            sink,
            write_words,
            rows,
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.rows == 0 {
            return Err(NpuError::invalid_argument("empty integrated transfer"));
        }
        if words_for(self.rows)? != (self.read_words, self.write_words) {
            return Err(NpuError::invalid_argument(format!(
                "{} rows need {} words in and {} out",
                self.rows,
                u64::from(self.rows) * 2,
                u64::from(self.rows) * 8
            )));
        }
        if self.write_words > IntegratedDma::LENGTH_MASK {
            return Err(NpuError::invalid_argument(format!(
                "{} output words exceed the write length field",
                self.write_words
            )));
        }
        Ok(())
    }
}

/// Input and output word counts for `rows` rows.
fn words_for(rows: u32) -> Result<(u32, u32)> {
    rows.checked_mul(2)
        .zip(rows.checked_mul(8))
        .ok_or_else(|| NpuError::invalid_argument(format!("{rows} rows overflow the length words")))
}

impl<B: RegisterBus> Sequencer<B> {
    /// Run one transfer through the integrated DMA and wait for both halves.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` on profiles without an integrated DMA and
    /// `InvalidArgument` for empty or oversized transfers. A wait that
    /// expires is reported in the returned [`PhaseReport`].
    pub fn run_integrated(&mut self, transfer: &IntegratedTransfer) -> Result<PhaseReport> {
        let dma = self.profile.integrated_dma.ok_or(NpuError::Unsupported {
            profile: self.profile.name,
            feature: "integrated DMA",
        })?;
        transfer.validate()?;

        tracing::info!(
            "Integrated DMA: {} words {:#010x} -> {} words {:#010x}",
            transfer.read_words,
            transfer.source,
            transfer.write_words,
            transfer.sink
        );

        if let Some(rows) = self.npu().row_count {
            self.write_word(rows, transfer.rows);
        }
        self.write_word(dma.read_address, transfer.source);
        self.write_word(dma.read_length, transfer.read_words);
        self.write_word(dma.write_address, transfer.sink);

        self.command(self.npu().execute);
        self.write_word(
            dma.write_control,
            IntegratedDma::START_WRITE | IntegratedDma::START_READ | transfer.write_words,
        );

        let status = self.npu().status;
        let outcome = self.wait.wait_until(|| {
            self.read_word(status) & IntegratedDma::DONE_MASK == IntegratedDma::DONE_MASK
        });

        let mut report = PhaseReport::new(Phase::Execute);
        report.record(WaitTarget::Dma(Engine::Integrated), outcome);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Timeout;
    use crate::testing::RecordingBus;
    use crate::wait::WaitPolicy;
    use npu_chip::regs::{HPS_MSGDMA, NIOS_LEGACY};

    #[test]
    fn register_sequence() {
        let bus = RecordingBus::new();
        bus.preset(0x3_0004, 0x0003_0000);
        let mut seq = Sequencer::new(&bus, &NIOS_LEGACY);
        let t = IntegratedTransfer::for_rows(0x2000_0000, 0x2010_0000, 8).unwrap();
        let report = seq.run_integrated(&t).unwrap();
        assert!(report.is_clean());
        assert_eq!(
            bus.writes(),
            vec![
                (0x3_0018, 8),
                (0x3_0008, 0x2000_0000),
                (0x3_000C, 16),
                (0x3_0010, 0x2010_0000),
                (0x3_0000, 0x3),
                (0x3_0014, (1 << 17) | (1 << 16) | 64),
            ]
        );
    }

    #[test]
    fn half_done_times_out() {
        let bus = RecordingBus::new();
        bus.preset(0x3_0004, 0x0001_0000);
        let mut seq = Sequencer::new(&bus, &NIOS_LEGACY).with_wait_policy(WaitPolicy::Attempts(8));
        let t = IntegratedTransfer::for_rows(0x2000_0000, 0x2010_0000, 8).unwrap();
        let report = seq.run_integrated(&t).unwrap();
        assert_eq!(
            report.timeouts(),
            vec![Timeout::Dma {
                engine: Engine::Integrated,
                polls: 8
            }]
        );
    }

    #[test]
    fn oversized_and_unsupported() {
        let bus = RecordingBus::new();
        let mut seq = Sequencer::new(&bus, &NIOS_LEGACY);
        let t = IntegratedTransfer::for_rows(0, 0, 0x2000).unwrap();
        assert!(seq.run_integrated(&t).is_err());

        let mut seq = Sequencer::new(&bus, &HPS_MSGDMA);
        let t = IntegratedTransfer::for_rows(0, 0, 8).unwrap();
        assert!(matches!(
            seq.run_integrated(&t),
            Err(NpuError::Unsupported { .. })
        ));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn row_count_overflow_is_rejected() {
        assert!(matches!(
            IntegratedTransfer::for_rows(0x2000_0000, 0x2010_0000, 0x2000_0001),
            Err(NpuError::InvalidArgument { .. })
        ));

        // Lengths that wrapped are caught before any register is touched
        let bus = RecordingBus::new();
        let mut seq = Sequencer::new(&bus, &NIOS_LEGACY);
        let rows = 0x2000_0001u32;
        let wrapped = IntegratedTransfer {
            source: 0x2000_0000,
            read_words: rows.wrapping_mul(2),
            sink: 0x2010_0000,
            write_words: rows.wrapping_mul(8),
            rows,
        };
        assert_eq!(wrapped.write_words, 8);
        assert!(matches!(
            seq.run_integrated(&wrapped),
            Err(NpuError::InvalidArgument { .. })
        ));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn inconsistent_lengths_are_rejected() {
        let bus = RecordingBus::new();
        let mut seq = Sequencer::new(&bus, &NIOS_LEGACY);
        let t = IntegratedTransfer {
            write_words: 8,
            ..IntegratedTransfer::for_rows(0x2000_0000, 0x2010_0000, 8).unwrap()
        };
        assert!(seq.run_integrated(&t).is_err());
        assert!(bus.writes().is_empty());
    }
}
