//! Legacy single-element MAC path
//!
//! The legacy bitstream exposes one processing element directly on the
//! control block. There is no status bit; the result is read after a fixed
//! settling delay, so this path is time-gated rather than polled.

#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use crate::error::{NpuError, Result};
use crate::mmio::RegisterBus;
use crate::sequencer::Sequencer;
use npu_chip::regs::PeBlock;

impl<B: RegisterBus> Sequencer<B> {
    fn pe(&self) -> Result<PeBlock> {
        self.profile.pe.ok_or(NpuError::Unsupported {
            profile: self.profile.name,
            feature: "MAC processing element",
        })
    }

    /// `y + x * weight` on the single MAC element.
    ///
    /// Latches `weight`, presents `x` and `y` with a valid strobe, waits the
    /// configured settling delay and reads the accumulator.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` if the profile has no MAC element.
    pub fn mac(&mut self, weight: i32, x: i32, y: i32) -> Result<i32> {
        let pe = self.pe()?;

        self.write_word(pe.x_in, weight as u32);
        self.write_word(pe.control, PeBlock::LOAD_WEIGHT);
        self.write_word(pe.control, 0);

        self.write_word(pe.x_in, x as u32);
        self.write_word(pe.y_in, y as u32);
        self.write_word(pe.control, PeBlock::VALID);
        self.write_word(pe.control, 0);

        if !self.pe_settle.is_zero() {
            std::thread::sleep(self.pe_settle);
        }

        let result = self.read_word(pe.y_out) as i32;
        tracing::debug!("MAC {y} + {x} * {weight} = {result}");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::RecordingBus;
    use crate::Sequencer;
    use npu_chip::regs::{HPS_MSGDMA, NIOS_LEGACY};
    use std::time::Duration;

    #[test]
    fn mac_register_sequence() {
        let bus = RecordingBus::new();
        bus.preset(0x3_002C, 31);
        let mut seq = Sequencer::new(&bus, &NIOS_LEGACY).with_pe_settle(Duration::ZERO);
        assert_eq!(seq.mac(7, 3, 10).unwrap(), 31);
        assert_eq!(
            bus.writes(),
            vec![
                (0x3_0024, 7),
                (0x3_0020, 1),
                (0x3_0020, 0),
                (0x3_0024, 3),
                (0x3_0028, 10),
                (0x3_0020, 2),
                (0x3_0020, 0),
            ]
        );
    }

    #[test]
    fn negative_result_sign_extends() {
        let bus = RecordingBus::new();
        bus.preset(0x3_002C, 0xFFFF_FFF6);
        let mut seq = Sequencer::new(&bus, &NIOS_LEGACY).with_pe_settle(Duration::ZERO);
        assert_eq!(seq.mac(-2, 5, 0).unwrap(), -10);
        assert!(bus.writes().contains(&(0x3_0024, 0xFFFF_FFFE)));
    }

    #[test]
    fn streaming_profile_has_no_pe() {
        let bus = RecordingBus::new();
        let mut seq = Sequencer::new(&bus, &HPS_MSGDMA);
        assert!(seq.mac(7, 3, 10).is_err());
        assert!(bus.writes().is_empty());
    }
}
