//! Descriptor push protocol for the streaming DMA dispatchers
//!
//! A [`Dispatcher`] names one engine (its CSR and descriptor sub-windows plus
//! the profile's flag layout) and issues requests against any
//! [`RegisterBus`]. Submission is fire-and-forget: pushing a descriptor never
//! waits, and only one descriptor per direction is ever outstanding.

use crate::error::{Engine, NpuError, Result};
use crate::mmio::RegisterBus;
use crate::wait::{WaitOutcome, WaitPolicy};
use npu_chip::descriptor::{csr, DescriptorFlags, DmaDescriptor};
use npu_chip::regs::{DispatcherPair, EngineBlock};

/// One streaming DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatcher {
    engine: Engine,
    block: EngineBlock,
    flags: DescriptorFlags,
}

impl Dispatcher {
    /// Memory-to-stream engine of `pair`.
    pub const fn read(pair: &DispatcherPair) -> Self {
        Self {
            engine: Engine::Read,
            block: pair.read,
            flags: pair.flags,
        }
    }

    /// Stream-to-memory engine of `pair`.
    pub const fn write(pair: &DispatcherPair) -> Self {
        Self {
            engine: Engine::Write,
            block: pair.write,
            flags: pair.flags,
        }
    }

    /// Direction of this engine.
    pub const fn engine(&self) -> Engine {
        self.engine
    }

    const fn status(&self) -> usize {
        self.block.csr + csr::STATUS
    }

    const fn control(&self) -> usize {
        self.block.csr + csr::CONTROL
    }

    /// Reset the engine and leave it idle, polling, with events cleared.
    ///
    /// The reset bit self-clears when the engine is done; that wait is
    /// bounded by `policy`. The status clear and control write happen even
    /// if it expires.
    pub fn reset<B: RegisterBus + ?Sized>(&self, bus: &B, policy: &WaitPolicy) -> WaitOutcome {
        let control = self.control();
        bus.write32(control, csr::control::RESET_DISPATCHER);

        let outcome =
            policy.wait_until(|| bus.read32(control) & csr::control::RESET_DISPATCHER == 0);

        bus.write32(self.status(), csr::status::CLEAR_ALL);
        bus.write32(control, 0);

        tracing::debug!("{} dispatcher reset: {outcome:?}", self.engine);
        outcome
    }

    /// Write `descriptor` into the descriptor sub-window, control word last.
    pub fn push<B: RegisterBus + ?Sized>(&self, bus: &B, descriptor: &DmaDescriptor) {
        tracing::debug!(
            "{} push: rd={:#010x} wr={:#010x} len={} ctrl={:#010x}",
            self.engine,
            descriptor.read_address,
            descriptor.write_address,
            descriptor.length,
            descriptor.control
        );
        for (offset, value) in descriptor.writes() {
            bus.write32(self.block.descriptor + offset, value);
        }
    }

    /// Stream `len` bytes from bus address `source` into the accelerator.
    ///
    /// # Errors
    ///
    /// Returns error if this is not the read engine or `len` does not fit the
    /// length word.
    pub fn push_read<B: RegisterBus + ?Sized>(&self, bus: &B, source: u32, len: usize) -> Result<()> {
        self.expect_engine(Engine::Read)?;
        let length = length_word(len)?;
        self.push(bus, &DmaDescriptor::read_stream(source, length, &self.flags));
        Ok(())
    }

    /// Drain up to `len` bytes of accelerator output to bus address `sink`.
    ///
    /// # Errors
    ///
    /// Returns error if this is not the write engine or `len` does not fit
    /// the length word.
    pub fn push_write<B: RegisterBus + ?Sized>(&self, bus: &B, sink: u32, len: usize) -> Result<()> {
        self.expect_engine(Engine::Write)?;
        let length = length_word(len)?;
        self.push(bus, &DmaDescriptor::write_stream(sink, length, &self.flags));
        Ok(())
    }

    /// Whether a descriptor is in flight.
    pub fn is_busy<B: RegisterBus + ?Sized>(&self, bus: &B) -> bool {
        bus.read32(self.status()) & csr::status::BUSY != 0
    }

    /// Poll until the engine goes idle or `policy` runs out.
    pub fn wait_idle<B: RegisterBus + ?Sized>(&self, bus: &B, policy: &WaitPolicy) -> WaitOutcome {
        policy.wait_until(|| !self.is_busy(bus))
    }

    fn expect_engine(&self, wanted: Engine) -> Result<()> {
        if self.engine == wanted {
            Ok(())
        } else {
            Err(NpuError::invalid_argument(format!(
                "{wanted} descriptor pushed to the {} engine",
                self.engine
            )))
        }
    }
}

fn length_word(len: usize) -> Result<u32> {
    if len == 0 {
        return Err(NpuError::invalid_argument("zero-length transfer"));
    }
    u32::try_from(len)
        .map_err(|_| NpuError::invalid_argument(format!("transfer of {len} bytes exceeds length word")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingBus;
    use npu_chip::descriptor::slot;
    use npu_chip::regs::HPS_MSGDMA;

    fn pair() -> DispatcherPair {
        HPS_MSGDMA.dispatchers.unwrap()
    }

    #[test]
    fn reset_sequence() {
        let bus = RecordingBus::new();
        let read = Dispatcher::read(&pair());
        assert!(read.reset(&bus, &WaitPolicy::Attempts(10)).is_ready());
        assert_eq!(
            bus.writes(),
            vec![
                (0x3_1004, csr::control::RESET_DISPATCHER),
                (0x3_1000, 0xFFFF_FFFF),
                (0x3_1004, 0),
            ]
        );
    }

    #[test]
    fn reset_is_idempotent() {
        let bus = RecordingBus::new();
        let write = Dispatcher::write(&pair());
        write.reset(&bus, &WaitPolicy::Attempts(10));
        let first = bus.writes();
        bus.clear();
        write.reset(&bus, &WaitPolicy::Attempts(10));
        assert_eq!(bus.writes(), first);
    }

    #[test]
    fn stuck_reset_is_bounded() {
        let bus = RecordingBus::new();
        bus.preset(0x3_1024, csr::control::RESET_DISPATCHER);
        let write = Dispatcher::write(&pair());
        let outcome = write.reset(&bus, &WaitPolicy::Attempts(50));
        assert_eq!(outcome, WaitOutcome::Expired { polls: 50 });
        assert_eq!(bus.reads_of(0x3_1024), 50);
        // Status still cleared and control released
        assert_eq!(bus.writes().last(), Some(&(0x3_1024, 0)));
    }

    #[test]
    fn push_read_writes_descriptor_in_order() {
        let bus = RecordingBus::new();
        let read = Dispatcher::read(&pair());
        read.push_read(&bus, 0x2000_1000, 6400).unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                (0x3_1040 + slot::READ_ADDRESS, 0x2000_1000),
                (0x3_1040 + slot::WRITE_ADDRESS, 0),
                (0x3_1040 + slot::LENGTH, 6400),
                (0x3_1040 + slot::CONTROL, 0x8C00_0000),
            ]
        );
    }

    #[test]
    fn push_write_uses_write_address_word() {
        let bus = RecordingBus::new();
        let write = Dispatcher::write(&pair());
        write.push_write(&bus, 0x2000_4000, 25_600).unwrap();
        assert_eq!(
            bus.writes(),
            vec![
                (0x3_1050, 0),
                (0x3_1054, 0x2000_4000),
                (0x3_1058, 25_600),
                (0x3_105C, 0x80C0_0000),
            ]
        );
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let bus = RecordingBus::new();
        let read = Dispatcher::read(&pair());
        assert!(read.push_write(&bus, 0, 64).is_err());
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let bus = RecordingBus::new();
        let read = Dispatcher::read(&pair());
        assert!(read.push_read(&bus, 0, 0).is_err());
        #[cfg(target_pointer_width = "64")]
        assert!(read.push_read(&bus, 0, 1 << 33).is_err());
    }

    #[test]
    fn busy_bit() {
        let bus = RecordingBus::new();
        let read = Dispatcher::read(&pair());
        assert!(!read.is_busy(&bus));
        bus.preset(0x3_1000, 0x1);
        assert!(read.is_busy(&bus));
        let outcome = read.wait_idle(&bus, &WaitPolicy::Attempts(3));
        assert_eq!(outcome, WaitOutcome::Expired { polls: 3 });
    }
}
