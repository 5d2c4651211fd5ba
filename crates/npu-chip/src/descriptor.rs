//! Streaming DMA dispatcher: CSR layout and the one-shot descriptor.
//!
//! Each dispatcher exposes two sub-windows:
//!
//! ```text
//! CSR          0x00 status   (bit 0 busy, W1C event bits)
//!              0x04 control  (bit 1 reset, bit 4 IRQ enable, bit 5 stop)
//! Descriptor   0x00 read address
//!              0x04 write address
//!              0x08 length in bytes
//!              0x0C control  (GO commits the descriptor)
//! ```
//!
//! A memory-to-stream engine uses the read address and leaves the write
//! address zero; a stream-to-memory engine does the reverse. Writing the
//! control word with GO set hands the descriptor to the engine, so it is
//! always the last word written.

// ── CSR ──────────────────────────────────────────────────────────────────────

/// Byte offsets within the CSR sub-window.
pub mod csr {
    /// Status register.
    pub const STATUS: usize = 0x00;
    /// Control register.
    pub const CONTROL: usize = 0x04;

    /// Status bits.
    pub mod status {
        /// A descriptor is being processed.
        pub const BUSY: u32 = 1 << 0;
        /// Writing this value clears every write-one-to-clear bit.
        pub const CLEAR_ALL: u32 = 0xFFFF_FFFF;
    }

    /// Control bits.
    pub mod control {
        /// Reset the dispatcher; self-clears when the reset completes.
        pub const RESET_DISPATCHER: u32 = 1 << 1;
        /// Global interrupt enable (never set: the driver polls).
        pub const GLOBAL_IRQ_ENABLE: u32 = 1 << 4;
        /// Stop the dispatcher.
        pub const STOP_DISPATCHER: u32 = 1 << 5;
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────────

/// Byte offsets within the descriptor sub-window.
pub mod slot {
    /// Source address (memory-to-stream).
    pub const READ_ADDRESS: usize = 0x00;
    /// Sink address (stream-to-memory).
    pub const WRITE_ADDRESS: usize = 0x04;
    /// Transfer length in bytes.
    pub const LENGTH: usize = 0x08;
    /// Control flags; GO commits.
    pub const CONTROL: usize = 0x0C;
}

/// Bit positions of the descriptor control flags.
///
/// The positions differ between bitstream revisions, so they travel with the
/// register profile. A zero mask means the behaviour is implicit in that
/// revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorFlags {
    /// Commit the descriptor.
    pub go: u32,
    /// Emit start-of-packet on the first beat.
    pub generate_sop: u32,
    /// Emit end-of-packet on the last beat.
    pub generate_eop: u32,
    /// Stop after `length` bytes.
    pub end_on_length: u32,
    /// Stop when the stream delivers end-of-packet.
    pub end_on_eop: u32,
}

impl DescriptorFlags {
    /// Standard dispatcher layout (end-on-length is implicit).
    pub const STANDARD: Self = Self {
        go: 1 << 31,
        generate_sop: 1 << 8,
        generate_eop: 1 << 9,
        end_on_length: 0,
        end_on_eop: 1 << 12,
    };

    /// Layout used by the HPS bitstream.
    pub const HPS: Self = Self {
        go: 1 << 31,
        generate_sop: 1 << 27,
        generate_eop: 1 << 26,
        end_on_length: 1 << 23,
        end_on_eop: 1 << 22,
    };

    /// Control word for a memory-to-stream transfer.
    pub const fn read_stream(&self) -> u32 {
        self.go | self.generate_sop | self.generate_eop
    }

    /// Control word for a stream-to-memory transfer.
    pub const fn write_stream(&self) -> u32 {
        self.go | self.end_on_length | self.end_on_eop
    }
}

/// One descriptor, exactly as written to the descriptor sub-window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaDescriptor {
    /// Memory source (zero for stream-to-memory).
    pub read_address: u32,
    /// Memory sink (zero for memory-to-stream).
    pub write_address: u32,
    /// Bytes to move.
    pub length: u32,
    /// Control flags.
    pub control: u32,
}

impl DmaDescriptor {
    /// Memory → accelerator stream.
    pub const fn read_stream(source: u32, length: u32, flags: &DescriptorFlags) -> Self {
        Self {
            read_address: source,
            write_address: 0,
            length,
            control: flags.read_stream(),
        }
    }

    /// Accelerator stream → memory.
    pub const fn write_stream(sink: u32, length: u32, flags: &DescriptorFlags) -> Self {
        Self {
            read_address: 0,
            write_address: sink,
            length,
            control: flags.write_stream(),
        }
    }

    /// `(offset, value)` pairs in the order they must be written.
    pub const fn writes(&self) -> [(usize, u32); 4] {
        [
            (slot::READ_ADDRESS, self.read_address),
            (slot::WRITE_ADDRESS, self.write_address),
            (slot::LENGTH, self.length),
            (slot::CONTROL, self.control),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout_control_words() {
        assert_eq!(DescriptorFlags::STANDARD.read_stream(), 0x8000_0300);
        assert_eq!(DescriptorFlags::STANDARD.write_stream(), 0x8000_1000);
    }

    #[test]
    fn hps_layout_control_words() {
        assert_eq!(DescriptorFlags::HPS.read_stream(), 0x8C00_0000);
        assert_eq!(DescriptorFlags::HPS.write_stream(), 0x80C0_0000);
    }

    #[test]
    fn control_word_is_written_last() {
        let d = DmaDescriptor::write_stream(0x2000_4000, 25_600, &DescriptorFlags::HPS);
        let writes = d.writes();
        assert_eq!(writes[0], (slot::READ_ADDRESS, 0));
        assert_eq!(writes[1], (slot::WRITE_ADDRESS, 0x2000_4000));
        assert_eq!(writes[2], (slot::LENGTH, 25_600));
        assert_eq!(writes[3].0, slot::CONTROL);
        assert_ne!(writes[3].1 & DescriptorFlags::HPS.go, 0);
    }
}
