//! Register profiles: one table per bitstream revision.
//!
//! The NPU control block has gone through several incompatible layouts. Each
//! layout is described once here and selected by name at start-up; nothing
//! else in the workspace hard-codes an offset.
//!
//! ```text
//! hps-msgdma   NPU @ 0x30000: ctrl 0, status 1, rows 6, latch 7
//!              read dispatcher  CSR 0x31000 / desc 0x31040
//!              write dispatcher CSR 0x31020 / desc 0x31050   (HPS flag bits)
//! nios-msgdma  same NPU block, standard flag bits, no row-count register
//! nios-legacy  NPU @ 0x30000: ctrl 0, status 1, integrated DMA 2..5, rows 6,
//!              MAC PE 8..11; no dispatchers
//! ```
//!
//! All register offsets below are byte offsets from the start of the control
//! window. NPU block registers are listed by word index and resolved with
//! [`NpuBlock::offset`].

use crate::bridge::{Window, HPS_FPGA_RAM, HPS_FPGA_RAM_BUS, LW_HPS2FPGA};
use crate::descriptor::DescriptorFlags;

// ── NPU control block ────────────────────────────────────────────────────────

/// Byte offset of the NPU control block inside the LW bridge.
pub const NPU_CTRL_OFFSET: usize = 0x0003_0000;

/// Control register values and word indices of the NPU block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpuBlock {
    /// Byte offset of word 0.
    pub base: usize,
    /// Control register (mode + start).
    pub control: usize,
    /// Status register.
    pub status: usize,
    /// Sequencer-busy bit in the status register.
    pub busy_mask: u32,
    /// Total streamed rows; drives end-of-packet on the output stream.
    pub row_count: Option<usize>,
    /// Shadow-to-active weight latch.
    pub weight_latch: Option<usize>,
    /// Control value: weight-load mode, start.
    pub load_weights: u32,
    /// Control value: execute mode, start.
    pub execute: u32,
}

impl NpuBlock {
    /// Control value that parks the sequencer.
    pub const IDLE: u32 = 0;

    /// Byte offset of word `index` of the block.
    pub const fn offset(&self, index: usize) -> usize {
        self.base + index * 4
    }
}

// ── Streaming dispatchers ────────────────────────────────────────────────────

/// CSR and descriptor sub-windows of one dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineBlock {
    /// Byte offset of the CSR sub-window.
    pub csr: usize,
    /// Byte offset of the descriptor sub-window.
    pub descriptor: usize,
}

/// Feed (memory → NPU) and drain (NPU → memory) dispatchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherPair {
    /// Memory-to-stream engine.
    pub read: EngineBlock,
    /// Stream-to-memory engine.
    pub write: EngineBlock,
    /// Descriptor flag layout.
    pub flags: DescriptorFlags,
}

// ── Integrated DMA (legacy) ──────────────────────────────────────────────────

/// DMA block embedded in the legacy NPU control block (word indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegratedDma {
    /// Source bus address.
    pub read_address: usize,
    /// Source length in 32-bit words.
    pub read_length: usize,
    /// Sink bus address.
    pub write_address: usize,
    /// Start bits and sink length in words.
    pub write_control: usize,
}

impl IntegratedDma {
    /// Start the feed side.
    pub const START_READ: u32 = 1 << 16;
    /// Start the drain side.
    pub const START_WRITE: u32 = 1 << 17;
    /// Both sides finished (status register).
    pub const DONE_MASK: u32 = 0x0003_0000;
    /// Sink length field of the write-control register.
    pub const LENGTH_MASK: u32 = 0x0000_FFFF;
}

// ── Single MAC processing element (legacy) ───────────────────────────────────

/// Directly driven MAC PE (word indices). There is no status bit: results
/// are valid after a fixed settling time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeBlock {
    /// Strobe register.
    pub control: usize,
    /// Operand / weight input.
    pub x_in: usize,
    /// Partial sum input.
    pub y_in: usize,
    /// Accumulated result.
    pub y_out: usize,
}

impl PeBlock {
    /// Strobe: latch `x_in` as the weight.
    pub const LOAD_WEIGHT: u32 = 1;
    /// Strobe: `y_out = y_in + x_in * weight`.
    pub const VALID: u32 = 2;
}

// ── Profiles ─────────────────────────────────────────────────────────────────

/// Everything revision-specific about one bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterProfile {
    /// Name used to select the profile.
    pub name: &'static str,
    /// One-line description.
    pub summary: &'static str,
    /// Register window.
    pub control_window: Window,
    /// Matrix staging window.
    pub shared_window: Window,
    /// Bus address of the first byte of `shared_window`.
    pub shared_bus_base: u32,
    /// NPU control block.
    pub npu: NpuBlock,
    /// Streaming dispatchers, when the bitstream has them.
    pub dispatchers: Option<DispatcherPair>,
    /// Integrated DMA, on legacy bitstreams.
    pub integrated_dma: Option<IntegratedDma>,
    /// Single MAC PE, on legacy bitstreams.
    pub pe: Option<PeBlock>,
}

const MSGDMA_NPU: NpuBlock = NpuBlock {
    base: NPU_CTRL_OFFSET,
    control: 0,
    status: 1,
    busy_mask: 1 << 0,
    row_count: Some(6),
    weight_latch: Some(7),
    load_weights: 0x3,
    execute: 0x1,
};

const MSGDMA_ENGINES: (EngineBlock, EngineBlock) = (
    EngineBlock {
        csr: 0x0003_1000,
        descriptor: 0x0003_1040,
    },
    EngineBlock {
        csr: 0x0003_1020,
        descriptor: 0x0003_1050,
    },
);

/// Linux host, HPS dispatchers, row-count driven end-of-packet.
pub const HPS_MSGDMA: RegisterProfile = RegisterProfile {
    name: "hps-msgdma",
    summary: "Linux HPS host, streaming dispatchers (HPS flag layout), row-count EOP",
    control_window: LW_HPS2FPGA,
    shared_window: HPS_FPGA_RAM,
    shared_bus_base: HPS_FPGA_RAM_BUS,
    npu: MSGDMA_NPU,
    dispatchers: Some(DispatcherPair {
        read: MSGDMA_ENGINES.0,
        write: MSGDMA_ENGINES.1,
        flags: DescriptorFlags::HPS,
    }),
    integrated_dma: None,
    pe: None,
};

/// Standard dispatcher flag layout, no row-count register.
pub const NIOS_MSGDMA: RegisterProfile = RegisterProfile {
    name: "nios-msgdma",
    summary: "Streaming dispatchers (standard flag layout), no row-count register",
    control_window: LW_HPS2FPGA,
    shared_window: HPS_FPGA_RAM,
    shared_bus_base: HPS_FPGA_RAM_BUS,
    npu: NpuBlock {
        row_count: None,
        ..MSGDMA_NPU
    },
    dispatchers: Some(DispatcherPair {
        read: MSGDMA_ENGINES.0,
        write: MSGDMA_ENGINES.1,
        flags: DescriptorFlags::STANDARD,
    }),
    integrated_dma: None,
    pe: None,
};

/// Legacy bitstream: integrated DMA and a directly driven MAC PE.
///
/// The mode bit is inverted relative to the dispatcher bitstreams: `0x3`
/// starts execution here.
pub const NIOS_LEGACY: RegisterProfile = RegisterProfile {
    name: "nios-legacy",
    summary: "Legacy bitstream: integrated DMA + single MAC PE, no dispatchers",
    control_window: LW_HPS2FPGA,
    shared_window: HPS_FPGA_RAM,
    shared_bus_base: HPS_FPGA_RAM_BUS,
    npu: NpuBlock {
        base: NPU_CTRL_OFFSET,
        control: 0,
        status: 1,
        busy_mask: 1 << 0,
        row_count: Some(6),
        weight_latch: None,
        load_weights: 0x1,
        execute: 0x3,
    },
    dispatchers: None,
    integrated_dma: Some(IntegratedDma {
        read_address: 2,
        read_length: 3,
        write_address: 4,
        write_control: 5,
    }),
    pe: Some(PeBlock {
        control: 8,
        x_in: 9,
        y_in: 10,
        y_out: 11,
    }),
};

/// Profile used when none is selected.
pub const DEFAULT_PROFILE: &RegisterProfile = &HPS_MSGDMA;

/// Every shipped profile, default first.
pub const ALL_PROFILES: &[&RegisterProfile] = &[&HPS_MSGDMA, &NIOS_MSGDMA, &NIOS_LEGACY];

impl RegisterProfile {
    /// Look a profile up by name.
    pub fn by_name(name: &str) -> Option<&'static Self> {
        ALL_PROFILES.iter().copied().find(|p| p.name == name)
    }

    /// Byte offsets of every NPU-block register the profile defines.
    pub fn npu_offsets(&self) -> Vec<usize> {
        let npu = &self.npu;
        let mut words = vec![npu.control, npu.status];
        words.extend(npu.row_count);
        words.extend(npu.weight_latch);
        if let Some(dma) = &self.integrated_dma {
            words.extend([
                dma.read_address,
                dma.read_length,
                dma.write_address,
                dma.write_control,
            ]);
        }
        if let Some(pe) = &self.pe {
            words.extend([pe.control, pe.x_in, pe.y_in, pe.y_out]);
        }
        words.into_iter().map(|w| npu.offset(w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npu_registers_do_not_overlap() {
        for profile in ALL_PROFILES {
            let mut offsets = profile.npu_offsets();
            let n = offsets.len();
            offsets.sort_unstable();
            offsets.dedup();
            assert_eq!(offsets.len(), n, "{} has overlapping registers", profile.name);
        }
    }

    #[test]
    fn everything_fits_in_the_control_window() {
        for profile in ALL_PROFILES {
            for off in profile.npu_offsets() {
                assert!(profile.control_window.contains(off, 4));
                assert_eq!(off % 4, 0);
            }
            if let Some(d) = &profile.dispatchers {
                for block in [d.read, d.write] {
                    assert!(profile.control_window.contains(block.csr, 8));
                    assert!(profile.control_window.contains(block.descriptor, 16));
                }
            }
        }
    }

    #[test]
    fn confirmed_hps_addresses() {
        let p = RegisterProfile::by_name("hps-msgdma").unwrap();
        assert_eq!(p.npu.offset(p.npu.status), 0x3_0004);
        assert_eq!(p.npu.offset(p.npu.row_count.unwrap()), 0x3_0018);
        assert_eq!(p.npu.offset(p.npu.weight_latch.unwrap()), 0x3_001C);
        let d = p.dispatchers.unwrap();
        assert_eq!(d.read.descriptor, 0x3_1040);
        assert_eq!(d.write.csr, 0x3_1020);
    }

    #[test]
    fn names_are_unique_and_resolvable() {
        for profile in ALL_PROFILES {
            assert_eq!(RegisterProfile::by_name(profile.name), Some(*profile));
        }
        assert!(RegisterProfile::by_name("akd1000").is_none());
    }

    #[test]
    fn legacy_profile_has_no_dispatchers() {
        assert!(NIOS_LEGACY.dispatchers.is_none());
        assert!(NIOS_LEGACY.pe.is_some());
        assert_ne!(NIOS_LEGACY.npu.execute, HPS_MSGDMA.npu.execute);
    }
}
