//! Host-side bridge windows on the Cyclone V SoC board.
//!
//! ```text
//! Window                 Physical base   Span     Purpose
//! ────────────────────── ─────────────── ──────── ───────────────────────────────
//! LW HPS-to-FPGA bridge  0xFF20_0000     2 MB     NPU CSRs + dispatcher CSRs
//! HPS DDR staging        0x2000_0000     16 MB    Operand / result matrices
//! ```
//!
//! The staging window is plain HPS DDR that the FPGA reaches over the
//! FPGA-to-SDRAM port, so the dispatchers see it at the same address the
//! host maps it from. Soft-core builds reach the same DDR through an address
//! span extender instead; the bus address the dispatchers use is unchanged.

/// A physical address range mapped into the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Physical base address.
    pub base: u64,
    /// Size in bytes.
    pub span: usize,
}

impl Window {
    /// Whether `[offset, offset + len)` lies inside the window.
    pub const fn contains(&self, offset: usize, len: usize) -> bool {
        match offset.checked_add(len) {
            Some(end) => end <= self.span,
            None => false,
        }
    }
}

/// Lightweight HPS-to-FPGA bridge (register space).
pub const LW_HPS2FPGA: Window = Window {
    base: 0xFF20_0000,
    span: 0x0020_0000,
};

/// HPS DDR window used for matrix staging.
pub const HPS_FPGA_RAM: Window = Window {
    base: 0x2000_0000,
    span: 0x0100_0000, // 16 MB
};

/// Address of [`HPS_FPGA_RAM`] as the dispatchers see it.
pub const HPS_FPGA_RAM_BUS: u32 = 0x2000_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_rejects_overflow_and_overrun() {
        assert!(HPS_FPGA_RAM.contains(0, HPS_FPGA_RAM.span));
        assert!(!HPS_FPGA_RAM.contains(1, HPS_FPGA_RAM.span));
        assert!(!HPS_FPGA_RAM.contains(usize::MAX, 2));
    }
}
