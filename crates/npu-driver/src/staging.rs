//! Matrix staging in the shared window
//!
//! A [`RegionPlan`] carves the shared window into weight, input and output
//! regions, checks them once, and hands out both views the driver needs:
//! the byte offset the host writes through and the bus address the DMA
//! engines are given. [`SharedBuffer`] moves wire-format matrices in and out
//! of those regions.

use crate::error::{NpuError, Result};
use crate::mmio::SharedMemory;
use bytes::{Bytes, BytesMut};
use npu_chip::codec;
use npu_chip::matrix::{OperandMatrix, OutputMatrix, OPERAND_BYTES, OUTPUT_BYTES};
use npu_chip::RegisterProfile;

/// A named byte range of the shared window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Region name, for diagnostics
    pub name: &'static str,
    /// Offset from the start of the window
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
    /// Address the DMA engines use for `offset`
    pub bus: u32,
}

impl Region {
    /// First byte past the region.
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    const fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Where each region starts inside the shared window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    /// Weight matrices
    pub weights: usize,
    /// Input batch
    pub inputs: usize,
    /// Output batch
    pub outputs: usize,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            weights: 0x0000,
            inputs: 0x1000,
            outputs: 0x4000,
        }
    }
}

/// Validated weight / input / output regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPlan {
    weights: Region,
    inputs: Region,
    outputs: Region,
}

impl RegionPlan {
    /// Lay out `weight_count` weight matrices and a batch of `batch` inputs
    /// and outputs inside `profile`'s shared window.
    ///
    /// # Errors
    ///
    /// Returns error if a count is zero, a region leaves the window or its
    /// bus address range, or two regions overlap.
    pub fn new(
        profile: &RegisterProfile,
        layout: RegionLayout,
        weight_count: usize,
        batch: usize,
    ) -> Result<Self> {
        Self::within(
            profile.shared_window.span,
            profile.shared_bus_base,
            layout,
            weight_count,
            batch,
        )
    }

    /// Same as [`Self::new`] for an explicit window size and bus base.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn within(
        window_len: usize,
        bus_base: u32,
        layout: RegionLayout,
        weight_count: usize,
        batch: usize,
    ) -> Result<Self> {
        if weight_count == 0 || batch == 0 {
            return Err(NpuError::invalid_argument("regions need at least one matrix"));
        }
        let region = |name: &'static str, offset: usize, count: usize, per: usize| -> Result<Region> {
            let len = count
                .checked_mul(per)
                .ok_or_else(|| NpuError::invalid_argument(format!("{name} region overflows")))?;
            crate::mmio::check_bounds(offset, len, window_len)?;
            let bus = u32::try_from(offset)
                .ok()
                .and_then(|o| bus_base.checked_add(o))
                .filter(|b| u32::try_from(len).is_ok_and(|l| b.checked_add(l).is_some()))
                .ok_or_else(|| {
                    NpuError::invalid_argument(format!("{name} region beyond 32-bit bus"))
                })?;
            Ok(Region {
                name,
                offset,
                len,
                bus,
            })
        };

        let plan = Self {
            weights: region("weights", layout.weights, weight_count, OPERAND_BYTES)?,
            inputs: region("inputs", layout.inputs, batch, OPERAND_BYTES)?,
            outputs: region("outputs", layout.outputs, batch, OUTPUT_BYTES)?,
        };

        let all = [plan.weights, plan.inputs, plan.outputs];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if a.overlaps(b) {
                    return Err(NpuError::RegionOverlap {
                        first: a.name,
                        second: b.name,
                    });
                }
            }
        }
        Ok(plan)
    }

    /// Weight region.
    pub const fn weights(&self) -> Region {
        self.weights
    }

    /// Input region.
    pub const fn inputs(&self) -> Region {
        self.inputs
    }

    /// Output region.
    pub const fn outputs(&self) -> Region {
        self.outputs
    }
}

/// Wire image of a run of input matrices.
pub fn encode_input_batch(matrices: &[OperandMatrix]) -> Bytes {
    encode_with(matrices, codec::encode_inputs)
}

/// Wire image of a run of weight matrices.
pub fn encode_weight_batch(matrices: &[OperandMatrix]) -> Bytes {
    encode_with(matrices, codec::encode_weights)
}

fn encode_with(
    matrices: &[OperandMatrix],
    encode: fn(&mut [u8; OPERAND_BYTES], &OperandMatrix),
) -> Bytes {
    let mut buf = BytesMut::with_capacity(matrices.len() * OPERAND_BYTES);
    let mut wire = [0u8; OPERAND_BYTES];
    for m in matrices {
        encode(&mut wire, m);
        buf.extend_from_slice(&wire);
    }
    buf.freeze()
}

/// Shared window with typed matrix access.
#[derive(Debug)]
pub struct SharedBuffer<M> {
    memory: M,
}

impl<M: SharedMemory> SharedBuffer<M> {
    /// Wrap a shared window.
    pub const fn new(memory: M) -> Self {
        Self { memory }
    }

    /// Underlying window.
    pub const fn memory(&self) -> &M {
        &self.memory
    }

    /// Underlying window, mutably.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    fn place(&mut self, region: &Region, wire: &[u8]) -> Result<()> {
        if wire.len() > region.len {
            return Err(NpuError::invalid_argument(format!(
                "{} bytes do not fit the {} region ({} bytes)",
                wire.len(),
                region.name,
                region.len
            )));
        }
        self.memory.write_bytes(region.offset, wire)
    }

    /// Encode `weights` into `region`.
    ///
    /// # Errors
    ///
    /// Returns error if the matrices do not fit the region or window.
    pub fn write_weights(&mut self, region: &Region, weights: &[OperandMatrix]) -> Result<()> {
        self.place(region, &encode_weight_batch(weights))
    }

    /// Encode `inputs` into `region`.
    ///
    /// # Errors
    ///
    /// Returns error if the matrices do not fit the region or window.
    pub fn write_inputs(&mut self, region: &Region, inputs: &[OperandMatrix]) -> Result<()> {
        self.place(region, &encode_input_batch(inputs))
    }

    /// Zero the whole region.
    ///
    /// # Errors
    ///
    /// Returns error if the region leaves the window.
    pub fn clear(&mut self, region: &Region) -> Result<()> {
        self.memory.zero(region.offset, region.len)
    }

    /// Decode `count` output matrices from `region`.
    ///
    /// Only meaningful after the execution that filled it has been waited on.
    ///
    /// # Errors
    ///
    /// Returns error if `count` matrices exceed the region.
    pub fn read_outputs(&self, region: &Region, count: usize) -> Result<Vec<OutputMatrix>> {
        let len = count
            .checked_mul(OUTPUT_BYTES)
            .filter(|&len| len <= region.len)
            .ok_or_else(|| {
                NpuError::invalid_argument(format!(
                    "{count} outputs exceed the {} region",
                    region.name
                ))
            })?;
        let mut buf = BytesMut::zeroed(len);
        self.memory.read_bytes(region.offset, &mut buf)?;
        Ok(codec::decode_output_batch(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npu_chip::regs::HPS_MSGDMA;
    use npu_chip::Matrix;

    #[test]
    fn default_layout_for_full_batch() {
        let plan = RegionPlan::new(&HPS_MSGDMA, RegionLayout::default(), 1, 100).unwrap();
        assert_eq!(plan.weights().bus, 0x2000_0000);
        assert_eq!(plan.inputs().bus, 0x2000_1000);
        assert_eq!(plan.inputs().len, 6400);
        assert_eq!(plan.outputs().bus, 0x2000_4000);
        assert_eq!(plan.outputs().len, 25_600);
    }

    #[test]
    fn overlap_detected() {
        // 200 inputs run past 0x4000 into the output region
        let err = RegionPlan::new(&HPS_MSGDMA, RegionLayout::default(), 1, 200).unwrap_err();
        assert!(matches!(
            err,
            NpuError::RegionOverlap {
                first: "inputs",
                second: "outputs"
            }
        ));
    }

    #[test]
    fn window_bounds_checked() {
        let layout = RegionLayout {
            weights: 0,
            inputs: 0x100,
            outputs: 0x200,
        };
        assert!(RegionPlan::within(0x300, 0, layout, 1, 1).is_ok());
        assert!(matches!(
            RegionPlan::within(0x2FF, 0, layout, 1, 1),
            Err(NpuError::OutOfBounds { .. })
        ));
        assert!(RegionPlan::within(0x300, u32::MAX - 0x100, layout, 1, 1).is_err());
        assert!(RegionPlan::within(0x300, 0, layout, 0, 1).is_err());
    }

    #[test]
    fn batch_encoding_is_concatenated() {
        let a = Matrix::asymmetric(0);
        let b = Matrix::asymmetric(1);
        let wire = encode_input_batch(&[a, b]);
        assert_eq!(wire.len(), 2 * OPERAND_BYTES);
        let mut second = [0u8; OPERAND_BYTES];
        second.copy_from_slice(&wire[OPERAND_BYTES..]);
        assert_eq!(codec::decode_inputs(&second), b);
    }
}
