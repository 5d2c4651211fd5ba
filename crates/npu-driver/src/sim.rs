// SPDX-License-Identifier: AGPL-3.0-only

//! Software model of the NPU's register and DMA contract
//!
//! [`SimulatedNpu`] stands in for the control bridge and the shared RAM so
//! the sequencer, staging and validation code run unchanged without a board.
//! It models what software can observe:
//!
//! - dispatcher reset, busy status and descriptor commit on GO
//! - weight load into a shadow matrix, promoted to the array by the latch
//! - execute: each fed matrix times the active weights, written to the
//!   armed drain in wire format, cut off at the row-count register
//! - the legacy integrated DMA and single MAC element
//!
//! Every transfer completes the moment it is committed, so a busy bit is
//! only ever seen when a fault is injected with [`Faults`].
//!
//! Handles share one state through `Rc<RefCell<_>>` and are `!Send`.

use crate::error::{Engine, Result};
use crate::mmio::{check_bounds, RegisterBus, SharedMemory};
use npu_chip::codec;
use npu_chip::descriptor::{csr, slot};
use npu_chip::matrix::{OperandMatrix, OPERAND_BYTES, OUTPUT_BYTES, ROWS_PER_MATRIX};
use npu_chip::regs::{IntegratedDma, PeBlock, RegisterProfile};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Bytes one input row occupies on the feed stream.
const INPUT_ROW_BYTES: usize = OPERAND_BYTES / ROWS_PER_MATRIX;
/// Bytes one output row occupies on the drain stream.
const OUTPUT_ROW_BYTES: usize = OUTPUT_BYTES / ROWS_PER_MATRIX;

/// Failures the model can be told to exhibit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// This engine's busy bit (or the integrated done bits) never settles
    pub stuck_dma: Option<Engine>,
    /// The sequencer busy bit stays set
    pub stuck_busy: bool,
    /// This dispatcher never finishes a reset
    pub stuck_reset: Option<Engine>,
}

#[derive(Debug)]
struct SimState {
    profile: &'static RegisterProfile,
    registers: HashMap<usize, u32>,
    memory: Vec<u8>,
    bus_base: u32,

    command: u32,
    csr_control: [u32; 2],
    descriptors: [[u32; 4]; 2],
    drain: Option<(u32, u32)>,

    shadow_weights: OperandMatrix,
    active_weights: OperandMatrix,
    latch: u32,
    latch_pulses: usize,

    integrated_status: u32,
    pe_weight: i32,
    pe_result: i32,

    rows_streamed: usize,
    faults: Faults,
}

const fn engine_index(engine: Engine) -> usize {
    match engine {
        Engine::Read | Engine::Integrated => 0,
        Engine::Write => 1,
    }
}

impl SimState {
    fn new(profile: &'static RegisterProfile, memory_len: usize) -> Self {
        Self {
            profile,
            registers: HashMap::new(),
            memory: vec![0; memory_len],
            bus_base: profile.shared_bus_base,
            command: 0,
            csr_control: [0; 2],
            descriptors: [[0; 4]; 2],
            drain: None,
            shadow_weights: OperandMatrix::default(),
            active_weights: OperandMatrix::default(),
            latch: 0,
            latch_pulses: 0,
            integrated_status: 0,
            pe_weight: 0,
            pe_result: 0,
            rows_streamed: 0,
            faults: Faults::default(),
        }
    }

    fn npu_offset(&self, index: usize) -> usize {
        self.profile.npu.offset(index)
    }

    fn stored(&self, offset: usize) -> u32 {
        self.registers.get(&offset).copied().unwrap_or(0)
    }

    /// Which dispatcher sub-window `offset` falls in, if any.
    fn dispatcher_at(&self, offset: usize) -> Option<(Engine, DispatcherReg)> {
        let pair = self.profile.dispatchers?;
        [(Engine::Read, pair.read), (Engine::Write, pair.write)]
            .into_iter()
            .find_map(|(engine, block)| {
                if offset == block.csr + csr::STATUS {
                    Some((engine, DispatcherReg::Status))
                } else if offset == block.csr + csr::CONTROL {
                    Some((engine, DispatcherReg::Control))
                } else if (block.descriptor..block.descriptor + 16).contains(&offset) {
                    Some((engine, DispatcherReg::Descriptor(offset - block.descriptor)))
                } else {
                    None
                }
            })
    }

    // ── Register file ────────────────────────────────────────────────────────

    fn read(&self, offset: usize) -> u32 {
        let value = self.read_inner(offset);
        trace!("sim read {offset:#x} = {value:#x}");
        value
    }

    fn read_inner(&self, offset: usize) -> u32 {
        let npu = &self.profile.npu;
        if let Some((engine, reg)) = self.dispatcher_at(offset) {
            return match reg {
                DispatcherReg::Status => {
                    if self.faults.stuck_dma == Some(engine) {
                        csr::status::BUSY
                    } else {
                        0
                    }
                }
                DispatcherReg::Control => self.csr_control[engine_index(engine)],
                DispatcherReg::Descriptor(word) => self.descriptors[engine_index(engine)][word / 4],
            };
        }
        if offset == self.npu_offset(npu.control) {
            return self.command;
        }
        if offset == self.npu_offset(npu.status) {
            let busy = if self.faults.stuck_busy { npu.busy_mask } else { 0 };
            return busy | self.integrated_status;
        }
        if let Some(pe) = self.profile.pe {
            if offset == self.npu_offset(pe.y_out) {
                return u32::from_ne_bytes(self.pe_result.to_ne_bytes());
            }
        }
        self.stored(offset)
    }

    fn write(&mut self, offset: usize, value: u32) {
        trace!("sim write {offset:#x} = {value:#x}");
        let npu = self.profile.npu;

        if let Some((engine, reg)) = self.dispatcher_at(offset) {
            match reg {
                DispatcherReg::Status => {}
                DispatcherReg::Control => self.dispatcher_control(engine, value),
                DispatcherReg::Descriptor(word) => {
                    self.descriptors[engine_index(engine)][word / 4] = value;
                    if word == slot::CONTROL {
                        self.commit(engine);
                    }
                }
            }
            return;
        }

        if offset == self.npu_offset(npu.control) {
            self.command = value;
            return;
        }
        if let Some(latch) = npu.weight_latch {
            if offset == self.npu_offset(latch) {
                if value != 0 && self.latch == 0 {
                    self.active_weights = self.shadow_weights;
                    self.latch_pulses += 1;
                    debug!("sim: weights latched");
                }
                self.latch = value;
                return;
            }
        }
        if let Some(dma) = self.profile.integrated_dma {
            if offset == self.npu_offset(dma.write_control) {
                self.registers.insert(offset, value);
                self.run_integrated(&dma, value);
                return;
            }
        }
        if let Some(pe) = self.profile.pe {
            if offset == self.npu_offset(pe.control) {
                self.pe_strobe(&pe, value);
                return;
            }
        }
        self.registers.insert(offset, value);
    }

    // ── Dispatchers ──────────────────────────────────────────────────────────

    fn dispatcher_control(&mut self, engine: Engine, value: u32) {
        let i = engine_index(engine);
        if value & csr::control::RESET_DISPATCHER != 0 {
            self.descriptors[i] = [0; 4];
            if engine == Engine::Write {
                self.drain = None;
            }
            if self.faults.stuck_reset == Some(engine) {
                self.csr_control[i] = value;
                return;
            }
            debug!("sim: {engine} dispatcher reset");
        }
        self.csr_control[i] = value & !csr::control::RESET_DISPATCHER;
    }

    fn commit(&mut self, engine: Engine) {
        let [read_address, write_address, length, control] = self.descriptors[engine_index(engine)];
        let Some(pair) = self.profile.dispatchers else {
            return;
        };
        if control & pair.flags.go == 0 {
            return;
        }
        match engine {
            Engine::Write => {
                debug!("sim: drain armed {write_address:#010x} len={length}");
                self.drain = Some((write_address, length));
            }
            Engine::Read | Engine::Integrated => self.feed(read_address, length as usize),
        }
    }

    fn feed(&mut self, source: u32, len: usize) {
        let npu = self.profile.npu;
        if self.command == npu.load_weights {
            self.load_weights(source, len);
        } else if self.command == npu.execute {
            let Some((sink, drain_len)) = self.drain.take() else {
                warn!("sim: feed with no drain armed, output dropped");
                return;
            };
            let rows = match npu.row_count {
                Some(word) => self.stored(self.npu_offset(word)) as usize,
                None => usize::MAX,
            };
            self.stream(source, len, sink, drain_len as usize, rows);
        } else {
            warn!("sim: feed while sequencer idle ({:#x}), ignored", self.command);
        }
    }

    fn load_weights(&mut self, source: u32, len: usize) {
        let Some(offset) = self.translate(source, len) else {
            return;
        };
        for chunk in self.memory[offset..offset + len].chunks_exact(OPERAND_BYTES) {
            let mut wire = [0u8; OPERAND_BYTES];
            wire.copy_from_slice(chunk);
            self.shadow_weights = codec::decode_weights(&wire);
        }
        if self.profile.npu.weight_latch.is_none() {
            self.active_weights = self.shadow_weights;
        }
        debug!("sim: {} weight bytes loaded to shadow", len);
    }

    /// Multiply streamed input rows by the active weights.
    ///
    /// Processes `rows` rows at most, bounded by the input length and the
    /// output length. Returns the rows produced.
    fn stream(&mut self, source: u32, in_len: usize, sink: u32, out_len: usize, rows: usize) -> usize {
        let rows = rows
            .min(in_len / INPUT_ROW_BYTES)
            .min(out_len / OUTPUT_ROW_BYTES);
        if rows == 0 {
            return 0;
        }
        let (Some(src), Some(dst)) = (
            self.translate(source, in_len),
            self.translate(sink, rows * OUTPUT_ROW_BYTES),
        ) else {
            return 0;
        };

        for m in 0..rows.div_ceil(ROWS_PER_MATRIX) {
            let start = src + m * OPERAND_BYTES;
            let take = OPERAND_BYTES.min(src + in_len - start);
            let mut wire = [0u8; OPERAND_BYTES];
            wire[..take].copy_from_slice(&self.memory[start..start + take]);

            let product = codec::decode_inputs(&wire).matmul(&self.active_weights);
            let mut out = [0u8; OUTPUT_BYTES];
            codec::encode_output(&mut out, &product);

            let produced = ROWS_PER_MATRIX.min(rows - m * ROWS_PER_MATRIX) * OUTPUT_ROW_BYTES;
            let at = dst + m * OUTPUT_BYTES;
            self.memory[at..at + produced].copy_from_slice(&out[..produced]);
        }

        self.rows_streamed += rows;
        debug!("sim: streamed {rows} rows {source:#010x} -> {sink:#010x}");
        rows
    }

    fn translate(&self, bus: u32, len: usize) -> Option<usize> {
        let offset = bus.checked_sub(self.bus_base)? as usize;
        if check_bounds(offset, len, self.memory.len()).is_ok() {
            Some(offset)
        } else {
            warn!("sim: DMA {bus:#010x}+{len} outside shared memory, dropped");
            None
        }
    }

    // ── Legacy blocks ────────────────────────────────────────────────────────

    fn run_integrated(&mut self, dma: &IntegratedDma, value: u32) {
        self.integrated_status &= !IntegratedDma::DONE_MASK;
        let start = IntegratedDma::START_READ | IntegratedDma::START_WRITE;
        if value & start != start {
            return;
        }
        if self.command == self.profile.npu.execute {
            let source = self.stored(self.npu_offset(dma.read_address));
            let read_words = self.stored(self.npu_offset(dma.read_length)) as usize;
            let sink = self.stored(self.npu_offset(dma.write_address));
            let write_words = (value & IntegratedDma::LENGTH_MASK) as usize;
            let rows = match self.profile.npu.row_count {
                Some(word) => self.stored(self.npu_offset(word)) as usize,
                None => usize::MAX,
            };
            self.stream(source, read_words * 4, sink, write_words * 4, rows);
        }
        if self.faults.stuck_dma != Some(Engine::Integrated) {
            self.integrated_status |= IntegratedDma::DONE_MASK;
        }
    }

    fn pe_strobe(&mut self, pe: &PeBlock, value: u32) {
        let as_i32 = |v: u32| i32::from_ne_bytes(v.to_ne_bytes());
        let x = as_i32(self.stored(self.npu_offset(pe.x_in)));
        match value {
            PeBlock::LOAD_WEIGHT => self.pe_weight = x,
            PeBlock::VALID => {
                let y = as_i32(self.stored(self.npu_offset(pe.y_in)));
                self.pe_result = y.wrapping_add(x.wrapping_mul(self.pe_weight));
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DispatcherReg {
    Status,
    Control,
    Descriptor(usize),
}

// ── Handles ──────────────────────────────────────────────────────────────────

/// Behavioural model of one NPU board.
#[derive(Debug, Clone)]
pub struct SimulatedNpu {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedNpu {
    /// Model of `profile` with the profile's full shared window.
    pub fn new(profile: &'static RegisterProfile) -> Self {
        Self::with_memory(profile, profile.shared_window.span)
    }

    /// Model of `profile` with `memory_len` bytes of shared memory.
    pub fn with_memory(profile: &'static RegisterProfile, memory_len: usize) -> Self {
        debug!("Simulated NPU ({}, {memory_len} bytes shared)", profile.name);
        Self {
            state: Rc::new(RefCell::new(SimState::new(profile, memory_len))),
        }
    }

    /// Control-window view.
    pub fn registers(&self) -> SimRegisters {
        SimRegisters {
            state: Rc::clone(&self.state),
        }
    }

    /// Shared-memory view.
    pub fn memory(&self) -> SimMemory {
        SimMemory {
            state: Rc::clone(&self.state),
        }
    }

    /// Replace the injected faults.
    pub fn set_faults(&self, faults: Faults) {
        self.state.borrow_mut().faults = faults;
    }

    /// Weights the array is multiplying by.
    pub fn active_weights(&self) -> OperandMatrix {
        self.state.borrow().active_weights
    }

    /// Rising edges seen on the weight latch.
    pub fn latch_pulses(&self) -> usize {
        self.state.borrow().latch_pulses
    }

    /// Output rows produced so far.
    pub fn rows_streamed(&self) -> usize {
        self.state.borrow().rows_streamed
    }

    /// Last control value written.
    pub fn command(&self) -> u32 {
        self.state.borrow().command
    }
}

/// Register bus into a [`SimulatedNpu`].
#[derive(Debug, Clone)]
pub struct SimRegisters {
    state: Rc<RefCell<SimState>>,
}

impl RegisterBus for SimRegisters {
    fn read32(&self, offset: usize) -> u32 {
        self.state.borrow().read(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.state.borrow_mut().write(offset, value);
    }
}

/// Shared memory of a [`SimulatedNpu`].
#[derive(Debug, Clone)]
pub struct SimMemory {
    state: Rc<RefCell<SimState>>,
}

impl SharedMemory for SimMemory {
    fn size(&self) -> usize {
        self.state.borrow().memory.len()
    }

    fn read_bytes(&self, offset: usize, buffer: &mut [u8]) -> Result<()> {
        let state = self.state.borrow();
        check_bounds(offset, buffer.len(), state.memory.len())?;
        buffer.copy_from_slice(&state.memory[offset..offset + buffer.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        check_bounds(offset, data.len(), state.memory.len())?;
        state.memory[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use npu_chip::regs::{HPS_MSGDMA, NIOS_LEGACY};

    #[test]
    fn reset_bit_self_clears_unless_stuck() {
        let sim = SimulatedNpu::with_memory(&HPS_MSGDMA, 0x1000);
        let regs = sim.registers();
        regs.write32(0x3_1004, csr::control::RESET_DISPATCHER);
        assert_eq!(regs.read32(0x3_1004), 0);

        sim.set_faults(Faults {
            stuck_reset: Some(Engine::Read),
            ..Faults::default()
        });
        regs.write32(0x3_1004, csr::control::RESET_DISPATCHER);
        assert_eq!(regs.read32(0x3_1004), csr::control::RESET_DISPATCHER);
    }

    #[test]
    fn latch_needs_rising_edge() {
        let sim = SimulatedNpu::with_memory(&HPS_MSGDMA, 0x1000);
        let regs = sim.registers();
        regs.write32(0x3_001C, 1);
        regs.write32(0x3_001C, 1);
        regs.write32(0x3_001C, 0);
        regs.write32(0x3_001C, 1);
        assert_eq!(sim.latch_pulses(), 2);
    }

    #[test]
    fn pe_multiply_accumulate() {
        let sim = SimulatedNpu::with_memory(&NIOS_LEGACY, 0x1000);
        let regs = sim.registers();
        regs.write32(0x3_0024, 7);
        regs.write32(0x3_0020, PeBlock::LOAD_WEIGHT);
        regs.write32(0x3_0024, 3);
        regs.write32(0x3_0028, 10);
        regs.write32(0x3_0020, PeBlock::VALID);
        assert_eq!(regs.read32(0x3_002C), 31);
    }

    #[test]
    fn memory_bounds() {
        let sim = SimulatedNpu::with_memory(&HPS_MSGDMA, 0x100);
        let mut mem = sim.memory();
        assert!(mem.write_bytes(0xF0, &[0; 16]).is_ok());
        assert!(mem.write_bytes(0xF1, &[0; 16]).is_err());
        assert_eq!(mem.size(), 0x100);
    }
}
