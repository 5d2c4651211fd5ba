//! Register bus stand-in for unit tests

use crate::mmio::RegisterBus;
use std::cell::RefCell;
use std::collections::HashMap;

/// One bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read(usize),
    Write(usize, u32),
}

/// Logs every access. Reads return preset values (zero by default), writes
/// never change what is read back, so self-clearing bits clear at once.
#[derive(Debug, Default)]
pub struct RecordingBus {
    presets: RefCell<HashMap<usize, u32>>,
    log: RefCell<Vec<Access>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make reads of `offset` return `value`.
    pub fn preset(&self, offset: usize, value: u32) {
        self.presets.borrow_mut().insert(offset, value);
    }

    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|a| match *a {
                Access::Write(off, v) => Some((off, v)),
                Access::Read(_) => None,
            })
            .collect()
    }

    pub fn reads_of(&self, offset: usize) -> usize {
        self.log
            .borrow()
            .iter()
            .filter(|a| **a == Access::Read(offset))
            .count()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}

impl RegisterBus for RecordingBus {
    fn read32(&self, offset: usize) -> u32 {
        self.log.borrow_mut().push(Access::Read(offset));
        self.presets.borrow().get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.log.borrow_mut().push(Access::Write(offset, value));
    }
}
