//! Silicon model for the 8×8 systolic matrix-multiply NPU.
//!
//! This crate has **no dependencies** and **no hardware access**: it is a
//! pure model of what software can see of the accelerator. Register offsets,
//! bridge windows, the streaming-DMA descriptor format and the matrix wire
//! codec all live here so the driver can be tested without a board.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`bridge`] | Physical windows (LW bridge 2 MB registers, 16 MB DDR staging) |
//! | [`regs`] | Register profiles per bitstream revision |
//! | [`descriptor`] | Dispatcher CSR bits and the 4-word descriptor |
//! | [`matrix`] | 8×8 matrix type and the CPU reference product |
//! | [`codec`] | Input / weight / output wire format |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod codec;
pub mod descriptor;
pub mod matrix;
pub mod regs;

pub use matrix::{Matrix, OperandMatrix, OutputMatrix};
pub use regs::{RegisterProfile, ALL_PROFILES, DEFAULT_PROFILE};
