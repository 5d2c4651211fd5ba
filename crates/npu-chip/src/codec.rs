//! Wire format of matrices in the shared staging window.
//!
//! ```text
//! inputs   row-major      row r    -> bytes [r*8, r*8+8)   cols 0-3 | cols 4-7
//! weights  column-major   slot t   -> bytes [t*8, t*8+8)   col 7-t, rows 0-3 | rows 4-7
//! outputs  8 words/row    col c    -> word  r*8 + (c ^ 1), byte-reversed
//! ```
//!
//! Operand words are little-endian: element `k` of a half-row (or half-column)
//! sits in bits `[8k, 8k+8)`. Weights travel in reverse column order because
//! the array shifts them in from the far edge.
//!
//! The output path is 64 bits wide and lands two 32-bit lanes per beat in
//! swapped order, and each lane is byte-reversed relative to the host. Both
//! corrections are applied by [`decode_output`]; dropping either one yields a
//! transposed or byte-reversed matrix that still looks plausible for
//! symmetric data.

use crate::matrix::{Matrix, OperandMatrix, OutputMatrix, DIM, OPERAND_BYTES, OUTPUT_BYTES};

/// Pack four signed bytes into one little-endian lane word.
fn pack_lane(elements: [i8; 4]) -> u32 {
    elements
        .iter()
        .enumerate()
        .fold(0u32, |word, (k, &e)| word | (u32::from(e.to_ne_bytes()[0]) << (8 * k)))
}

/// Inverse of [`pack_lane`].
fn unpack_lane(word: u32) -> [i8; 4] {
    word.to_le_bytes().map(|b| i8::from_ne_bytes([b]))
}

fn put_word(dest: &mut [u8], byte_offset: usize, word: u32) {
    dest[byte_offset..byte_offset + 4].copy_from_slice(&word.to_le_bytes());
}

fn get_word(src: &[u8], byte_offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&src[byte_offset..byte_offset + 4]);
    u32::from_le_bytes(raw)
}

/// Encode an input matrix (row-major, two words per row).
pub fn encode_inputs(dest: &mut [u8; OPERAND_BYTES], matrix: &OperandMatrix) {
    for (r, row) in matrix.rows().iter().enumerate() {
        let low = pack_lane([row[0], row[1], row[2], row[3]]);
        let high = pack_lane([row[4], row[5], row[6], row[7]]);
        put_word(dest, r * 8, low);
        put_word(dest, r * 8 + 4, high);
    }
}

/// Encode a weight matrix (column-major, slot `t` carries column `7 - t`).
pub fn encode_weights(dest: &mut [u8; OPERAND_BYTES], matrix: &OperandMatrix) {
    for t in 0..DIM {
        let c = DIM - 1 - t;
        let column: [i8; DIM] = std::array::from_fn(|r| matrix.get(r, c));
        let low = pack_lane([column[0], column[1], column[2], column[3]]);
        let high = pack_lane([column[4], column[5], column[6], column[7]]);
        put_word(dest, t * 8, low);
        put_word(dest, t * 8 + 4, high);
    }
}

/// Decode one output matrix as written by the drain engine.
pub fn decode_output(src: &[u8; OUTPUT_BYTES]) -> OutputMatrix {
    Matrix::from_fn(|r, c| {
        let lane = c ^ 1;
        let raw = get_word(src, (r * DIM + lane) * 4);
        i32::from_ne_bytes(raw.swap_bytes().to_ne_bytes())
    })
}

/// Decode a run of consecutive output matrices.
///
/// Trailing bytes that do not fill a whole matrix are ignored.
pub fn decode_output_batch(src: &[u8]) -> Vec<OutputMatrix> {
    src.chunks_exact(OUTPUT_BYTES)
        .map(|chunk| {
            let mut block = [0u8; OUTPUT_BYTES];
            block.copy_from_slice(chunk);
            decode_output(&block)
        })
        .collect()
}

/// Inverse of [`encode_inputs`].
pub fn decode_inputs(src: &[u8; OPERAND_BYTES]) -> OperandMatrix {
    let mut matrix = OperandMatrix::default();
    for r in 0..DIM {
        let low = unpack_lane(get_word(src, r * 8));
        let high = unpack_lane(get_word(src, r * 8 + 4));
        for k in 0..4 {
            matrix.set(r, k, low[k]);
            matrix.set(r, k + 4, high[k]);
        }
    }
    matrix
}

/// Inverse of [`encode_weights`].
pub fn decode_weights(src: &[u8; OPERAND_BYTES]) -> OperandMatrix {
    let mut matrix = OperandMatrix::default();
    for t in 0..DIM {
        let c = DIM - 1 - t;
        let low = unpack_lane(get_word(src, t * 8));
        let high = unpack_lane(get_word(src, t * 8 + 4));
        for k in 0..4 {
            matrix.set(k, c, low[k]);
            matrix.set(k + 4, c, high[k]);
        }
    }
    matrix
}

/// Produce the drain engine's view of an output matrix (inverse of
/// [`decode_output`]).
pub fn encode_output(dest: &mut [u8; OUTPUT_BYTES], matrix: &OutputMatrix) {
    for r in 0..DIM {
        for c in 0..DIM {
            let lane = c ^ 1;
            let word = u32::from_ne_bytes(matrix.get(r, c).to_ne_bytes()).swap_bytes();
            put_word(dest, (r * DIM + lane) * 4, word);
        }
    }
}
