//! Logical 8×8 matrices as the host sees them.
//!
//! The array is fixed at 8×8: operands are signed bytes, results are 32-bit
//! signed accumulations. Indexing is always `[row][col]`.

/// Edge length of every matrix the array accepts.
pub const DIM: usize = 8;

/// Rows streamed per matrix (one 64-bit input beat per row).
pub const ROWS_PER_MATRIX: usize = DIM;

/// Bytes per encoded input or weight matrix (8 rows × 64 bits).
pub const OPERAND_BYTES: usize = DIM * 8;

/// Bytes per encoded output matrix (8 rows × 256 bits).
pub const OUTPUT_BYTES: usize = DIM * 32;

/// Square matrix of `DIM × DIM` elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Matrix<T> {
    rows: [[T; DIM]; DIM],
}

/// Input or weight operand.
pub type OperandMatrix = Matrix<i8>;

/// Accumulator result.
pub type OutputMatrix = Matrix<i32>;

impl<T: Copy + Default> Default for Matrix<T> {
    fn default() -> Self {
        Self {
            rows: [[T::default(); DIM]; DIM],
        }
    }
}

impl<T: Copy> Matrix<T> {
    /// Wrap an explicit row array.
    pub const fn from_rows(rows: [[T; DIM]; DIM]) -> Self {
        Self { rows }
    }

    /// Build a matrix by evaluating `f(row, col)` for every element.
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> T) -> Self {
        Self {
            rows: std::array::from_fn(|r| std::array::from_fn(|c| f(r, c))),
        }
    }

    /// Element at `[row][col]`.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is not below [`DIM`].
    pub fn get(&self, row: usize, col: usize) -> T {
        self.rows[row][col]
    }

    /// Overwrite element `[row][col]`.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is not below [`DIM`].
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        self.rows[row][col] = value;
    }

    /// Borrow the raw rows.
    pub const fn rows(&self) -> &[[T; DIM]; DIM] {
        &self.rows
    }

    /// Swap rows and columns.
    #[must_use]
    pub fn transposed(&self) -> Self {
        Self::from_fn(|r, c| self.rows[c][r])
    }

    /// Apply `f` element-wise.
    pub fn map<U: Copy>(&self, mut f: impl FnMut(T) -> U) -> Matrix<U> {
        Matrix::from_fn(|r, c| f(self.rows[r][c]))
    }
}

impl Matrix<i8> {
    /// The 8×8 identity.
    pub fn identity() -> Self {
        Self::from_fn(|r, c| i8::from(r == c))
    }

    /// Asymmetric test pattern: element `[r][c]` of batch entry `b` is
    /// `((r*8 + c + b) mod 256) − 128`.
    ///
    /// No two elements of one matrix are equal, so a transposed or
    /// lane-swapped readback can never match by accident.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn asymmetric(batch_index: usize) -> Self {
        Self::from_fn(|r, c| (((r * DIM + c + batch_index) % 256) as i32 - 128) as i8)
    }

    /// CPU reference product `self × weights`, accumulated in `i32`.
    ///
    /// This is the oracle the accelerator is validated against.
    pub fn matmul(&self, weights: &Self) -> Matrix<i32> {
        Matrix::from_fn(|r, c| {
            (0..DIM)
                .map(|k| i32::from(self.rows[r][k]) * i32::from(weights.rows[k][c]))
                .sum()
        })
    }

    /// Sign-extend every element to 32 bits.
    pub fn widen(&self) -> Matrix<i32> {
        self.map(i32::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_product_is_sign_extension() {
        let m = Matrix::asymmetric(3);
        assert_eq!(m.matmul(&Matrix::identity()), m.widen());
    }

    #[test]
    fn asymmetric_pattern_has_no_symmetric_pairs() {
        let m = Matrix::asymmetric(0);
        assert_eq!(m.get(0, 0), -128);
        assert_eq!(m.get(7, 7), -65);
        for r in 0..DIM {
            for c in 0..DIM {
                if r != c {
                    assert_ne!(m.get(r, c), m.get(c, r));
                }
            }
        }
    }

    #[test]
    fn matmul_accumulates_without_saturation() {
        let a = Matrix::from_fn(|_, _| i8::MIN);
        let out = a.matmul(&a);
        // 8 × (-128 × -128) overflows i16 but not i32.
        assert_eq!(out.get(4, 5), 8 * 16_384);
    }

    #[test]
    fn from_rows_keeps_row_major_order() {
        let mut rows = [[0i8; DIM]; DIM];
        rows[0] = [1, 2, 3, 4, 5, 6, 7, 8];
        rows[7][0] = -1;
        let m = Matrix::from_rows(rows);
        assert_eq!(m.rows(), &rows);
        assert_eq!(m.get(0, 7), 8);
        assert_eq!(m.get(7, 0), -1);
        assert_eq!(m.matmul(&Matrix::identity()), m.widen());
    }

    #[test]
    fn transposed_swaps_indices() {
        let m = Matrix::asymmetric(1);
        assert_eq!(m.transposed().get(2, 6), m.get(6, 2));
    }
}
