// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Conversion between nested complex matrices and the flat buffer layout the
//! kernels consume: row-major, each element stored as `(re, im)` in two
//! adjacent `f32` values.

use num_complex::Complex32;
use thiserror::Error;

/// Rows of complex values. Every row must have the same length.
pub type ComplexMatrix = Vec<Vec<Complex32>>;

/// Floats per complex element.
pub const FLOATS_PER_ELEMENT: usize = 2;
/// Bytes per complex element in the device layout.
pub const BYTES_PER_ELEMENT: usize = FLOATS_PER_ELEMENT * std::mem::size_of::<f32>();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("row {row} has {found} columns but row 0 has {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("buffer holds {found} floats but a {rows}x{cols} matrix needs {expected}")]
    LengthMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        found: usize,
    },
    #[error("a {rows}x{cols} matrix overflows the addressable buffer size")]
    Overflow { rows: usize, cols: usize },
}

/// Number of floats needed for a `rows x cols` complex matrix.
pub fn float_len(rows: usize, cols: usize) -> Result<usize, LayoutError> {
    rows.checked_mul(cols)
        .and_then(|v| v.checked_mul(FLOATS_PER_ELEMENT))
        .ok_or(LayoutError::Overflow { rows, cols })
}

/// Row-major interleaved complex buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct FlatComplexBuffer {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl FlatComplexBuffer {
    /// All-zero buffer for a `rows x cols` matrix.
    pub fn zeroed(rows: usize, cols: usize) -> Result<Self, LayoutError> {
        let len = float_len(rows, cols)?;
        Ok(Self {
            rows,
            cols,
            data: vec![0.0; len],
        })
    }

    /// Wrap already interleaved data, checking its length.
    pub fn from_interleaved(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, LayoutError> {
        let expected = float_len(rows, cols)?;
        if data.len() != expected {
            return Err(LayoutError::LengthMismatch {
                rows,
                cols,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Caller guarantees `data.len() == 2 * rows * cols`.
    pub(crate) fn from_parts(rows: usize, cols: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), rows * cols * FLOATS_PER_ELEMENT);
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of complex elements.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the buffer in the device layout: `2 * rows * cols * 4`.
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Element at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<Complex32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let index = (row * self.cols + col) * FLOATS_PER_ELEMENT;
        Some(Complex32::new(self.data[index], self.data[index + 1]))
    }

    /// Rebuild the nested matrix form.
    pub fn to_matrix(&self) -> ComplexMatrix {
        to_rows(&self.data, self.rows, self.cols)
    }
}

/// `(rows, cols)` of a nested matrix; `cols` is taken from the first row.
pub fn dims(matrix: &[Vec<Complex32>]) -> (usize, usize) {
    let rows = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);
    (rows, cols)
}

/// Flatten a rectangular matrix into the row-major interleaved layout.
///
/// Ragged input is rejected rather than padded.
pub fn flatten(matrix: &[Vec<Complex32>]) -> Result<FlatComplexBuffer, LayoutError> {
    let (rows, cols) = dims(matrix);
    if let Some((row, found)) = matrix
        .iter()
        .enumerate()
        .find(|(_, r)| r.len() != cols)
        .map(|(i, r)| (i, r.len()))
    {
        return Err(LayoutError::Ragged {
            row,
            expected: cols,
            found,
        });
    }

    let mut data = Vec::with_capacity(float_len(rows, cols)?);
    for value in matrix.iter().flatten() {
        data.push(value.re);
        data.push(value.im);
    }
    Ok(FlatComplexBuffer { rows, cols, data })
}

/// Inverse of [`flatten`]: read two floats per cell in row-major order.
pub fn reshape(buffer: &[f32], rows: usize, cols: usize) -> Result<ComplexMatrix, LayoutError> {
    let expected = float_len(rows, cols)?;
    if buffer.len() != expected {
        return Err(LayoutError::LengthMismatch {
            rows,
            cols,
            expected,
            found: buffer.len(),
        });
    }
    Ok(to_rows(buffer, rows, cols))
}

fn to_rows(buffer: &[f32], rows: usize, cols: usize) -> ComplexMatrix {
    if cols == 0 {
        return vec![Vec::new(); rows];
    }
    buffer
        .chunks_exact(cols * FLOATS_PER_ELEMENT)
        .map(|row| {
            row.chunks_exact(FLOATS_PER_ELEMENT)
                .map(|pair| Complex32::new(pair[0], pair[1]))
                .collect()
        })
        .collect()
}
