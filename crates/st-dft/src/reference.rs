// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Direct O(N²)-per-axis 2D DFT on the host.
//!
//! Mirrors the device pipeline exactly: a row pass into an intermediate
//! buffer, then a column pass, each applying [`Direction::pass_scale`].
//! Accumulation happens in `f64`, which makes this the oracle for the GPU
//! tests as well as the CPU backend.

use std::f64::consts::TAU;

use crate::direction::Direction;
use crate::layout::{FlatComplexBuffer, FLOATS_PER_ELEMENT};

/// Transform every row into a fresh buffer.
pub fn row_pass(input: &FlatComplexBuffer, direction: Direction) -> FlatComplexBuffer {
    let (rows, cols) = (input.rows(), input.cols());
    let src = input.as_slice();
    let mut out = vec![0.0f32; src.len()];
    let scale = direction.pass_scale(cols);
    let twiddles = twiddles(cols, direction);
    for r in 0..rows {
        for c in 0..cols {
            let mut re = 0.0f64;
            let mut im = 0.0f64;
            for k in 0..cols {
                let (cos, sin) = twiddles[(k * c) % cols];
                let at = (r * cols + k) * FLOATS_PER_ELEMENT;
                let (x, y) = (src[at] as f64, src[at + 1] as f64);
                re += x * cos - y * sin;
                im += x * sin + y * cos;
            }
            let at = (r * cols + c) * FLOATS_PER_ELEMENT;
            out[at] = (re * scale) as f32;
            out[at + 1] = (im * scale) as f32;
        }
    }
    FlatComplexBuffer::from_parts(rows, cols, out)
}

/// Transform every column of the buffer.
pub fn column_pass(input: &FlatComplexBuffer, direction: Direction) -> FlatComplexBuffer {
    let (rows, cols) = (input.rows(), input.cols());
    let src = input.as_slice();
    let mut out = vec![0.0f32; src.len()];
    let scale = direction.pass_scale(rows);
    let twiddles = twiddles(rows, direction);
    for c in 0..cols {
        for r in 0..rows {
            let mut re = 0.0f64;
            let mut im = 0.0f64;
            for k in 0..rows {
                let (cos, sin) = twiddles[(k * r) % rows];
                let at = (k * cols + c) * FLOATS_PER_ELEMENT;
                let (x, y) = (src[at] as f64, src[at + 1] as f64);
                re += x * cos - y * sin;
                im += x * sin + y * cos;
            }
            let at = (r * cols + c) * FLOATS_PER_ELEMENT;
            out[at] = (re * scale) as f32;
            out[at + 1] = (im * scale) as f32;
        }
    }
    FlatComplexBuffer::from_parts(rows, cols, out)
}

/// Full 2D transform: row pass followed by column pass.
pub fn dft2d(input: &FlatComplexBuffer, direction: Direction) -> FlatComplexBuffer {
    let intermediate = row_pass(input, direction);
    column_pass(&intermediate, direction)
}

fn twiddles(len: usize, direction: Direction) -> Vec<(f64, f64)> {
    let sign = direction.sign();
    (0..len)
        .map(|j| {
            let angle = sign * TAU * j as f64 / len as f64;
            (angle.cos(), angle.sin())
        })
        .collect()
}
