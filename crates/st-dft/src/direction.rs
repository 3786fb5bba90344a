// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Transform direction and the normalization convention shared by every
//! backend.
//!
//! Forward transforms use the kernel `exp(-2πi·jk/N)` and are unscaled.
//! Inverse transforms use `exp(+2πi·jk/N)` and every 1D pass divides by its
//! own length, so a full inverse is scaled by `1 / (rows * cols)`. Forward
//! followed by inverse therefore reproduces the input.

use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    Forward,
    Inverse,
}

impl Direction {
    /// Value uploaded in the direction uniform (`0` forward, `1` inverse).
    pub fn as_flag(self) -> u32 {
        match self {
            Direction::Forward => 0,
            Direction::Inverse => 1,
        }
    }

    /// Sign of the exponent in the transform kernel.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => -1.0,
            Direction::Inverse => 1.0,
        }
    }

    /// Scale applied by a single 1D pass of length `len`.
    pub fn pass_scale(self, len: usize) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Inverse if len == 0 => 1.0,
            Direction::Inverse => 1.0 / len as f64,
        }
    }

    pub fn is_inverse(self) -> bool {
        matches!(self, Direction::Inverse)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Inverse => f.write_str("inverse"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "fwd" => Ok(Direction::Forward),
            "inverse" | "inv" => Ok(Direction::Inverse),
            other => Err(format!("unknown transform direction '{other}'")),
        }
    }
}
