// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Plain-text matrix exchange format.
//!
//! ```text
//! rows cols
//! re00 im00 re01 im01 ...
//! re10 im10 re11 im11 ...
//! ```
//!
//! Values are whitespace separated, one matrix row per line.

use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use num_complex::Complex32;
use thiserror::Error;
use tracing::debug;

use crate::layout::{dims, float_len, ComplexMatrix, LayoutError};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("failed to access matrix file '{path}'")]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
    #[error(transparent)]
    Stream(#[from] io::Error),
    #[error("missing 'rows cols' header")]
    MissingHeader,
    #[error("line {line}: malformed header '{content}'")]
    BadHeader { line: usize, content: String },
    #[error("line {line}: expected {expected} values, found {found}")]
    WrongValueCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: '{token}' is not a number")]
    BadValue { line: usize, token: String },
    #[error("expected {expected} matrix rows, found {found}")]
    MissingRows { expected: usize, found: usize },
    #[error("line {line}: unexpected data after the last matrix row")]
    TrailingData { line: usize },
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Parse a matrix from the exchange format.
pub fn read_matrix(reader: impl BufRead) -> Result<ComplexMatrix, ExchangeError> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(index, line)| line.map(|content| (index + 1, content)));

    let (header_line, header) = loop {
        match lines.next() {
            Some(line) => {
                let (number, content) = line?;
                if !content.trim().is_empty() {
                    break (number, content);
                }
            }
            None => return Err(ExchangeError::MissingHeader),
        }
    };
    let (rows, cols) = parse_header(header_line, &header)?;
    float_len(rows, cols)?;

    // Rows are pushed as they parse; the header alone never sizes an allocation.
    let mut matrix = Vec::new();
    while matrix.len() < rows {
        let Some(line) = lines.next() else {
            return Err(ExchangeError::MissingRows {
                expected: rows,
                found: matrix.len(),
            });
        };
        let (number, content) = line?;
        if cols > 0 && content.trim().is_empty() {
            continue;
        }
        matrix.push(parse_row(number, &content, cols)?);
    }

    for line in lines {
        let (number, content) = line?;
        if !content.trim().is_empty() {
            return Err(ExchangeError::TrailingData { line: number });
        }
    }

    Ok(matrix)
}

fn parse_header(line: usize, content: &str) -> Result<(usize, usize), ExchangeError> {
    let bad = || ExchangeError::BadHeader {
        line,
        content: content.trim().to_string(),
    };
    let mut tokens = content.split_whitespace();
    let rows = tokens.next().and_then(|t| t.parse().ok()).ok_or_else(bad)?;
    let cols = tokens.next().and_then(|t| t.parse().ok()).ok_or_else(bad)?;
    if tokens.next().is_some() {
        return Err(bad());
    }
    Ok((rows, cols))
}

fn parse_row(line: usize, content: &str, cols: usize) -> Result<Vec<Complex32>, ExchangeError> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let expected = cols * 2;
    if tokens.len() != expected {
        return Err(ExchangeError::WrongValueCount {
            line,
            expected,
            found: tokens.len(),
        });
    }
    let parse = |token: &str| {
        token.parse::<f32>().map_err(|_| ExchangeError::BadValue {
            line,
            token: token.to_string(),
        })
    };
    tokens
        .chunks_exact(2)
        .map(|pair| Ok(Complex32::new(parse(pair[0])?, parse(pair[1])?)))
        .collect()
}

/// Write a matrix in the exchange format.
pub fn write_matrix(
    mut writer: impl Write,
    matrix: &[Vec<Complex32>],
) -> Result<(), ExchangeError> {
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
        }
        .into());
    }

    writeln!(writer, "{rows} {cols}")?;
    for row in matrix {
        let mut first = true;
        for value in row {
            if !first {
                writer.write_all(b" ")?;
            }
            first = false;
            write!(writer, "{} {}", value.re, value.im)?;
        }
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a matrix file from disk.
pub fn load(path: impl AsRef<Path>) -> Result<ComplexMatrix, ExchangeError> {
    let path = path.as_ref();
    let file = fs::File::open(path).map_err(|source| ExchangeError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let matrix = read_matrix(BufReader::new(file))?;
    let (rows, cols) = dims(&matrix);
    debug!(path = %path.display(), rows, cols, "loaded matrix");
    Ok(matrix)
}

/// Write a matrix file to disk, replacing any existing file.
pub fn save(path: impl AsRef<Path>, matrix: &[Vec<Complex32>]) -> Result<(), ExchangeError> {
    let path = path.as_ref();
    let file = fs::File::create(path).map_err(|source| ExchangeError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    write_matrix(BufWriter::new(file), matrix)?;
    let (rows, cols) = dims(matrix);
    debug!(path = %path.display(), rows, cols, "saved matrix");
    Ok(())
}
