//! Roulette outcome validation and table classification.
//!
//! A single-zero wheel: outcomes are `0..=36`.  Zero is green and belongs to
//! none of the even-money, dozen or row groups.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// Highest outcome on a single-zero wheel.
pub const MAX_OUTCOME: u8 = 36;

/// Red pockets on a roulette wheel.
pub const RED_NUMBERS: [u8; 18] = [1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36];

/// The three rows of the table layout (top, middle, bottom).
pub const ROWS: [[u8; 12]; 3] = [
    [1, 4, 7, 10, 13, 16, 19, 22, 25, 28, 31, 34],
    [2, 5, 8, 11, 14, 17, 20, 23, 26, 29, 32, 35],
    [3, 6, 9, 12, 15, 18, 21, 24, 27, 30, 33, 36],
];

/// Inclusive bounds of the three dozens.
pub const DOZENS: [(u8, u8); 3] = [(1, 12), (13, 24), (25, 36)];

/// Check that `n` is a legal outcome and narrow it to `u8`.
pub fn validate_outcome(n: i64) -> Result<u8> {
    if (0..=i64::from(MAX_OUTCOME)).contains(&n) {
        Ok(n as u8)
    } else {
        Err(LedgerError::InvalidOutcome { value: n })
    }
}

/// Pocket color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Red,
    Black,
}

impl Color {
    pub fn of(n: u8) -> Self {
        if n == 0 {
            Color::Green
        } else if is_red(n) {
            Color::Red
        } else {
            Color::Black
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Color::Green => write!(f, "green"),
            Color::Red => write!(f, "red"),
            Color::Black => write!(f, "black"),
        }
    }
}

pub fn is_red(n: u8) -> bool {
    RED_NUMBERS.contains(&n)
}

pub fn is_black(n: u8) -> bool {
    n != 0 && n <= MAX_OUTCOME && !is_red(n)
}

pub fn is_even(n: u8) -> bool {
    n != 0 && n % 2 == 0
}

pub fn is_odd(n: u8) -> bool {
    n % 2 == 1
}

pub fn is_low(n: u8) -> bool {
    (1..=18).contains(&n)
}

pub fn is_high(n: u8) -> bool {
    (19..=36).contains(&n)
}

/// Index (0, 1, 2) of the dozen containing `n`, or `None` for zero.
pub fn dozen_of(n: u8) -> Option<usize> {
    DOZENS.iter().position(|&(lo, hi)| (lo..=hi).contains(&n))
}

/// Index (0, 1, 2) of the table row containing `n`, or `None` for zero.
pub fn row_of(n: u8) -> Option<usize> {
    ROWS.iter().position(|row| row.contains(&n))
}
