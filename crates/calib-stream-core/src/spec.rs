//! Pattern and resize geometry, parsed from `"WxH"` strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors from parsing a `"WxH"` size string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeParseError {
    #[error("size {value:?} has no 'x' separator")]
    MissingSeparator { value: String },
    #[error("size {value:?} has a non-numeric component")]
    InvalidNumber { value: String },
}

/// Parse a `"WxH"` string into its two integer components.
///
/// The string is split at the *last* `x`; surrounding whitespace on each side
/// is ignored. Components may be zero or negative, validity is decided by the
/// consumer of the size.
pub fn parse_size(value: &str) -> Result<(i32, i32), SizeParseError> {
    let Some(split) = value.rfind(['x', 'X']) else {
        return Err(SizeParseError::MissingSeparator {
            value: value.to_string(),
        });
    };
    let invalid = || SizeParseError::InvalidNumber {
        value: value.to_string(),
    };
    let w = value[..split].trim().parse::<i32>().map_err(|_| invalid())?;
    let h = value[split + 1..].trim().parse::<i32>().map_err(|_| invalid())?;
    Ok((w, h))
}

/// Inner-corner grid of the chessboard being searched for.
///
/// A board with `columns + 1` by `rows + 1` squares has `columns * rows`
/// inner corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSpec {
    pub columns: i32,
    pub rows: i32,
}

impl PatternSpec {
    pub const fn new(columns: i32, rows: i32) -> Self {
        Self { columns, rows }
    }

    pub fn is_valid(&self) -> bool {
        self.columns > 0 && self.rows > 0
    }

    /// Number of inner corners, zero for an invalid pattern.
    pub fn corner_count(&self) -> usize {
        if self.is_valid() {
            self.columns as usize * self.rows as usize
        } else {
            0
        }
    }
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self::new(4, 5)
    }
}

impl FromStr for PatternSpec {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (columns, rows) = parse_size(s)?;
        Ok(Self { columns, rows })
    }
}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// Optional downsampling target. `0x0` means "keep native resolution".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResizeSpec {
    pub width: i32,
    pub height: i32,
}

impl ResizeSpec {
    pub const NONE: ResizeSpec = ResizeSpec {
        width: 0,
        height: 0,
    };

    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_passthrough(&self) -> bool {
        self.width == 0 && self.height == 0
    }

    /// Target dimensions when this spec asks for an actual resize.
    ///
    /// `None` for the pass-through sentinel and for any spec with a
    /// non-positive component.
    pub fn target(&self) -> Option<(u32, u32)> {
        if self.width > 0 && self.height > 0 {
            Some((self.width as u32, self.height as u32))
        } else {
            None
        }
    }

    /// Pass-through or both components positive.
    pub fn is_valid(&self) -> bool {
        self.is_passthrough() || self.target().is_some()
    }
}

impl FromStr for ResizeSpec {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = parse_size(s)?;
        Ok(Self { width, height })
    }
}

impl fmt::Display for ResizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
