use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StickerError;

pub const DEFAULT_ROWS: u32 = 4;
pub const DEFAULT_COLS: u32 = 6;
/// Upper bound for rows and columns alike.
pub const MAX_GRID_SIDE: u32 = 64;
pub const ARCHIVE_FOLDER: &str = "stickers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    rows: u32,
    cols: u32,
}

impl GridSpec {
    pub fn new(rows: u32, cols: u32) -> Result<Self, StickerError> {
        if rows == 0 || cols == 0 {
            return Err(StickerError::Config(format!(
                "grid must have at least one row and one column (got {rows}x{cols})"
            )));
        }
        if rows > MAX_GRID_SIDE || cols > MAX_GRID_SIDE {
            return Err(StickerError::Config(format!(
                "grid sides are limited to {MAX_GRID_SIDE} (got {rows}x{cols})"
            )));
        }
        Ok(Self { rows, cols })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.rows) * u64::from(self.cols)
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Parses `ROWSxCOLS`, e.g. `4x6`.
impl FromStr for GridSpec {
    type Err = StickerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('×', "x");
        let (rows, cols) = normalized
            .split_once('x')
            .ok_or_else(|| StickerError::Config(format!("grid must look like 4x6 (got {raw:?})")))?;
        let parse = |value: &str| {
            value
                .trim()
                .parse::<u32>()
                .map_err(|_| StickerError::Config(format!("grid must look like 4x6 (got {raw:?})")))
        };
        GridSpec::new(parse(rows)?, parse(cols)?)
    }
}

/// Pixel rectangle of one cell inside the source bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRegion {
    pub row: u32,
    pub col: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicedCell {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl SlicedCell {
    pub fn file_name(&self) -> String {
        cell_file_name(self.index)
    }
}

pub fn cell_file_name(index: u32) -> String {
    format!("sticker_{index:02}.png")
}

#[cfg(test)]
mod tests {
    use super::{cell_file_name, GridSpec, MAX_GRID_SIDE};

    #[test]
    fn grid_rejects_zero_and_oversized_dimensions() {
        assert!(GridSpec::new(0, 3).is_err());
        assert!(GridSpec::new(3, 0).is_err());
        assert!(GridSpec::new(MAX_GRID_SIDE, MAX_GRID_SIDE).is_ok());
        assert!(GridSpec::new(MAX_GRID_SIDE + 1, 2).is_err());
        assert!("100000x100000".parse::<GridSpec>().is_err());
        assert_eq!(GridSpec::new(4, 6).map(|grid| grid.cell_count()).ok(), Some(24));
    }

    #[test]
    fn grid_parses_rows_by_cols() {
        let grid: GridSpec = " 3X5 ".parse().expect("grid");
        assert_eq!((grid.rows(), grid.cols()), (3, 5));
        assert_eq!(grid.to_string(), "3x5");
        assert!("3".parse::<GridSpec>().is_err());
        assert!("0x2".parse::<GridSpec>().is_err());
        assert!("axb".parse::<GridSpec>().is_err());
    }

    #[test]
    fn file_names_are_zero_padded() {
        assert_eq!(cell_file_name(1), "sticker_01.png");
        assert_eq!(cell_file_name(24), "sticker_24.png");
        assert_eq!(cell_file_name(120), "sticker_120.png");
    }
}
