use std::io::Cursor;

use anyhow::Result;
use image::{DynamicImage, ImageFormat};
use sticker_contracts::grid::{CellRegion, GridSpec, SlicedCell};
use sticker_contracts::StickerError;

/// Receives cells as they are produced; nothing is kept by the slicer.
pub trait CellSink {
    fn accept(&mut self, cell: SlicedCell) -> Result<()>;
}

impl CellSink for Vec<SlicedCell> {
    fn accept(&mut self, cell: SlicedCell) -> Result<()> {
        self.push(cell);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCell {
    pub region: CellRegion,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceReport {
    pub source_width: u32,
    pub source_height: u32,
    pub cells_written: u32,
    pub skipped: Vec<SkippedCell>,
}

/// Row-major crop rectangles for `grid` over a `width`×`height` bitmap.
///
/// Origins are `floor(index * cell)`; sizes are `floor(cell)` clamped to the
/// bitmap, except the last row and column, which run to the edge and absorb
/// the rounding remainder.
pub fn cell_regions(width: u32, height: u32, grid: GridSpec) -> Vec<CellRegion> {
    let cell_width = f64::from(width) / f64::from(grid.cols());
    let cell_height = f64::from(height) / f64::from(grid.rows());
    let mut regions = Vec::new();
    for row in 0..grid.rows() {
        let y = (f64::from(row) * cell_height).floor() as u32;
        let region_height = if row + 1 == grid.rows() {
            height.saturating_sub(y)
        } else {
            (cell_height.floor() as u32).min(height.saturating_sub(y))
        };
        for col in 0..grid.cols() {
            let x = (f64::from(col) * cell_width).floor() as u32;
            let region_width = if col + 1 == grid.cols() {
                width.saturating_sub(x)
            } else {
                (cell_width.floor() as u32).min(width.saturating_sub(x))
            };
            regions.push(CellRegion {
                row,
                col,
                x,
                y,
                width: region_width,
                height: region_height,
            });
        }
    }
    regions
}

pub fn decode_sheet(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes).map_err(|err| StickerError::Decode(err.to_string()))?)
}

/// Crops `bytes` into `grid` cells and hands each PNG-encoded cell to `sink`.
///
/// A cell that cannot be encoded is recorded in the report and left out; the
/// sequence number only advances for cells that reach the sink.
pub fn slice_grid(bytes: &[u8], grid: GridSpec, sink: &mut dyn CellSink) -> Result<SliceReport> {
    let sheet = decode_sheet(bytes)?;
    let (width, height) = (sheet.width(), sheet.height());

    let mut cells_written = 0u32;
    let mut skipped = Vec::new();
    for region in cell_regions(width, height, grid) {
        match encode_region(&sheet, region) {
            Ok(png) => {
                cells_written += 1;
                sink.accept(SlicedCell {
                    index: cells_written,
                    width: region.width,
                    height: region.height,
                    bytes: png,
                })?;
            }
            Err(reason) => skipped.push(SkippedCell { region, reason }),
        }
    }

    Ok(SliceReport {
        source_width: width,
        source_height: height,
        cells_written,
        skipped,
    })
}

fn encode_region(sheet: &DynamicImage, region: CellRegion) -> Result<Vec<u8>, String> {
    if region.width == 0 || region.height == 0 {
        return Err(format!(
            "empty cell {}x{} at ({}, {})",
            region.width, region.height, region.x, region.y
        ));
    }
    let cell = sheet.crop_imm(region.x, region.y, region.width, region.height);
    let mut out = Cursor::new(Vec::new());
    cell.write_to(&mut out, ImageFormat::Png)
        .map_err(|err| err.to_string())?;
    Ok(out.into_inner())
}
