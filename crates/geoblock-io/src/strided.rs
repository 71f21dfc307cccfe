//! Windowed reads and writes over the block cache.
//!
//! A window request names a source rectangle, a caller buffer with its own
//! [`DataType`] and byte strides, and an output size. The transfer:
//!
//! 1. validates the window against the raster (no clipping),
//! 2. walks the blocks covering it in row-major order, leasing one at a time,
//! 3. converts the overlapping samples between the band type and the buffer
//!    type, honoring pixel and line spacing.
//!
//! When the buffer size differs from the window size, each buffer pixel maps
//! to the source pixel whose center is nearest:
//! `src = off + (2 * o + 1) * size / (2 * out)`.
//!
//! Edge blocks only contribute their in-raster region; the padding beyond
//! the raster is never read into or written from caller buffers.

use geoblock_core::convert::{self, can_convert, read_scalar};
use geoblock_core::{DataType, Error, Rect, Result, Window};

use crate::block_store::{BandLayout, BlockKey, BlockStore, Intent};
use crate::progress::ProgressSink;

/// Byte spacing of a caller buffer. Zero means packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Spacing {
    /// Bytes between adjacent pixels of a row.
    pub pixel: usize,
    /// Bytes between the starts of adjacent rows.
    pub line: usize,
}

impl Spacing {
    /// Packed layout.
    pub const PACKED: Spacing = Spacing { pixel: 0, line: 0 };

    /// Explicit spacing.
    pub const fn new(pixel: usize, line: usize) -> Self {
        Self { pixel, line }
    }

    /// Resolves zero fields for a buffer of `buf_type` that is `width` pixels
    /// wide. Fails when the packed line length overflows.
    pub fn resolve(&self, buf_type: DataType, width: usize) -> Result<(usize, usize)> {
        let pixel = if self.pixel == 0 { buf_type.size_bytes() } else { self.pixel };
        let line = match self.line {
            0 => pixel.checked_mul(width).ok_or_else(|| {
                Error::invalid_argument(format!("line of {width} pixels at spacing {pixel} overflows"))
            })?,
            line => line,
        };
        Ok((pixel, line))
    }
}

/// Bytes a buffer needs for `width` x `height` samples at the given spacing.
///
/// Fails when the extent overflows `usize`.
pub fn required_len(
    buf_type: DataType,
    width: usize,
    height: usize,
    pixel: usize,
    line: usize,
) -> Result<usize> {
    if width == 0 || height == 0 {
        return Ok(0);
    }
    (height - 1)
        .checked_mul(line)
        .zip((width - 1).checked_mul(pixel))
        .and_then(|(rows, cols)| rows.checked_add(cols))
        .and_then(|extent| extent.checked_add(buf_type.size_bytes()))
        .ok_or_else(|| {
            Error::invalid_argument(format!(
                "{width}x{height} buffer at spacing ({pixel}, {line}) overflows"
            ))
        })
}

struct Transfer {
    layout: BandLayout,
    pixel: usize,
    line: usize,
}

fn prepare(
    store: &BlockStore,
    band: usize,
    window: &Window,
    buf_len: usize,
    buf_type: DataType,
    spacing: Spacing,
) -> Result<Transfer> {
    let layout = *store.layout(band)?;
    window.validate(layout.width, layout.height)?;
    let (pixel, line) = spacing.resolve(buf_type, window.buf_x_size)?;
    if pixel < buf_type.size_bytes() {
        return Err(Error::invalid_argument(format!(
            "pixel spacing {pixel} smaller than {buf_type} sample"
        )));
    }
    let needed = required_len(buf_type, window.buf_x_size, window.buf_y_size, pixel, line)?;
    if buf_len < needed {
        return Err(Error::invalid_argument(format!(
            "buffer of {buf_len} bytes too small for {}x{} window ({needed} bytes needed)",
            window.buf_x_size, window.buf_y_size
        )));
    }
    Ok(Transfer { layout, pixel, line })
}

/// Nearest source index for each of `out` outputs over `size` sources
/// starting at `off`.
fn nearest_map(off: usize, size: usize, out: usize) -> Vec<usize> {
    (0..out).map(|o| nearest_index(off, size, out, o)).collect()
}

/// Source index of output `o` when `size` sources starting at `off` are
/// resampled to `out` outputs.
#[inline]
pub(crate) fn nearest_index(off: usize, size: usize, out: usize, o: usize) -> usize {
    off + ((2 * o as u128 + 1) * size as u128 / (2 * out as u128)) as usize
}

/// Reads `window` of band `band` into `buf` as `buf_type`.
pub fn read_window(
    store: &BlockStore,
    band: usize,
    window: &Window,
    buf: &mut [u8],
    buf_type: DataType,
    spacing: Spacing,
) -> Result<()> {
    let t = prepare(store, band, window, buf.len(), buf_type, spacing)?;
    let native = t.layout.data_type;
    if !can_convert(native, buf_type) {
        return Err(Error::unsupported_conversion(native, buf_type));
    }
    let nsize = native.size_bytes();
    let grid = t.layout.grid();

    if !window.is_resampled() {
        let win = window.rect();
        for (bx, by) in grid.blocks_covering(&win) {
            let block = grid.block_rect(bx, by);
            let Some(part) = win.intersect(&block) else { continue };
            let handle = store.fetch(BlockKey::new(band, bx, by), Intent::Read)?;
            let data = handle.data();
            for row in part.y..part.bottom() {
                let src = ((row - block.y) * t.layout.block_width + (part.x - block.x)) * nsize;
                let dst = (row - win.y) * t.line + (part.x - win.x) * t.pixel;
                convert::convert_run(
                    &data[src..],
                    native,
                    nsize,
                    &mut buf[dst..],
                    buf_type,
                    t.pixel,
                    part.width,
                )?;
            }
        }
        return Ok(());
    }

    let src_x = nearest_map(window.x_off, window.x_size, window.buf_x_size);
    let src_y = nearest_map(window.y_off, window.y_size, window.buf_y_size);
    let bsize = buf_type.size_bytes();
    for (bx, by) in grid.blocks_covering(&window.rect()) {
        let block = grid.block_rect(bx, by);
        let xs = src_x.partition_point(|&s| s < block.x)..src_x.partition_point(|&s| s < block.right());
        let ys = src_y.partition_point(|&s| s < block.y)..src_y.partition_point(|&s| s < block.bottom());
        if xs.is_empty() || ys.is_empty() {
            continue;
        }
        let handle = store.fetch(BlockKey::new(band, bx, by), Intent::Read)?;
        let data = handle.data();
        for oy in ys {
            let row = (src_y[oy] - block.y) * t.layout.block_width;
            for ox in xs.clone() {
                let src = (row + src_x[ox] - block.x) * nsize;
                let dst = oy * t.line + ox * t.pixel;
                let v = convert::read_sample(native, &data[src..src + nsize]);
                convert::write_sample(buf_type, v, &mut buf[dst..dst + bsize]);
            }
        }
    }
    Ok(())
}

/// Writes `buf` (samples of `buf_type`) into `window` of band `band`.
///
/// Blocks the window covers completely are leased [`Intent::Write`] and not
/// decoded; partially covered blocks are read, modified and written back.
/// Every touched block is marked dirty.
pub fn write_window(
    store: &BlockStore,
    band: usize,
    window: &Window,
    buf: &[u8],
    buf_type: DataType,
    spacing: Spacing,
) -> Result<()> {
    let t = prepare(store, band, window, buf.len(), buf_type, spacing)?;
    let native = t.layout.data_type;
    if !can_convert(buf_type, native) {
        return Err(Error::unsupported_conversion(buf_type, native));
    }
    let nsize = native.size_bytes();
    let bsize = buf_type.size_bytes();
    let grid = t.layout.grid();
    let win = window.rect();

    // Buffer index for each source column/row; identity when not resampled.
    let buf_x = nearest_map(0, window.buf_x_size, window.x_size);
    let buf_y = nearest_map(0, window.buf_y_size, window.y_size);

    for (bx, by) in grid.blocks_covering(&win) {
        let block = grid.block_rect(bx, by);
        let Some(part) = win.intersect(&block) else { continue };
        let intent = if part == block { Intent::Write } else { Intent::ReadWrite };
        let handle = store.fetch(BlockKey::new(band, bx, by), intent)?;
        {
            let mut data = handle.data_mut()?;
            for row in part.y..part.bottom() {
                let dst_row = (row - block.y) * t.layout.block_width;
                if !window.is_resampled() {
                    let src = (row - win.y) * t.line + (part.x - win.x) * t.pixel;
                    let dst = (dst_row + part.x - block.x) * nsize;
                    convert::convert_run(
                        &buf[src..],
                        buf_type,
                        t.pixel,
                        &mut data[dst..],
                        native,
                        nsize,
                        part.width,
                    )?;
                    continue;
                }
                let oy = buf_y[row - win.y];
                for col in part.x..part.right() {
                    let ox = buf_x[col - win.x];
                    let src = oy * t.line + ox * t.pixel;
                    let dst = (dst_row + col - block.x) * nsize;
                    let v = convert::read_sample(buf_type, &buf[src..src + bsize]);
                    convert::write_sample(native, v, &mut data[dst..dst + nsize]);
                }
            }
        }
        handle.mark_dirty()?;
    }
    Ok(())
}

/// Read-only view of one leased block, limited to its in-raster region.
pub struct BlockView<'a> {
    data: &'a [u8],
    data_type: DataType,
    block_width: usize,
    rect: Rect,
}

impl<'a> BlockView<'a> {
    /// In-raster region of the block, in raster coordinates.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Sample type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Native bytes of row `y` (relative to the block) over the valid width.
    pub fn row(&self, y: usize) -> &'a [u8] {
        let size = self.data_type.size_bytes();
        let start = y * self.block_width * size;
        &self.data[start..start + self.rect.width * size]
    }

    /// Valid samples as real numbers (modulus for complex types), row-major.
    pub fn scalars(&self) -> impl Iterator<Item = f64> + '_ {
        let size = self.data_type.size_bytes();
        let dt = self.data_type;
        (0..self.rect.height).flat_map(move |y| {
            self.row(y)
                .chunks_exact(size)
                .map(move |s| read_scalar(dt, s))
        })
    }
}

/// Visits every `stride`-th block of band `band` in row-major order.
///
/// Progress is reported before the first block and after each visited block;
/// the lease on a block is released before its progress report. Returns
/// [`Error::Cancelled`] when the sink asks to stop.
pub fn for_each_block<F>(
    store: &BlockStore,
    band: usize,
    stride: usize,
    progress: &dyn ProgressSink,
    message: &str,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&BlockView<'_>) -> Result<()>,
{
    let layout = *store.layout(band)?;
    let grid = layout.grid();
    let stride = stride.max(1);
    let selected: Vec<usize> = (0..grid.block_count()).step_by(stride).collect();
    let total = selected.len();

    if !progress.report(0.0, message) {
        return Err(Error::Cancelled);
    }
    for (done, index) in selected.into_iter().enumerate() {
        let (bx, by) = grid.block_at(index);
        {
            let handle = store.fetch(BlockKey::new(band, bx, by), Intent::Read)?;
            let data = handle.data();
            let view = BlockView {
                data: data.as_slice(),
                data_type: layout.data_type,
                block_width: layout.block_width,
                rect: grid.block_rect(bx, by),
            };
            visit(&view)?;
        }
        if !progress.report((done + 1) as f64 / total as f64, message) {
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}
