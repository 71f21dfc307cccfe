//! Pixel-space rectangles, I/O windows and block grids.
//!
//! # Overview
//!
//! - [`Rect`] - axis-aligned rectangle in raster pixel coordinates
//! - [`Window`] - a source rectangle plus the caller's buffer size
//! - [`BlockGrid`] - the tiling of a band into fixed-size blocks
//!
//! # Coordinate System
//!
//! ```text
//! (0,0) ────────► X
//!   │   ┌────┬────┬──┐
//!   │   │0,0 │1,0 │2,│   blocks of block_width x block_height;
//!   │   ├────┼────┼──┤   the right column and bottom row may be
//!   │   │0,1 │1,1 │2,│   partial when the raster size is not a
//!   │   └────┴────┴──┘   multiple of the block size
//!   ▼
//!   Y
//! ```
//!
//! # Usage
//!
//! ```rust
//! use geoblock_core::{BlockGrid, Rect};
//!
//! let grid = BlockGrid::new(100, 50, 32, 32);
//! assert_eq!((grid.blocks_x(), grid.blocks_y()), (4, 2));
//! assert_eq!(grid.block_rect(3, 1), Rect::new(96, 32, 4, 18));
//!
//! let touched: Vec<_> = grid.blocks_covering(&Rect::new(30, 0, 4, 40)).collect();
//! assert_eq!(touched, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// Axis-aligned rectangle with origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// Left edge.
    pub x: usize,
    /// Top edge.
    pub y: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl Rect {
    /// Creates a rectangle.
    #[inline]
    pub const fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge.
    #[inline]
    pub const fn right(&self) -> usize {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub const fn bottom(&self) -> usize {
        self.y + self.height
    }

    /// Number of pixels covered.
    #[inline]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// Whether the rectangle covers no pixels.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether pixel `(x, y)` lies inside.
    #[inline]
    pub const fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Whether `other` lies entirely inside this rectangle.
    #[inline]
    pub const fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Overlap of two rectangles, `None` when disjoint.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right > x && bottom > y {
            Some(Rect::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// A windowed I/O request: source rectangle and output buffer size.
///
/// When the buffer size differs from the source size the transfer is
/// resampled with nearest neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Source X offset.
    pub x_off: usize,
    /// Source Y offset.
    pub y_off: usize,
    /// Source width.
    pub x_size: usize,
    /// Source height.
    pub y_size: usize,
    /// Buffer width.
    pub buf_x_size: usize,
    /// Buffer height.
    pub buf_y_size: usize,
}

impl Window {
    /// Window whose buffer matches the source size.
    #[inline]
    pub const fn new(x_off: usize, y_off: usize, x_size: usize, y_size: usize) -> Self {
        Self {
            x_off,
            y_off,
            x_size,
            y_size,
            buf_x_size: x_size,
            buf_y_size: y_size,
        }
    }

    /// Whole raster window.
    #[inline]
    pub const fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Sets the buffer size.
    #[inline]
    pub const fn with_buffer_size(mut self, buf_x_size: usize, buf_y_size: usize) -> Self {
        self.buf_x_size = buf_x_size;
        self.buf_y_size = buf_y_size;
        self
    }

    /// Source rectangle.
    #[inline]
    pub const fn rect(&self) -> Rect {
        Rect::new(self.x_off, self.y_off, self.x_size, self.y_size)
    }

    /// Whether the transfer needs resampling.
    #[inline]
    pub const fn is_resampled(&self) -> bool {
        self.x_size != self.buf_x_size || self.y_size != self.buf_y_size
    }

    /// Number of buffer pixels.
    #[inline]
    pub const fn buffer_pixels(&self) -> usize {
        self.buf_x_size * self.buf_y_size
    }

    /// Checks the window against a raster of `width` x `height`.
    ///
    /// Windows are never clipped: any part outside the raster is an error,
    /// as is an empty source or buffer.
    pub fn validate(&self, width: usize, height: usize) -> Result<()> {
        if self.x_size == 0 || self.y_size == 0 || self.buf_x_size == 0 || self.buf_y_size == 0 {
            return Err(Error::invalid_argument(format!(
                "empty window {}x{} with buffer {}x{}",
                self.x_size, self.y_size, self.buf_x_size, self.buf_y_size
            )));
        }
        let fits_x = self.x_off.checked_add(self.x_size).is_some_and(|r| r <= width);
        let fits_y = self.y_off.checked_add(self.y_size).is_some_and(|b| b <= height);
        if !fits_x || !fits_y {
            return Err(Error::WindowOutOfBounds {
                x: self.x_off,
                y: self.y_off,
                width: self.x_size,
                height: self.y_size,
                raster_width: width,
                raster_height: height,
            });
        }
        Ok(())
    }
}

/// Tiling of a `width` x `height` band into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockGrid {
    /// Raster width.
    pub width: usize,
    /// Raster height.
    pub height: usize,
    /// Block width.
    pub block_width: usize,
    /// Block height.
    pub block_height: usize,
}

impl BlockGrid {
    /// Creates a grid. Block sides are expected to be non-zero.
    #[inline]
    pub const fn new(width: usize, height: usize, block_width: usize, block_height: usize) -> Self {
        Self { width, height, block_width, block_height }
    }

    /// Blocks per row.
    #[inline]
    pub const fn blocks_x(&self) -> usize {
        self.width.div_ceil(self.block_width)
    }

    /// Blocks per column.
    #[inline]
    pub const fn blocks_y(&self) -> usize {
        self.height.div_ceil(self.block_height)
    }

    /// Total number of blocks.
    #[inline]
    pub const fn block_count(&self) -> usize {
        self.blocks_x() * self.blocks_y()
    }

    /// Total number of blocks, or `None` if it overflows `usize`.
    #[inline]
    pub const fn checked_block_count(&self) -> Option<usize> {
        self.blocks_x().checked_mul(self.blocks_y())
    }

    /// Row-major index of block `(bx, by)`.
    #[inline]
    pub const fn linear_index(&self, bx: usize, by: usize) -> usize {
        by * self.blocks_x() + bx
    }

    /// Inverse of [`linear_index`](Self::linear_index).
    #[inline]
    pub const fn block_at(&self, index: usize) -> (usize, usize) {
        let bx = self.blocks_x();
        (index % bx, index / bx)
    }

    /// Whether `(bx, by)` addresses a block of this grid.
    #[inline]
    pub const fn contains_block(&self, bx: usize, by: usize) -> bool {
        bx < self.blocks_x() && by < self.blocks_y()
    }

    /// In-raster region of block `(bx, by)`; partial for edge blocks.
    pub fn block_rect(&self, bx: usize, by: usize) -> Rect {
        let x = bx * self.block_width;
        let y = by * self.block_height;
        Rect::new(
            x,
            y,
            self.block_width.min(self.width.saturating_sub(x)),
            self.block_height.min(self.height.saturating_sub(y)),
        )
    }

    /// Blocks intersecting `rect`, in row-major order.
    pub fn blocks_covering(&self, rect: &Rect) -> impl Iterator<Item = (usize, usize)> + use<> {
        let (bx0, by0, bx1, by1) = if rect.is_empty() {
            (0, 0, 0, 0)
        } else {
            (
                rect.x / self.block_width,
                rect.y / self.block_height,
                (rect.right() - 1) / self.block_width + 1,
                (rect.bottom() - 1) / self.block_height + 1,
            )
        };
        (by0..by1).flat_map(move |by| (bx0..bx1).map(move |bx| (bx, by)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_intersect() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.intersect(&b), Some(Rect::new(5, 5, 5, 5)));
        assert_eq!(a.intersect(&Rect::new(10, 0, 5, 5)), None);
        assert!(a.contains(9, 9));
        assert!(!a.contains(10, 9));
        assert!(a.contains_rect(&Rect::new(2, 2, 8, 8)));
        assert_eq!(a.to_string(), "(0, 0, 10x10)");
    }

    #[test]
    fn window_validation() {
        assert!(Window::new(0, 0, 10, 10).validate(10, 10).is_ok());
        let err = Window::new(5, 0, 6, 10).validate(10, 10).unwrap_err();
        assert!(matches!(err, Error::WindowOutOfBounds { .. }));
        assert!(Window::new(0, 0, 0, 5).validate(10, 10).unwrap_err().is_invalid_argument());
        assert!(
            Window::new(0, 0, 5, 5)
                .with_buffer_size(0, 2)
                .validate(10, 10)
                .is_err()
        );
        assert!(Window::new(usize::MAX, 0, 2, 2).validate(10, 10).is_err());
    }

    #[test]
    fn window_resampling_flag() {
        let w = Window::new(0, 0, 8, 8);
        assert!(!w.is_resampled());
        let w = w.with_buffer_size(4, 4);
        assert!(w.is_resampled());
        assert_eq!(w.buffer_pixels(), 16);
    }

    #[test]
    fn grid_edges() {
        let grid = BlockGrid::new(10, 7, 4, 4);
        assert_eq!(grid.block_count(), 6);
        assert_eq!(grid.block_rect(2, 1), Rect::new(8, 4, 2, 3));
        assert_eq!(grid.linear_index(1, 1), 4);
        assert_eq!(grid.block_at(4), (1, 1));
        assert!(!grid.contains_block(3, 0));
        assert_eq!(grid.checked_block_count(), Some(6));
        assert_eq!(BlockGrid::new(usize::MAX, usize::MAX, 1, 1).checked_block_count(), None);
    }

    #[test]
    fn grid_covering() {
        let grid = BlockGrid::new(10, 10, 4, 4);
        let all: Vec<_> = grid.blocks_covering(&Rect::new(0, 0, 10, 10)).collect();
        assert_eq!(all.len(), 9);
        assert_eq!(all[0], (0, 0));
        assert_eq!(all[8], (2, 2));
        let one: Vec<_> = grid.blocks_covering(&Rect::new(4, 4, 4, 4)).collect();
        assert_eq!(one, vec![(1, 1)]);
        assert_eq!(grid.blocks_covering(&Rect::new(3, 3, 0, 2)).count(), 0);
    }
}
