//! Several monitors on one set of scan-lines.
//!
//! Every monitor gets the same H-Sync, V-Sync and pixel clock, so they can
//! all share one frame buffer. Each monitor is wired to its own few colour
//! bits of the rendering unit. Arrange `monitors_x` by `monitors_y` monitors
//! in a grid and they show adjacent tiles of one larger canvas:
//!
//! ```text
//! +----------+----------+----------+
//! | bits 0   | bits 1   | bits 2   |
//! +----------+----------+----------+
//! | bits 3   | bits 4   | bits 5   |
//! +----------+----------+----------+
//! ```
//!
//! Canvas pixel `(x, y)` belongs to monitor
//! `(y / tile_height) * monitors_x + x / tile_width`, and lives at
//! `(x % tile_width, y % tile_height)` in the frame buffer.

// -----------------------------------------------------------------------------
// Licence Statement
// -----------------------------------------------------------------------------
// Copyright (c) The i2s-vga developers, 2025
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.
// -----------------------------------------------------------------------------

// -----------------------------------------------------------------------------
// Imports
// -----------------------------------------------------------------------------

use core::marker::PhantomData;

use crate::driver::PinMap;
use crate::error::ConfigError;
use crate::layout::BufferLayout;
use crate::scanline::FrameBuffer;
use crate::sync::SyncBits;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// How the monitors are arranged, and which bits each one gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tiling {
    monitors_x: usize,
    monitors_y: usize,
    bits_per_monitor: usize,
    tile_width: usize,
    tile_height: usize,
    unit_bits: usize,
}

/// Where a canvas pixel ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Location {
    /// Column in the frame buffer
    pub x: usize,
    /// Logical row in the frame buffer
    pub y: usize,
    /// Which monitor
    pub monitor: usize,
    /// Lowest colour bit that monitor uses
    pub shift: usize,
}

/// Pixel access to a frame buffer, across every monitor.
///
/// Writes only ever change the bits of the monitor the pixel is on; the sync
/// bits and the other monitors are left alone.
pub struct Canvas<'a, L> {
    frame: &'a mut FrameBuffer,
    tiling: Tiling,
    sync: SyncBits,
    _layout: PhantomData<L>,
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl Tiling {
    /// Arrange `monitors_x` by `monitors_y` monitors, each showing a tile of
    /// `tile_width` by `tile_height` pixels in `bits_per_monitor` colour bits,
    /// on a `unit_bits` wide rendering unit.
    ///
    /// The top two bits of the unit are sync, so the monitors have
    /// `unit_bits - 2` colour bits to share.
    pub fn compose(
        monitors_x: usize,
        monitors_y: usize,
        bits_per_monitor: usize,
        tile_width: usize,
        tile_height: usize,
        unit_bits: usize,
    ) -> Result<Tiling, ConfigError> {
        if monitors_x == 0
            || monitors_y == 0
            || bits_per_monitor == 0
            || tile_width == 0
            || tile_height == 0
        {
            return Err(ConfigError::MonitorGrid);
        }
        let available = unit_bits.saturating_sub(2);
        let requested = monitors_x * monitors_y * bits_per_monitor;
        if requested > available {
            return Err(ConfigError::TooManyMonitors {
                requested,
                available,
            });
        }
        Ok(Tiling {
            monitors_x,
            monitors_y,
            bits_per_monitor,
            tile_width,
            tile_height,
            unit_bits,
        })
    }

    /// One monitor showing the whole frame buffer in every colour bit.
    pub fn single(tile_width: usize, tile_height: usize, unit_bits: usize) -> Result<Tiling, ConfigError> {
        Tiling::compose(1, 1, unit_bits.saturating_sub(2), tile_width, tile_height, unit_bits)
    }

    /// Six monochrome monitors, three across and two down, on 8-bit units.
    pub fn six_monitors(tile_width: usize, tile_height: usize) -> Result<Tiling, ConfigError> {
        Tiling::compose(3, 2, 1, tile_width, tile_height, 8)
    }

    /// Four RGB monitors, two across and two down, on 16-bit units.
    pub fn four_rgb_monitors(tile_width: usize, tile_height: usize) -> Result<Tiling, ConfigError> {
        Tiling::compose(2, 2, 3, tile_width, tile_height, 16)
    }

    /// How many monitors
    pub const fn monitors(&self) -> usize {
        self.monitors_x * self.monitors_y
    }

    /// Colour bits per monitor
    pub const fn bits_per_monitor(&self) -> usize {
        self.bits_per_monitor
    }

    /// Size of one tile
    pub const fn tile_size(&self) -> (usize, usize) {
        (self.tile_width, self.tile_height)
    }

    /// Canvas width, across all monitors
    pub const fn width(&self) -> usize {
        self.monitors_x * self.tile_width
    }

    /// Canvas height, across all monitors
    pub const fn height(&self) -> usize {
        self.monitors_y * self.tile_height
    }

    /// Find canvas pixel `(x, y)`, if it is on the canvas.
    pub const fn locate(&self, x: usize, y: usize) -> Option<Location> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let monitor = (y / self.tile_height) * self.monitors_x + x / self.tile_width;
        Some(Location {
            x: x % self.tile_width,
            y: y % self.tile_height,
            monitor,
            shift: monitor * self.bits_per_monitor,
        })
    }

    /// The bits of one monitor
    pub const fn monitor_mask(&self, monitor: usize) -> u32 {
        self.colour_bits() << (monitor * self.bits_per_monitor)
    }

    /// Copy `colour` to every monitor's bits
    pub fn replicate(&self, colour: u32) -> u32 {
        let colour = colour & self.colour_bits();
        (0..self.monitors()).fold(0, |acc, monitor| {
            acc | (colour << (monitor * self.bits_per_monitor))
        })
    }

    /// Wire up the monitors.
    ///
    /// `data_pins` are given monitor by monitor, lowest bit first, and go on
    /// data bits 0 upwards. H-Sync and V-Sync go on the top two bits of the
    /// unit.
    pub fn pin_map(
        &self,
        data_pins: &[u8],
        hsync: u8,
        vsync: u8,
        clock: Option<u8>,
    ) -> Result<PinMap, ConfigError> {
        let needed = self.monitors() * self.bits_per_monitor;
        if data_pins.len() > needed {
            return Err(ConfigError::TooManyPins {
                requested: data_pins.len(),
                supported: needed,
            });
        }
        let mut map = PinMap::new();
        for (bit, gpio) in data_pins.iter().enumerate() {
            map = map.with_data(bit, *gpio)?;
        }
        map = map
            .with_data(self.unit_bits - 2, hsync)?
            .with_data(self.unit_bits - 1, vsync)?;
        if let Some(gpio) = clock {
            map = map.with_clock(gpio);
        }
        Ok(map)
    }

    const fn colour_bits(&self) -> u32 {
        (1 << self.bits_per_monitor) - 1
    }
}

impl<'a, L> Canvas<'a, L>
where
    L: BufferLayout,
{
    /// Draw into `frame`, laid out per `tiling`.
    pub fn new(frame: &'a mut FrameBuffer, tiling: Tiling, sync: SyncBits) -> Canvas<'a, L> {
        Canvas {
            frame,
            tiling,
            sync,
            _layout: PhantomData,
        }
    }

    /// Width in pixels, across all monitors
    pub fn width(&self) -> usize {
        self.tiling.width()
    }

    /// Height in pixels, across all monitors
    pub fn height(&self) -> usize {
        self.tiling.height()
    }

    /// Set one pixel. Off-canvas pixels are ignored.
    pub fn set_pixel(&mut self, x: usize, y: usize, colour: u32) {
        let Some(at) = self.tiling.locate(x, y) else {
            return;
        };
        let mask = self.tiling.monitor_mask(at.monitor);
        let line = self.frame.scanline_mut(at.y);
        let unit = L::read(line, at.x);
        L::write(line, at.x, (unit & !mask) | ((colour << at.shift) & mask));
    }

    /// Read one pixel back.
    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        let at = self.tiling.locate(x, y)?;
        let unit = L::read(self.frame.scanline(at.y), at.x);
        Some((unit & self.tiling.monitor_mask(at.monitor)) >> at.shift)
    }

    /// Set every pixel on every monitor to `colour`.
    pub fn clear(&mut self, colour: u32) {
        for row in 0..self.frame.rows() {
            self.fill_row(row, colour);
        }
    }

    /// Set every pixel of frame buffer row `row`, on every monitor, to
    /// `colour`.
    pub fn fill_row(&mut self, row: usize, colour: u32) {
        let unit = self.sync.with_idle_hsync(self.tiling.replicate(colour), false);
        self.frame.fill_row::<L>(row, unit);
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
