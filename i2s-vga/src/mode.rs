//! Video timing.
//!
//! A [`Mode`] describes one field: the horizontal and vertical porches, sync
//! pulse widths and visible resolution, plus the pixel clock and the sync
//! polarities.

// -----------------------------------------------------------------------------
// Licence Statement
// -----------------------------------------------------------------------------
// Copyright (c) Jonathan 'theJPster' Pallant and the Neotron Developers, 2023
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

use fugit::{HertzU32, MicrosDurationU32, NanosDurationU64};

use crate::error::ConfigError;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Describes the polarity of a sync pulse.
///
/// Some pulses are positive (active-high), some are negative (active-low).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncPolarity {
    /// An active-high pulse
    Positive,
    /// An active-low pulse
    Negative,
}

impl SyncPolarity {
    /// Is the sync line high between pulses?
    pub const fn idles_high(self) -> bool {
        matches!(self, SyncPolarity::Negative)
    }
}

/// The timing for one video mode.
///
/// Lines are sent as front porch, sync, back porch, then visible pixels. A
/// field is the same thing again, vertically, in scan-lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Mode {
    /// Pixels of blanking before the H-Sync pulse
    pub h_front: u16,
    /// Width of the H-Sync pulse, in pixels
    pub h_sync: u16,
    /// Pixels of blanking after the H-Sync pulse
    pub h_back: u16,
    /// Visible pixels per line
    pub h_res: u16,
    /// Lines of blanking before the V-Sync pulse
    pub v_front: u16,
    /// Height of the V-Sync pulse, in lines
    pub v_sync: u16,
    /// Lines of blanking after the V-Sync pulse
    pub v_back: u16,
    /// Visible lines per field
    pub v_res: u16,
    /// Each line of frame buffer is shown this many times
    pub v_div: u16,
    /// The pixel clock
    pub pixel_clock: HertzU32,
    /// H-Sync polarity
    pub h_polarity: SyncPolarity,
    /// V-Sync polarity
    pub v_polarity: SyncPolarity,
}

impl Mode {
    /// Total pixels per line, including blanking
    pub const fn pixels_per_line(&self) -> usize {
        self.h_blank() + self.h_res as usize
    }

    /// Pixels of horizontal blanking (front porch, sync and back porch)
    pub const fn h_blank(&self) -> usize {
        self.h_front as usize + self.h_sync as usize + self.h_back as usize
    }

    /// Total lines per field, including blanking
    pub const fn lines_per_field(&self) -> usize {
        self.blank_lines() + self.v_res as usize
    }

    /// Lines of vertical blanking (front porch, sync and back porch)
    pub const fn blank_lines(&self) -> usize {
        self.v_front as usize + self.v_sync as usize + self.v_back as usize
    }

    /// How many lines of frame buffer a field shows.
    pub const fn rows(&self) -> usize {
        self.v_res as usize / self.v_div as usize
    }

    /// Is this line within the V-Sync pulse?
    ///
    /// Lines are numbered from the start of the field, which starts with the
    /// front porch.
    pub const fn is_vsync_line(&self, line: usize) -> bool {
        let start = self.v_front as usize;
        line >= start && line < start + self.v_sync as usize
    }

    /// How long one line takes to send.
    pub fn line_duration(&self) -> NanosDurationU64 {
        let ns = self.pixels_per_line() as u64 * 1_000_000_000 / self.pixel_clock_hz();
        NanosDurationU64::from_ticks(ns)
    }

    /// How long one whole field takes to send.
    pub fn field_duration(&self) -> MicrosDurationU32 {
        let pixels = self.pixels_per_line() as u64 * self.lines_per_field() as u64;
        let us = pixels * 1_000_000 / self.pixel_clock_hz();
        MicrosDurationU32::from_ticks(us as u32)
    }

    /// Check the timing describes something we can generate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.h_res == 0
            || self.v_res == 0
            || self.v_div == 0
            || self.v_res % self.v_div != 0
            || self.h_sync == 0
            || self.v_sync == 0
            || self.pixel_clock.to_Hz() == 0
        {
            return Err(ConfigError::Mode);
        }
        Ok(())
    }

    fn pixel_clock_hz(&self) -> u64 {
        u64::from(self.pixel_clock.to_Hz()).max(1)
    }
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// 640x480 shown at 320x240, with every line doubled
pub const MODE_320X240: Mode = Mode {
    h_front: 8,
    h_sync: 48,
    h_back: 24,
    h_res: 320,
    v_front: 10,
    v_sync: 2,
    v_back: 33,
    v_res: 480,
    v_div: 2,
    pixel_clock: HertzU32::Hz(12_587_500),
    h_polarity: SyncPolarity::Negative,
    v_polarity: SyncPolarity::Negative,
};

/// 640x400 @ 70Hz
pub const MODE_640X400: Mode = Mode {
    h_front: 16,
    h_sync: 96,
    h_back: 48,
    h_res: 640,
    v_front: 12,
    v_sync: 2,
    v_back: 35,
    v_res: 400,
    v_div: 1,
    pixel_clock: HertzU32::Hz(25_175_000),
    h_polarity: SyncPolarity::Negative,
    v_polarity: SyncPolarity::Positive,
};

/// 640x480 @ 60Hz, the one every monitor can do
pub const MODE_640X480: Mode = Mode {
    h_front: 16,
    h_sync: 96,
    h_back: 48,
    h_res: 640,
    v_front: 10,
    v_sync: 2,
    v_back: 33,
    v_res: 480,
    v_div: 1,
    pixel_clock: HertzU32::Hz(25_175_000),
    h_polarity: SyncPolarity::Negative,
    v_polarity: SyncPolarity::Negative,
};

/// 800x600 @ 60Hz
pub const MODE_800X600: Mode = Mode {
    h_front: 40,
    h_sync: 128,
    h_back: 88,
    h_res: 800,
    v_front: 1,
    v_sync: 4,
    v_back: 23,
    v_res: 600,
    v_div: 1,
    pixel_clock: HertzU32::Hz(40_000_000),
    h_polarity: SyncPolarity::Positive,
    v_polarity: SyncPolarity::Positive,
};

/// 1024x768 @ 60Hz
///
/// The pixel clock is beyond what the Audio PLL can give us, so it gets
/// clamped and the monitor sees a slower mode.
pub const MODE_1024X768: Mode = Mode {
    h_front: 24,
    h_sync: 136,
    h_back: 160,
    h_res: 1024,
    v_front: 3,
    v_sync: 6,
    v_back: 29,
    v_res: 768,
    v_div: 1,
    pixel_clock: HertzU32::Hz(65_000_000),
    h_polarity: SyncPolarity::Negative,
    v_polarity: SyncPolarity::Negative,
};

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
