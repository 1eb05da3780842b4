//! Sync bit patterns.
//!
//! The top two bits of every rendering unit are H-Sync and V-Sync. Which
//! level means "asserted" depends on the mode's polarity, so everything that
//! writes a unit asks [`SyncBits`] for the right pattern.

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

use crate::layout::BufferLayout;
use crate::mode::{Mode, SyncPolarity};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Idle and asserted sync patterns for one mode and one buffer layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SyncBits {
    hsync_mask: u32,
    vsync_mask: u32,
    hsync_idle: u32,
    vsync_idle: u32,
    replicate: u32,
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl SyncBits {
    /// Work out the sync patterns for `mode`, packed per `L`.
    pub fn new<L: BufferLayout>(mode: &Mode) -> SyncBits {
        let unit_bits = L::unit_bits();
        let hsync_mask = 1 << (unit_bits - 2);
        let vsync_mask = 1 << (unit_bits - 1);
        SyncBits {
            hsync_mask,
            vsync_mask,
            hsync_idle: idle_level(mode.h_polarity, hsync_mask),
            vsync_idle: idle_level(mode.v_polarity, vsync_mask),
            replicate: L::REPLICATE,
        }
    }

    /// The H-Sync bit
    pub const fn hsync_mask(&self) -> u32 {
        self.hsync_mask
    }

    /// The V-Sync bit
    pub const fn vsync_mask(&self) -> u32 {
        self.vsync_mask
    }

    /// Both sync bits
    pub const fn mask(&self) -> u32 {
        self.hsync_mask | self.vsync_mask
    }

    /// Every bit of a unit that isn't sync
    pub const fn colour_mask(&self) -> u32 {
        self.hsync_mask - 1
    }

    /// H-Sync level when not in the pulse
    pub const fn hsync_idle(&self) -> u32 {
        self.hsync_idle
    }

    /// H-Sync level during the pulse
    pub const fn hsync_asserted(&self) -> u32 {
        self.hsync_idle ^ self.hsync_mask
    }

    /// V-Sync level when not in the pulse
    pub const fn vsync_idle(&self) -> u32 {
        self.vsync_idle
    }

    /// V-Sync level during the pulse
    pub const fn vsync_asserted(&self) -> u32 {
        self.vsync_idle ^ self.vsync_mask
    }

    /// The sync bits of one unit
    pub const fn unit(&self, hsync: bool, vsync: bool) -> u32 {
        let h = if hsync {
            self.hsync_asserted()
        } else {
            self.hsync_idle
        };
        let v = if vsync {
            self.vsync_asserted()
        } else {
            self.vsync_idle
        };
        h | v
    }

    /// As [`SyncBits::unit`], copied into every unit of a 32-bit word
    pub const fn word(&self, hsync: bool, vsync: bool) -> u32 {
        self.unit(hsync, vsync).wrapping_mul(self.replicate)
    }

    /// Replace the sync bits of `unit` with the idle pattern (V-Sync as given)
    pub const fn with_idle_hsync(&self, unit: u32, vsync: bool) -> u32 {
        (unit & !self.mask()) | self.unit(false, vsync)
    }
}

/// The idle level is high for a negative pulse and low for a positive one.
fn idle_level(polarity: SyncPolarity, mask: u32) -> u32 {
    if polarity.idles_high() {
        mask
    } else {
        0
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Bits16, Bits8};
    use crate::mode::{MODE_640X480, MODE_800X600};

    #[test]
    fn negative_polarity_idles_high() {
        let sync = SyncBits::new::<Bits8>(&MODE_640X480);
        assert_eq!(sync.hsync_mask(), 0x40);
        assert_eq!(sync.vsync_mask(), 0x80);
        assert_eq!(sync.unit(false, false), 0xC0);
        assert_eq!(sync.unit(true, false), 0x80);
        assert_eq!(sync.unit(false, true), 0x40);
        assert_eq!(sync.unit(true, true), 0x00);
        assert_eq!(sync.colour_mask(), 0x3F);
    }

    #[test]
    fn positive_polarity_idles_low() {
        let sync = SyncBits::new::<Bits16>(&MODE_800X600);
        assert_eq!(sync.unit(false, false), 0);
        assert_eq!(sync.unit(true, true), 0xC000);
    }

    #[test]
    fn asserted_is_idle_flipped() {
        for mode in [MODE_640X480, MODE_800X600] {
            let sync = SyncBits::new::<Bits16>(&mode);
            assert_eq!(sync.hsync_asserted() ^ sync.hsync_idle(), sync.hsync_mask());
            assert_eq!(sync.vsync_asserted() ^ sync.vsync_idle(), sync.vsync_mask());
        }
    }

    #[test]
    fn words_are_replicated() {
        let sync = SyncBits::new::<Bits8>(&MODE_640X480);
        assert_eq!(sync.word(false, false), 0xC0C0_C0C0);
        assert_eq!(sync.word(true, false), 0x8080_8080);
        let sync = SyncBits::new::<Bits16>(&MODE_640X480);
        assert_eq!(sync.word(false, true), 0x4000_4000);
    }

    #[test]
    fn colour_survives_resync() {
        let sync = SyncBits::new::<Bits8>(&MODE_640X480);
        assert_eq!(sync.with_idle_hsync(0x15, false), 0xD5);
        assert_eq!(sync.with_idle_hsync(0x15, true), 0x55);
    }
}

// End of file
