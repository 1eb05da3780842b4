//! Pixel clock synthesis using the ESP32 Audio PLL.
//!
//! The APLL output is `xtal * (4 + sdm / 2^16) / (2 * (odir + 2))`, where
//! `sdm` is a 22-bit fractional multiplier split over three registers. The I2S
//! block divides it down by another factor of eight before it becomes the
//! pixel clock, so we search for APLL settings at eight times the pixel clock.

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

use fugit::HertzU32;

use crate::error::ConfigError;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Settings for the Audio PLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ApllConfig {
    /// Bits 7:0 of the multiplier
    pub sdm0: u8,
    /// Bits 15:8 of the multiplier
    pub sdm1: u8,
    /// Bits 21:16 of the multiplier (six bits)
    pub sdm2: u8,
    /// Output divider (five bits)
    pub odir: u8,
}

/// Settings for the I2S clock divider (`CLKM_CONF` and the bit clock divider).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockDivider {
    /// Integer part of the divider
    pub num: u8,
    /// Fractional divider denominator
    pub a: u8,
    /// Fractional divider numerator
    pub b: u8,
    /// Bit clock divider
    pub bck: u8,
    /// Take the clock from the APLL rather than PLL_D2
    pub use_apll: bool,
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// The crystal feeding the APLL
pub const XTAL_FREQUENCY: HertzU32 = HertzU32::Hz(40_000_000);

/// The fastest pixel clock we will try to make. Faster requests get this.
pub const MAX_PIXEL_CLOCK: HertzU32 = HertzU32::Hz(36_249_999);

/// The I2S block divides the APLL output by this much in parallel mode
const PIPELINE_FACTOR: u64 = 8;

/// The multiplier is a 16.16 fixed point number, offset by four
const SDM_ONE: i64 = 0x1_0000;
const SDM_OFFSET: i64 = 4 * SDM_ONE;

/// Stop searching once the multiplier reaches this
const SDM_TARGET: i64 = 0x8_C0EC;

/// Don't step to a divider whose multiplier would be above this
const SDM_NEXT_LIMIT: i64 = 0xA_7FFF;

/// Largest value of `odir`
const ODIR_MAX: i64 = 31;

/// Largest value of `sdm2`
const SDM2_MAX: i64 = 0x3F;

/// Divider used when generating video.
///
/// The APLL does all the work; these just give the fixed /8.
pub const OUTPUT_DIVIDER: ClockDivider = ClockDivider {
    num: 2,
    a: 1,
    b: 0,
    bck: 2,
    use_apll: true,
};

/// Divider used when sampling parallel input.
pub const INPUT_DIVIDER: ClockDivider = ClockDivider {
    num: 6,
    a: 6,
    b: 1,
    bck: 2,
    use_apll: false,
};

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Limit a pixel clock to what we can make.
pub fn clamp_pixel_clock(requested: HertzU32) -> HertzU32 {
    if requested > MAX_PIXEL_CLOCK {
        MAX_PIXEL_CLOCK
    } else {
        requested
    }
}

impl ApllConfig {
    /// Find APLL settings for the given pixel clock.
    ///
    /// Walks the output divider upwards from zero and stops at the first one
    /// where the multiplier is large enough, or where the next divider would
    /// push the multiplier out of range. Requests above [`MAX_PIXEL_CLOCK`]
    /// are clamped.
    pub fn synthesize(pixel_clock: HertzU32) -> Result<ApllConfig, ConfigError> {
        let freq = i64::from(clamp_pixel_clock(pixel_clock).to_Hz()) * PIPELINE_FACTOR as i64;
        let multiplier = |odir: i64| -> i64 {
            // freq / (xtal / 2 / (odir + 2)), as 16.16 fixed point
            let half_xtal = i64::from(XTAL_FREQUENCY.to_Hz()) / 2;
            freq * (odir + 2) * SDM_ONE / half_xtal - SDM_OFFSET
        };

        let mut odir = -1;
        let sdm = loop {
            odir += 1;
            let sdm = multiplier(odir);
            let next = multiplier(odir + 1);
            if sdm >= SDM_TARGET || odir >= ODIR_MAX || next >= SDM_NEXT_LIMIT {
                break sdm;
            }
        };

        if sdm < 0 || (sdm >> 16) > SDM2_MAX {
            return Err(ConfigError::ClockOutOfRange {
                requested: pixel_clock.to_Hz(),
            });
        }

        Ok(ApllConfig {
            sdm0: (sdm & 0xFF) as u8,
            sdm1: ((sdm >> 8) & 0xFF) as u8,
            sdm2: (sdm >> 16) as u8,
            odir: odir as u8,
        })
    }

    /// The 22-bit fractional multiplier
    pub const fn multiplier(&self) -> u32 {
        ((self.sdm2 as u32) << 16) | ((self.sdm1 as u32) << 8) | self.sdm0 as u32
    }

    /// What the APLL actually puts out with these settings
    pub fn apll_frequency(&self) -> HertzU32 {
        let numerator = u64::from(XTAL_FREQUENCY.to_Hz())
            * (SDM_OFFSET as u64 + u64::from(self.multiplier()));
        let denominator = SDM_ONE as u64 * 2 * (u64::from(self.odir) + 2);
        HertzU32::Hz((numerator / denominator) as u32)
    }

    /// The pixel clock these settings produce
    pub fn pixel_clock(&self) -> HertzU32 {
        HertzU32::Hz(self.apll_frequency().to_Hz() / PIPELINE_FACTOR as u32)
    }

    /// One step of the multiplier, as a change in APLL output, in Hz.
    pub fn apll_step_hz(&self) -> u32 {
        let step = u64::from(XTAL_FREQUENCY.to_Hz())
            / (SDM_ONE as u64 * 2 * (u64::from(self.odir) + 2));
        step.max(1) as u32
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn check_within_one_step(pixel_clock: u32) {
        let config = ApllConfig::synthesize(HertzU32::Hz(pixel_clock)).unwrap();
        let target = u64::from(clamp_pixel_clock(HertzU32::Hz(pixel_clock)).to_Hz()) * 8;
        let got = u64::from(config.apll_frequency().to_Hz());
        let step = u64::from(config.apll_step_hz());
        // The multiplier is rounded down, so we land just below the target
        assert!(got <= target, "{got} > {target}");
        assert!(target - got <= step + 1, "{got} too far from {target}");
        assert!(config.sdm2 <= 0x3F);
        assert!(config.odir <= 31);
    }

    #[test]
    fn vga_pixel_clock() {
        let config = ApllConfig::synthesize(HertzU32::Hz(25_175_000)).unwrap();
        assert_eq!(config.odir, 0);
        assert_eq!(config.multiplier(), 0x10_23D7);
        assert_eq!(config.sdm0, 0xD7);
        assert_eq!(config.sdm1, 0x23);
        assert_eq!(config.sdm2, 0x10);
        check_within_one_step(25_175_000);
    }

    #[test]
    fn common_pixel_clocks() {
        for hz in [
            5_000_000, 10_000_000, 12_587_500, 20_000_000, 25_175_000, 36_000_000,
        ] {
            check_within_one_step(hz);
        }
    }

    #[test]
    fn slow_clocks_walk_the_divider() {
        let config = ApllConfig::synthesize(HertzU32::Hz(5_000_000)).unwrap();
        assert_eq!(config.odir, 5);
        assert_eq!(config.multiplier(), 655_360);
    }

    #[test]
    fn fast_clocks_are_clamped() {
        let clamped = ApllConfig::synthesize(HertzU32::Hz(65_000_000)).unwrap();
        let limit = ApllConfig::synthesize(HertzU32::Hz(36_249_999)).unwrap();
        assert_eq!(clamped, limit);
        assert_eq!(clamp_pixel_clock(HertzU32::Hz(65_000_000)).to_Hz(), 36_249_999);
        assert_eq!(clamp_pixel_clock(HertzU32::Hz(36_250_000)).to_Hz(), 36_249_999);
        assert_eq!(clamp_pixel_clock(HertzU32::Hz(36_249_999)).to_Hz(), 36_249_999);
        check_within_one_step(65_000_000);
    }

    #[test]
    fn zero_is_refused() {
        assert_eq!(
            ApllConfig::synthesize(HertzU32::Hz(0)),
            Err(ConfigError::ClockOutOfRange { requested: 0 })
        );
    }
}

// End of file
