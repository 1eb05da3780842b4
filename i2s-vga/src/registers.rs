//! The register interface the driver is written against.
//!
//! Everything that knows where a bit lives in the I2S register block sits
//! behind [`PeripheralRegisters`]. The driver only ever asks for named fields
//! to be set, so it can be run against the real hardware (see the `esp32`
//! module) or against a fake in the unit tests.

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

use crate::clock::{ApllConfig, ClockDivider};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Which I2S channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    I2s0,
    I2s1,
}

/// Transmit or receive half of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Tx,
    Rx,
}

/// A peripheral signal that can be routed to a GPIO through the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Signal {
    /// Parallel data bit `n`
    Data(u8),
    /// The bit (pixel) clock
    BitClock,
    /// The word select strobe
    WordSelect,
}

/// The interrupt sources we use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Interrupts {
    /// The out-link finished a descriptor with the EOF flag set
    pub out_eof: bool,
    /// The out-link hit a descriptor it didn't like
    pub out_dscr_err: bool,
    /// The in-link filled a descriptor
    pub in_done: bool,
}

/// FIFO settings for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FifoConfig {
    /// Sample packing mode. Mode 1 gives `0A0B_0C0D` ordering.
    pub mode: u8,
    /// Threshold, in words, for the FIFO data interrupt
    pub data_num: u8,
    /// Force the FIFO mode setting to take effect
    pub force_mode: bool,
    /// Feed the FIFO from DMA descriptors
    pub dma: bool,
}

/// The things that can be held in reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetGroup {
    /// In-link, out-link, AHB master and AHB FIFO (in `LC_CONF`)
    Dma,
    /// Transmitter, receiver and both FIFOs (in `CONF`)
    Channel,
}

/// Named access to one I2S channel, plus the bits of the chip around it
/// (clock gate, Audio PLL, GPIO matrix and interrupt line) that the driver
/// needs to touch.
pub trait PeripheralRegisters {
    /// Which channel these registers belong to
    fn channel(&self) -> Channel;

    /// Ungate the peripheral clock and take the block out of reset
    fn enable_module(&mut self);

    /// Assert or release a group of reset bits
    fn set_reset(&mut self, group: ResetGroup, asserted: bool);

    /// Is the receive FIFO still coming out of reset?
    fn rx_fifo_reset_pending(&self) -> bool;

    /// Set or clear the transmit or receive start bit
    fn set_start(&mut self, direction: Direction, start: bool);

    /// Load a descriptor address into the out-link (or in-link) and start it
    fn start_link(&mut self, direction: Direction, descriptor: usize);

    /// Stop the out-link (or in-link)
    fn stop_link(&mut self, direction: Direction);

    /// Address of the out-link descriptor the DMA engine is working on
    fn current_out_descriptor(&self) -> usize;

    /// Number of samples after which the receiver raises `in_suc_eof`
    fn set_rx_eof_num(&mut self, samples: u32);

    /// Raw interrupt status
    fn raw_interrupts(&self) -> Interrupts;

    /// Clear the given interrupt status bits
    fn clear_interrupts(&mut self, which: Interrupts);

    /// Set the interrupt enable mask
    fn set_enabled_interrupts(&mut self, which: Interrupts);

    /// Connect or disconnect the channel's interrupt line from the CPU
    fn set_interrupt_line(&mut self, enabled: bool);

    /// Turn LCD (parallel) mode on or off
    fn set_lcd_mode(&mut self, enabled: bool);

    /// Bits per sample
    fn set_bits_per_sample(&mut self, direction: Direction, bits: u8);

    /// Set `CLKM_CONF` and the bit-clock divider for this direction
    fn set_clock_divider(&mut self, direction: Direction, divider: ClockDivider);

    /// Power up the Audio PLL with these settings, or power it down
    fn set_apll(&mut self, config: Option<ApllConfig>);

    /// FIFO configuration
    fn set_fifo(&mut self, direction: Direction, config: FifoConfig);

    /// Channel mode (`CONF_CHAN`). Zero is dual-channel
    fn set_channel_mode(&mut self, direction: Direction, mode: u8);

    /// Stop transmitting when the FIFO runs dry
    fn set_stop_on_empty(&mut self, enabled: bool);

    /// Bypass the PCM codec for this direction
    fn set_pcm_bypass(&mut self, direction: Direction, bypass: bool);

    /// Send (or receive) the right channel first
    fn set_right_first(&mut self, direction: Direction, right_first: bool);

    /// Clear the serial-audio framing options (MSB shift, MSB right, mono,
    /// short sync, timing adjustments) and master/slave mode
    fn clear_serial_options(&mut self, direction: Direction);

    /// Route a peripheral output signal to a GPIO
    fn route_output(&mut self, gpio: u8, signal: Signal);

    /// Route a GPIO to a peripheral input signal
    fn route_input(&mut self, gpio: u8, signal: Signal);
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl Interrupts {
    /// No interrupts
    pub const NONE: Interrupts = Interrupts {
        out_eof: false,
        out_dscr_err: false,
        in_done: false,
    };

    /// What we want while streaming video
    pub const STREAMING: Interrupts = Interrupts {
        out_eof: true,
        out_dscr_err: true,
        in_done: false,
    };

    /// What we want while capturing
    pub const CAPTURE: Interrupts = Interrupts {
        out_eof: false,
        out_dscr_err: false,
        in_done: true,
    };

    /// Is anything set?
    pub const fn any(&self) -> bool {
        self.out_eof || self.out_dscr_err || self.in_done
    }

    /// The bits set in both
    pub const fn intersect(&self, other: Interrupts) -> Interrupts {
        Interrupts {
            out_eof: self.out_eof && other.out_eof,
            out_dscr_err: self.out_dscr_err && other.out_dscr_err,
            in_done: self.in_done && other.in_done,
        }
    }
}

// End of file
