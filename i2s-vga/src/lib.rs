//! # VGA scan-line engine for the ESP32 I2S peripheral.
//!
//! The I2S peripheral, in its parallel "LCD" mode, clocks out one 8-bit or
//! 16-bit sample per pixel clock, straight from memory, using a circular
//! chain of DMA descriptors. Two bits of every sample are H-Sync and V-Sync;
//! the rest are colour bits. Once the ring is running the CPU is not involved
//! until it wants to present a new frame.
//!
//! The crate is arranged in layers:
//!
//! * [`driver`] owns the peripheral, through the [`PeripheralRegisters`]
//!   trait, and does reset, configuration, start and stop.
//! * [`clock`] finds Audio PLL settings for a pixel clock.
//! * [`descriptor`] and [`scanline`] allocate the DMA descriptors, frame
//!   buffers and the static blanking buffers.
//! * [`engine`] ties it all together and implements the swap protocol for
//!   single, double and triple buffering, plus vertical scrolling and
//!   multi-monitor tiling (see [`tiling`]).

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

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// -----------------------------------------------------------------------------
// Sub-modules
// -----------------------------------------------------------------------------

// Must come first so the log macros are visible everywhere else.
#[macro_use]
mod fmt;

pub mod clock;
pub mod descriptor;
pub mod driver;
pub mod engine;
pub mod error;
#[cfg(feature = "esp32")]
pub mod esp32;
pub mod layout;
pub mod mode;
pub mod registers;
pub mod scanline;
pub mod sync;
pub mod tiling;
pub mod wait;

#[cfg(test)]
mod mock;

// -----------------------------------------------------------------------------
// Imports
// -----------------------------------------------------------------------------

pub use clock::ApllConfig;
pub use descriptor::{Descriptor, DescriptorRing};
pub use driver::{BitWidth, ChannelSignals, I2sDriver, InterruptHandler, PinMap, Timeouts};
pub use engine::{EngineConfig, FrameState, VgaEngine};
pub use error::{ConfigError, Error, Operation};
pub use layout::{BufferLayout, Bits16, Bits8};
pub use mode::{Mode, SyncPolarity};
pub use registers::{Channel, PeripheralRegisters};
pub use scanline::{FrameBuffer, ScanlineBuffers};
pub use sync::SyncBits;
pub use tiling::{Canvas, Tiling};
pub use wait::Timeout;

// End of file
