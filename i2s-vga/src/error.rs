//! Error types for the VGA engine.

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

use core::fmt;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Everything that can go wrong in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The requested configuration cannot be built.
    ///
    /// Nothing has been written to the hardware when this is returned.
    Config(ConfigError),
    /// The hardware did not answer within the configured time.
    Timeout(Operation),
    /// An allocation for DMA memory failed.
    OutOfMemory {
        /// How many bytes we asked for
        bytes: usize,
    },
    /// The channel is running, so the ring cannot be swapped or freed.
    Busy,
}

/// Reasons a configuration is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Only one or two descriptors per scan-line are supported.
    DescriptorsPerLine(u8),
    /// We need at least one frame buffer.
    FrameBufferCount(usize),
    /// Parallel mode can do 8 or 16 bits per sample.
    BitWidth(u8),
    /// 8-bit samples only come out right on I2S1.
    BitWidthOnChannel(u8),
    /// The pin map uses a data bit the sample width doesn't have.
    TooManyPins {
        /// Highest data bit in use, plus one
        requested: usize,
        /// How many data bits the sample has
        supported: usize,
    },
    /// The monitors need more colour bits than a sample has.
    TooManyMonitors {
        /// Colour bits needed
        requested: usize,
        /// Colour bits available (the top two are sync)
        available: usize,
    },
    /// The monitor grid is empty, or a tile is bigger than the screen.
    MonitorGrid,
    /// A descriptor can only carry 4092 bytes.
    LineTooLong {
        /// Bytes one descriptor would have to carry
        bytes: usize,
    },
    /// Every descriptor has to carry whole 32-bit words.
    LineAlignment {
        /// Bytes one descriptor would have to carry
        bytes: usize,
    },
    /// The Audio PLL can't make this pixel clock.
    ClockOutOfRange {
        /// The pixel clock requested, in Hz
        requested: u32,
    },
    /// A ring needs at least one descriptor.
    EmptyRing,
    /// The driver was started without a descriptor ring.
    NoRing,
    /// The mode has zero-sized or inconsistent timing.
    Mode,
}

/// The hardware operation that timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    /// Waiting for the FIFO reset to finish
    Reset,
    /// Waiting for the interrupt handler to acknowledge a stop request
    Stop,
    /// Waiting for the end-of-frame interrupt
    VerticalSync,
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl From<ConfigError> for Error {
    fn from(value: ConfigError) -> Self {
        Error::Config(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "invalid configuration: {e}"),
            Error::Timeout(op) => write!(f, "hardware timed out during {op}"),
            Error::OutOfMemory { bytes } => write!(f, "failed to allocate {bytes} bytes"),
            Error::Busy => write!(f, "channel is running"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DescriptorsPerLine(n) => {
                write!(f, "{n} descriptors per line (need 1 or 2)")
            }
            ConfigError::FrameBufferCount(n) => write!(f, "{n} frame buffers"),
            ConfigError::BitWidth(bits) => write!(f, "{bits}-bit samples (need 8 or 16)"),
            ConfigError::BitWidthOnChannel(bits) => {
                write!(f, "{bits}-bit samples are not supported on this channel")
            }
            ConfigError::TooManyPins {
                requested,
                supported,
            } => write!(f, "{requested} data bits on a {supported}-bit channel"),
            ConfigError::TooManyMonitors {
                requested,
                available,
            } => write!(f, "monitors need {requested} colour bits, have {available}"),
            ConfigError::MonitorGrid => write!(f, "bad monitor grid"),
            ConfigError::LineTooLong { bytes } => {
                write!(f, "{bytes} bytes won't fit in one descriptor")
            }
            ConfigError::LineAlignment { bytes } => {
                write!(f, "{bytes} bytes is not a whole number of words")
            }
            ConfigError::ClockOutOfRange { requested } => {
                write!(f, "cannot synthesise a {requested} Hz pixel clock")
            }
            ConfigError::EmptyRing => write!(f, "empty descriptor ring"),
            ConfigError::NoRing => write!(f, "no descriptor ring installed"),
            ConfigError::Mode => write!(f, "bad video timing"),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Reset => "reset",
            Operation::Stop => "stop",
            Operation::VerticalSync => "vertical sync wait",
        };
        f.write_str(s)
    }
}

impl core::error::Error for Error {}

impl core::error::Error for ConfigError {}

// End of file
