//! How pixels are packed into DMA memory.
//!
//! The I2S FIFO, in mode 1, takes 32-bit words from memory and sends the
//! upper half-word first. So with 16-bit samples, pixel `x` lives at
//! half-word `x ^ 1`; with 8-bit samples on I2S1 it lives at byte `x ^ 2`.
//! A [`BufferLayout`] hides that from everything else.

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

use crate::driver::BitWidth;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Packing of rendering units (one per pixel) into memory.
pub trait BufferLayout {
    /// Bytes per rendering unit
    const BYTES_PER_UNIT: usize;

    /// Sample width on the wire
    const WIDTH: BitWidth;

    /// Multiplying a unit value by this copies it into every unit of a word
    const REPLICATE: u32;

    /// Where in the line (in units) pixel `x` is stored
    fn position(x: usize) -> usize;

    /// Read the unit for pixel `x`
    fn read(line: &[u8], x: usize) -> u32;

    /// Write the unit for pixel `x`. Bits beyond the unit width are dropped.
    fn write(line: &mut [u8], x: usize, value: u32);

    /// Bits per rendering unit
    fn unit_bits() -> usize {
        Self::BYTES_PER_UNIT * 8
    }

    /// How many bytes `units` rendering units take up
    fn bytes_for(units: usize) -> usize {
        units * Self::BYTES_PER_UNIT
    }
}

/// One byte per pixel: six colour bits, H-Sync on bit 6, V-Sync on bit 7.
///
/// Only works on I2S1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bits8;

/// Two bytes per pixel: fourteen colour bits, H-Sync on bit 14, V-Sync on
/// bit 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bits16;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl BufferLayout for Bits8 {
    const BYTES_PER_UNIT: usize = 1;
    const WIDTH: BitWidth = BitWidth::Eight;
    const REPLICATE: u32 = 0x0101_0101;

    fn position(x: usize) -> usize {
        x ^ 2
    }

    fn read(line: &[u8], x: usize) -> u32 {
        u32::from(line[Self::position(x)])
    }

    fn write(line: &mut [u8], x: usize, value: u32) {
        line[Self::position(x)] = value as u8;
    }
}

impl BufferLayout for Bits16 {
    const BYTES_PER_UNIT: usize = 2;
    const WIDTH: BitWidth = BitWidth::Sixteen;
    const REPLICATE: u32 = 0x0001_0001;

    fn position(x: usize) -> usize {
        x ^ 1
    }

    fn read(line: &[u8], x: usize) -> u32 {
        let offset = Self::position(x) * 2;
        u32::from(u16::from_le_bytes([line[offset], line[offset + 1]]))
    }

    fn write(line: &mut [u8], x: usize, value: u32) {
        let offset = Self::position(x) * 2;
        line[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
