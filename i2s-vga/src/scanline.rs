//! Frame buffers, blanking buffers, and the video descriptor ring.
//!
//! The video ring is made of one *chain* per frame buffer. A chain is a
//! whole field, `lines_per_field` lines of one or two descriptors each, in
//! the order the monitor wants them:
//!
//! ```text
//! | front porch | V-Sync | back porch | active lines ... |
//! ```
//!
//! and the last descriptor of each chain has the EOF flag set, so the
//! end-of-frame interrupt arrives once per field just as vertical blanking
//! starts.
//!
//! Within a line, the horizontal order is front porch, H-Sync, back porch,
//! pixels. With two descriptors per line the first descriptor sends the
//! blanking and the second the pixels; the blanking descriptors point at
//! shared static buffers and are never changed once the ring is built. With
//! one descriptor per line, every frame buffer row carries its own blanking
//! in front of the pixels.
//!
//! Blank lines always point at static buffers. Only the pixel descriptors of
//! active lines ever get pointed at a different frame buffer.

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

use alloc::vec::Vec;
use core::ops::Range;

use crate::descriptor::{try_vec, DescriptorRing, DmaBuffer, MAX_DESCRIPTOR_BYTES};
use crate::error::{ConfigError, Error};
use crate::layout::BufferLayout;
use crate::mode::Mode;
use crate::sync::SyncBits;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Sizes of everything, worked out once from the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Geometry {
    descriptors_per_line: usize,
    unit_bytes: usize,
    blanking_bytes: usize,
    pixel_bytes: usize,
    row_bytes: usize,
    data_offset: usize,
    rows: usize,
    lines_per_field: usize,
    blank_lines: usize,
    v_div: usize,
}

/// One frame buffer.
///
/// The memory holds `rows` scan-lines of `row_bytes` each. A row table maps
/// logical rows onto the rows in memory, so scrolling never moves pixels.
pub struct FrameBuffer {
    memory: DmaBuffer,
    rows: Vec<usize>,
    row_bytes: usize,
    data_offset: usize,
    pixel_bytes: usize,
}

/// Buffers that never change once built.
struct StaticLines {
    /// Horizontal blanking, V-Sync idle then asserted. Only used with two
    /// descriptors per line.
    blanking: Option<[DmaBuffer; 2]>,
    /// The rest of a blank line, V-Sync idle then asserted.
    ///
    /// With one descriptor per line this is the whole line.
    blank: [DmaBuffer; 2],
}

/// All the memory the video ring points at.
pub struct ScanlineBuffers {
    mode: Mode,
    geometry: Geometry,
    frames: Vec<FrameBuffer>,
    statics: StaticLines,
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl Geometry {
    /// Work out the sizes for `mode` with `descriptors_per_line` descriptors
    /// per line, packed per `L`.
    pub fn new<L: BufferLayout>(mode: &Mode, descriptors_per_line: u8) -> Result<Geometry, ConfigError> {
        mode.validate()?;
        let dpl = usize::from(descriptors_per_line);
        if !(1..=2).contains(&dpl) {
            return Err(ConfigError::DescriptorsPerLine(descriptors_per_line));
        }
        let blanking_bytes = L::bytes_for(mode.h_blank());
        let pixel_bytes = L::bytes_for(usize::from(mode.h_res));
        // The pixels have to start on a word in either case
        check_descriptor_bytes(blanking_bytes)?;
        check_descriptor_bytes(pixel_bytes)?;
        let (row_bytes, data_offset) = if dpl == 1 {
            let line = blanking_bytes + pixel_bytes;
            check_descriptor_bytes(line)?;
            (line, blanking_bytes)
        } else {
            (pixel_bytes, 0)
        };
        Ok(Geometry {
            descriptors_per_line: dpl,
            unit_bytes: L::BYTES_PER_UNIT,
            blanking_bytes,
            pixel_bytes,
            row_bytes,
            data_offset,
            rows: mode.rows(),
            lines_per_field: mode.lines_per_field(),
            blank_lines: mode.blank_lines(),
            v_div: usize::from(mode.v_div),
        })
    }

    /// Descriptors per line (1 or 2)
    pub const fn descriptors_per_line(&self) -> usize {
        self.descriptors_per_line
    }

    /// Descriptors in one field chain
    pub const fn chain_len(&self) -> usize {
        self.lines_per_field * self.descriptors_per_line
    }

    /// Bytes per rendering unit
    pub const fn unit_bytes(&self) -> usize {
        self.unit_bytes
    }

    /// Bytes in one frame buffer row
    pub const fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Bytes of pixels in one row
    pub const fn pixel_bytes(&self) -> usize {
        self.pixel_bytes
    }

    /// Frame buffer rows
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Bytes in one frame buffer
    pub const fn frame_bytes(&self) -> usize {
        self.rows * self.row_bytes
    }

    /// The descriptor that sends the pixels of active line `active_line` in
    /// chain `chain`.
    pub const fn pixel_descriptor(&self, chain: usize, active_line: usize) -> usize {
        chain * self.chain_len()
            + (self.blank_lines + active_line) * self.descriptors_per_line
            + self.descriptors_per_line
            - 1
    }

    /// Lines of vertical blanking at the top of each chain
    pub const fn blank_lines(&self) -> usize {
        self.blank_lines
    }

    /// Lines per field that carry pixels
    pub const fn active_lines(&self) -> usize {
        self.lines_per_field - self.blank_lines
    }

    /// The pixel descriptors of chain `chain`, top to bottom.
    pub fn pixel_descriptors(&self, chain: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.active_lines()).map(move |line| self.pixel_descriptor(chain, line))
    }

    /// Which chain descriptor `index` belongs to
    pub const fn chain_of(&self, index: usize) -> usize {
        index / self.chain_len()
    }

    /// Which line of the field descriptor `index` sends
    pub const fn line_of(&self, index: usize) -> usize {
        (index % self.chain_len()) / self.descriptors_per_line
    }

    /// Which frame buffer row descriptor `index` sends, if it is a pixel
    /// descriptor.
    pub const fn row_of(&self, index: usize) -> Option<usize> {
        let within = index % self.chain_len();
        let line = within / self.descriptors_per_line;
        let last = within % self.descriptors_per_line == self.descriptors_per_line - 1;
        if last && line >= self.blank_lines {
            Some((line - self.blank_lines) / self.v_div)
        } else {
            None
        }
    }
}

fn check_descriptor_bytes(bytes: usize) -> Result<(), ConfigError> {
    if bytes % 4 != 0 {
        return Err(ConfigError::LineAlignment { bytes });
    }
    if bytes > MAX_DESCRIPTOR_BYTES {
        return Err(ConfigError::LineTooLong { bytes });
    }
    Ok(())
}

/// Write the horizontal blanking for one line into `line`.
fn write_blanking<L: BufferLayout>(line: &mut [u8], mode: &Mode, sync: &SyncBits, vsync: bool) {
    let pulse = usize::from(mode.h_front)..usize::from(mode.h_front + mode.h_sync);
    for x in 0..mode.h_blank() {
        L::write(line, x, sync.unit(pulse.contains(&x), vsync));
    }
}

impl FrameBuffer {
    fn new<L: BufferLayout>(geometry: &Geometry, mode: &Mode, sync: &SyncBits) -> Result<FrameBuffer, Error> {
        let mut memory = DmaBuffer::new(geometry.frame_bytes(), sync.word(false, false))?;
        if geometry.data_offset != 0 {
            for row in memory.as_mut_bytes().chunks_exact_mut(geometry.row_bytes) {
                write_blanking::<L>(row, mode, sync, false);
            }
        }
        let mut rows = try_vec(geometry.rows, 0usize)?;
        for (idx, row) in rows.iter_mut().enumerate() {
            *row = idx;
        }
        Ok(FrameBuffer {
            memory,
            rows,
            row_bytes: geometry.row_bytes,
            data_offset: geometry.data_offset,
            pixel_bytes: geometry.pixel_bytes,
        })
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Bytes of pixels in one row
    pub fn pixel_bytes(&self) -> usize {
        self.pixel_bytes
    }

    /// The pixels of logical row `row`
    pub fn scanline(&self, row: usize) -> &[u8] {
        let start = self.rows[row] * self.row_bytes + self.data_offset;
        &self.memory.as_bytes()[start..start + self.pixel_bytes]
    }

    /// The pixels of logical row `row`, to draw into
    pub fn scanline_mut(&mut self, row: usize) -> &mut [u8] {
        let start = self.rows[row] * self.row_bytes + self.data_offset;
        &mut self.memory.as_mut_bytes()[start..start + self.pixel_bytes]
    }

    /// Address of the first pixel of logical row `row`
    pub fn scanline_address(&self, row: usize) -> usize {
        self.scanline(row).as_ptr() as usize
    }

    /// Does `address` fall inside this frame buffer?
    pub fn holds(&self, address: usize) -> bool {
        let start = self.memory.address();
        (start..start + self.memory.len()).contains(&address)
    }

    /// What the pixel descriptor for logical row `row` sends. With one
    /// descriptor per line this includes the blanking.
    fn dma_line(&self, row: usize) -> &[u8] {
        let start = self.rows[row] * self.row_bytes;
        &self.memory.as_bytes()[start..start + self.row_bytes]
    }

    /// Rotate the row table by `dy` rows (positive moves the picture down).
    ///
    /// Returns the logical rows that now hold stale content.
    pub fn rotate(&mut self, dy: i32) -> Range<usize> {
        let rows = self.rows.len();
        let shift = dy.unsigned_abs() as usize;
        if shift >= rows {
            return 0..rows;
        }
        if dy > 0 {
            self.rows.rotate_right(shift);
            0..shift
        } else {
            self.rows.rotate_left(shift);
            rows - shift..rows
        }
    }

    /// Set every pixel of logical row `row` to `unit`.
    pub fn fill_row<L: BufferLayout>(&mut self, row: usize, unit: u32) {
        let line = self.scanline_mut(row);
        let units = line.len() / L::BYTES_PER_UNIT;
        for x in 0..units {
            L::write(line, x, unit);
        }
    }
}

impl ScanlineBuffers {
    /// Allocate `frame_buffers` frame buffers and the static blanking
    /// buffers for `mode`.
    ///
    /// On failure everything allocated so far is freed again.
    pub fn allocate<L: BufferLayout>(
        mode: &Mode,
        frame_buffers: usize,
        descriptors_per_line: u8,
        sync: &SyncBits,
    ) -> Result<ScanlineBuffers, Error> {
        let geometry = Geometry::new::<L>(mode, descriptors_per_line)?;
        if frame_buffers == 0 {
            return Err(ConfigError::FrameBufferCount(frame_buffers).into());
        }

        let statics = if geometry.descriptors_per_line == 2 {
            let mut blanking = [
                DmaBuffer::new(geometry.blanking_bytes, 0)?,
                DmaBuffer::new(geometry.blanking_bytes, 0)?,
            ];
            write_blanking::<L>(blanking[0].as_mut_bytes(), mode, sync, false);
            write_blanking::<L>(blanking[1].as_mut_bytes(), mode, sync, true);
            StaticLines {
                blanking: Some(blanking),
                blank: [
                    DmaBuffer::new(geometry.pixel_bytes, sync.word(false, false))?,
                    DmaBuffer::new(geometry.pixel_bytes, sync.word(false, true))?,
                ],
            }
        } else {
            let mut blank = [
                DmaBuffer::new(geometry.row_bytes, sync.word(false, false))?,
                DmaBuffer::new(geometry.row_bytes, sync.word(false, true))?,
            ];
            write_blanking::<L>(blank[0].as_mut_bytes(), mode, sync, false);
            write_blanking::<L>(blank[1].as_mut_bytes(), mode, sync, true);
            StaticLines {
                blanking: None,
                blank,
            }
        };

        let mut frames = Vec::new();
        frames
            .try_reserve_exact(frame_buffers)
            .map_err(|_| Error::OutOfMemory {
                bytes: frame_buffers.saturating_mul(core::mem::size_of::<FrameBuffer>()),
            })?;
        for _ in 0..frame_buffers {
            frames.push(FrameBuffer::new::<L>(&geometry, mode, sync)?);
        }

        debug!(
            "Allocated {} frame buffers of {} bytes",
            frame_buffers,
            geometry.frame_bytes()
        );
        Ok(ScanlineBuffers {
            mode: *mode,
            geometry,
            frames,
            statics,
        })
    }

    /// Sizes and descriptor numbering
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// How many frame buffers there are
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// One frame buffer
    pub fn frame(&self, index: usize) -> &FrameBuffer {
        &self.frames[index]
    }

    /// One frame buffer, to draw into
    pub fn frame_mut(&mut self, index: usize) -> &mut FrameBuffer {
        &mut self.frames[index]
    }

    /// Build the video ring, with every chain showing frame buffer `source`.
    ///
    /// The ring points into `self`, which must outlive it.
    pub fn build_ring(&self, source: usize) -> Result<DescriptorRing, Error> {
        let geometry = &self.geometry;
        let chains = self.frames.len();
        let mut ring = DescriptorRing::new(chains * geometry.chain_len())?;
        for chain in 0..chains {
            let base = chain * geometry.chain_len();
            for line in 0..geometry.lines_per_field {
                let first = base + line * geometry.descriptors_per_line;
                let vsync = self.mode.is_vsync_line(line);
                if let Some(blanking) = &self.statics.blanking {
                    // Active lines never have V-Sync
                    ring.point(first, blanking[usize::from(vsync)].as_bytes())?;
                }
                if line < geometry.blank_lines {
                    let last = first + geometry.descriptors_per_line - 1;
                    ring.point(last, self.statics.blank[usize::from(vsync)].as_bytes())?;
                } else {
                    self.point_pixels(&mut ring, first + geometry.descriptors_per_line - 1, source)?;
                }
            }
            ring.set_eof(base + geometry.chain_len() - 1, true);
        }
        ring.publish();
        Ok(ring)
    }

    /// Point pixel descriptor `index` at the matching row of frame buffer
    /// `source`. Blanking descriptors are left alone.
    pub fn point_pixels(
        &self,
        ring: &mut DescriptorRing,
        index: usize,
        source: usize,
    ) -> Result<(), ConfigError> {
        match self.geometry.row_of(index) {
            Some(row) => ring.point(index, self.frames[source].dma_line(row)),
            None => Ok(()),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
