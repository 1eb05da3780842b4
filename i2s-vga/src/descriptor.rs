//! DMA descriptors and the rings they live in.
//!
//! The I2S DMA engine follows a linked list of descriptors, each pointing at
//! a buffer in RAM. Our lists are always closed into a ring, so the engine
//! runs forever once started. The ring topology is fixed when the ring is
//! built; after that only the buffer pointer and length of a descriptor ever
//! change.

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

use alloc::{boxed::Box, vec::Vec};
use core::sync::atomic::{compiler_fence, fence, Ordering};

use bitfield::bitfield;
use byte_slice_cast::{AsByteSlice, AsMutByteSlice};

use crate::error::{ConfigError, Error};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

bitfield! {
    /// The first word of a descriptor.
    ///
    /// * Bits 11:0 - buffer size, in bytes
    /// * Bits 23:12 - valid bytes in the buffer
    /// * Bits 28:24 - offset (unused)
    /// * Bit 29 - start of sub-frame
    /// * Bit 30 - end of frame; raises `out_eof` when finished
    /// * Bit 31 - owner; set means the DMA engine may use it
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct DescriptorHeader(u32);
    impl Debug;
    pub u16, size, set_size: 11, 0;
    pub u16, length, set_length: 23, 12;
    pub u8, offset, set_offset: 28, 24;
    pub sosf, set_sosf: 29;
    pub eof, set_eof: 30;
    pub owner, set_owner: 31;
}

#[cfg(feature = "defmt")]
impl defmt::Format for DescriptorHeader {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "DescriptorHeader({=u32:#x})", self.0)
    }
}

/// A DMA descriptor, in the layout the ESP32 DMA engine reads.
///
/// On the ESP32 this is three 32-bit words. On a 64-bit host (where the unit
/// tests run) the pointers are wider, but nothing on the host reads it as
/// raw words.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(4))]
pub struct Descriptor {
    header: DescriptorHeader,
    buffer: *const u8,
    next: *const Descriptor,
}

/// A block of word-aligned DMA-capable memory.
///
/// This is always allocated from the global heap, which on the ESP32 must be
/// internal SRAM for the DMA engine to reach it.
pub struct DmaBuffer {
    words: Box<[u32]>,
    bytes: usize,
}

/// A circular chain of descriptors, held in one allocation and addressed by
/// index.
///
/// A ring either owns a buffer per descriptor (see
/// [`DescriptorRing::allocate`]) or has its descriptors pointed at memory
/// somebody else owns (see [`DescriptorRing::new`] and
/// [`DescriptorRing::point`]). In the second case the owner of that memory
/// must keep it alive, and stop the DMA engine, before it goes away.
pub struct DescriptorRing {
    descriptors: Box<[Descriptor]>,
    buffers: Vec<DmaBuffer>,
    bytes_per_sample: usize,
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// The most a single descriptor can carry.
///
/// The length field is 12 bits, and the engine wants whole words.
pub const MAX_DESCRIPTOR_BYTES: usize = 4092;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Allocate a vector of `count` copies of `value`, without panicking if the
/// heap is full.
pub(crate) fn try_vec<T: Clone>(count: usize, value: T) -> Result<Vec<T>, Error> {
    let mut v = Vec::new();
    v.try_reserve_exact(count).map_err(|_| Error::OutOfMemory {
        bytes: count.saturating_mul(core::mem::size_of::<T>()),
    })?;
    v.resize(count, value);
    Ok(v)
}

impl Descriptor {
    /// A descriptor pointing nowhere, owned by the CPU
    pub const EMPTY: Descriptor = Descriptor {
        header: DescriptorHeader(0),
        buffer: core::ptr::null(),
        next: core::ptr::null(),
    };

    /// The header word
    pub fn header(&self) -> DescriptorHeader {
        self.header
    }

    /// Number of valid bytes in the buffer
    pub fn length(&self) -> usize {
        usize::from(self.header.length())
    }

    /// Is the end-of-frame flag set?
    pub fn is_eof(&self) -> bool {
        self.header.eof()
    }

    /// Address of the buffer
    pub fn buffer_address(&self) -> usize {
        self.buffer as usize
    }

    /// Address of the next descriptor
    pub fn next_address(&self) -> usize {
        self.next as usize
    }

    /// Point this descriptor at a buffer.
    ///
    /// The pointer goes in first and the header (length and owner) second,
    /// both volatile, so the engine never sees a length for the wrong buffer
    /// stick around longer than one descriptor fetch.
    fn set_buffer(&mut self, buffer: *const u8, bytes: usize) {
        let mut header = self.header;
        header.set_size(bytes as u16);
        header.set_length(bytes as u16);
        header.set_offset(0);
        header.set_sosf(true);
        header.set_owner(true);
        // SAFETY: both are plain aligned fields of `self`
        unsafe {
            core::ptr::write_volatile(&mut self.buffer, buffer);
            compiler_fence(Ordering::SeqCst);
            core::ptr::write_volatile(&mut self.header, header);
        }
    }

    fn set_eof_flag(&mut self, eof: bool) {
        let mut header = self.header;
        header.set_eof(eof);
        // SAFETY: plain aligned field of `self`
        unsafe { core::ptr::write_volatile(&mut self.header, header) };
    }
}

impl DmaBuffer {
    /// Allocate a buffer of `bytes` bytes, filled with `fill`.
    ///
    /// The buffer is rounded up to a whole number of words, but only `bytes`
    /// are visible.
    pub fn new(bytes: usize, fill: u32) -> Result<DmaBuffer, Error> {
        let words = bytes.div_ceil(4);
        let words = try_vec(words, fill)?.into_boxed_slice();
        Ok(DmaBuffer { words, bytes })
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes
    }

    /// Is this buffer zero bytes long?
    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// The buffer, as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.words.as_byte_slice()[..self.bytes]
    }

    /// The buffer, as mutable bytes
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.words.as_mut_byte_slice()[..self.bytes]
    }

    /// The address of the first byte
    pub fn address(&self) -> usize {
        self.words.as_ptr() as usize
    }
}

impl DescriptorRing {
    /// Make a ring of `count` descriptors that point nowhere yet.
    ///
    /// Descriptor `i` links to `i + 1`, and the last links back to the first.
    pub fn new(count: usize) -> Result<DescriptorRing, Error> {
        if count == 0 {
            return Err(ConfigError::EmptyRing.into());
        }
        let descriptors = try_vec(count, Descriptor::EMPTY)?.into_boxed_slice();
        let mut ring = DescriptorRing {
            descriptors,
            buffers: Vec::new(),
            bytes_per_sample: 1,
        };
        // The boxed slice never moves again, so these addresses stay valid
        let base = ring.descriptors.as_ptr();
        for (idx, descriptor) in ring.descriptors.iter_mut().enumerate() {
            let next = (idx + 1) % count;
            // SAFETY: `next` is in bounds
            descriptor.next = unsafe { base.add(next) };
        }
        Ok(ring)
    }

    /// Make a ring of `count` descriptors, each with its own zeroed buffer of
    /// `bytes_per_buffer` bytes.
    ///
    /// Nothing is touched on failure; everything allocated so far is freed.
    pub fn allocate(
        count: usize,
        bytes_per_buffer: usize,
        bytes_per_sample: usize,
    ) -> Result<DescriptorRing, Error> {
        if bytes_per_buffer > MAX_DESCRIPTOR_BYTES {
            return Err(ConfigError::LineTooLong {
                bytes: bytes_per_buffer,
            }
            .into());
        }
        let mut ring = DescriptorRing::new(count)?;
        ring.bytes_per_sample = bytes_per_sample.max(1);
        ring.buffers.try_reserve_exact(count).map_err(|_| Error::OutOfMemory {
            bytes: count * core::mem::size_of::<DmaBuffer>(),
        })?;
        for _ in 0..count {
            ring.buffers.push(DmaBuffer::new(bytes_per_buffer, 0)?);
        }
        for idx in 0..count {
            let buffer = &ring.buffers[idx];
            let (ptr, len) = (buffer.as_bytes().as_ptr(), buffer.len());
            ring.descriptors[idx].set_buffer(ptr, len);
        }
        debug!("Allocated ring of {} x {} bytes", count, bytes_per_buffer);
        Ok(ring)
    }

    /// How many descriptors are in the ring
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Rings are never empty, but clippy likes this to exist
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Look at one descriptor
    pub fn descriptor(&self, index: usize) -> &Descriptor {
        &self.descriptors[index]
    }

    /// The address the DMA engine should be started at
    pub fn first_address(&self) -> usize {
        self.descriptors.as_ptr() as usize
    }

    /// Convert a descriptor address (as reported by the DMA engine) into an
    /// index, if it's one of ours.
    pub fn index_of(&self, address: usize) -> Option<usize> {
        let size = core::mem::size_of::<Descriptor>();
        let offset = address.checked_sub(self.first_address())?;
        let index = offset / size;
        if offset % size == 0 && index < self.len() {
            Some(index)
        } else {
            None
        }
    }

    /// Which descriptor follows `index`, according to its link.
    pub fn next_index(&self, index: usize) -> usize {
        // Every link was made by `new`, so this always lands in the ring
        self.index_of(self.descriptors[index].next_address())
            .unwrap_or(0)
    }

    /// Point descriptor `index` at some memory.
    ///
    /// The memory is not borrowed beyond this call. Whoever owns it has to
    /// keep it alive for as long as the DMA engine might read it.
    pub fn point(&mut self, index: usize, buffer: &[u8]) -> Result<(), ConfigError> {
        if buffer.len() > MAX_DESCRIPTOR_BYTES {
            return Err(ConfigError::LineTooLong {
                bytes: buffer.len(),
            });
        }
        self.descriptors[index].set_buffer(buffer.as_ptr(), buffer.len());
        Ok(())
    }

    /// Set or clear the end-of-frame flag on descriptor `index`
    pub fn set_eof(&mut self, index: usize, eof: bool) {
        self.descriptors[index].set_eof_flag(eof);
    }

    /// Make sure all the descriptor writes so far are visible before
    /// anything that follows.
    pub fn publish(&self) {
        fence(Ordering::Release);
    }

    /// How many samples descriptor `index` carries
    pub fn sample_count(&self, index: usize) -> usize {
        self.descriptors[index].length() / self.bytes_per_sample
    }

    /// The buffer this ring owns for descriptor `index`, if it owns any.
    pub fn buffer(&self, index: usize) -> Option<&DmaBuffer> {
        self.buffers.get(index)
    }

    /// As [`DescriptorRing::buffer`], but mutable
    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut DmaBuffer> {
        self.buffers.get_mut(index)
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
