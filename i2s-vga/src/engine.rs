//! The VGA engine.
//!
//! [`VgaEngine`] puts a driver, a set of scan-line buffers and a tiling
//! together, starts the video ring, and then hands finished frames to the
//! DMA engine without it ever sending half-drawn memory.
//!
//! With `F` frame buffers there are `F` field chains in the ring. Every chain
//! is kept pointed at the *front* buffer (the last one presented), and the
//! caller draws into the *back* buffer, which no chain points at unless there
//! is only one buffer. Presenting repoints the pixel descriptors of every
//! chain at the buffer just finished, apart from the chain whose pixels the
//! DMA engine has started sending. That field ends with the frame it started
//! with, and its chain is repointed once the engine has moved on to another.
//!
//! With one buffer there is only one chain, and only the descriptor being
//! sent and the one after it (which the engine may already have fetched)
//! are held back.

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
use core::marker::PhantomData;

use embedded_hal::delay::DelayNs;
use fugit::{MicrosDurationU32, NanosDurationU64};

use crate::clock::ApllConfig;
use crate::descriptor::{try_vec, DescriptorRing};
use crate::driver::{ChannelSignals, I2sDriver, PinMap, Timeouts};
use crate::error::{ConfigError, Error, Operation};
use crate::layout::BufferLayout;
use crate::mode::Mode;
use crate::registers::PeripheralRegisters;
use crate::scanline::{FrameBuffer, Geometry, ScanlineBuffers};
use crate::sync::SyncBits;
use crate::tiling::{Canvas, Tiling};
use crate::wait::{spin_until, Timeout};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Everything about the engine that isn't the video mode or the pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    frame_buffers: usize,
    descriptors_per_line: u8,
    monitors_x: usize,
    monitors_y: usize,
    bits_per_monitor: Option<usize>,
    use_interrupt: bool,
    timeouts: Timeouts,
}

/// Where a frame buffer is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameState {
    /// Not in use
    Idle,
    /// The caller is drawing into it
    Rendering,
    /// Drawing has finished, and it is being handed over
    Complete,
    /// The DMA engine is showing it
    Presented,
}

/// A running VGA output.
pub struct VgaEngine<R, D, L>
where
    R: PeripheralRegisters,
    D: DelayNs,
    L: BufferLayout,
{
    // The driver owns the ring, which points into `buffers`. It must be
    // dropped (and so halted) first.
    driver: I2sDriver<R, D>,
    buffers: ScanlineBuffers,
    mode: Mode,
    /// `mode`, at the pixel clock we actually got
    timing: Mode,
    apll: ApllConfig,
    sync: SyncBits,
    tiling: Tiling,
    /// Which frame buffer each field chain shows
    chain_source: Vec<usize>,
    states: Vec<FrameState>,
    /// The back buffer
    current: usize,
    /// The buffer the chains are (being) pointed at
    front: usize,
    /// Pixel descriptors that were too close to the DMA engine to repoint
    deferred: Vec<usize>,
    _layout: PhantomData<L>,
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// How many line times to wait for the DMA engine to get clear of a
/// descriptor we want to change
const SETTLE_LINES: u64 = 4;

/// Extra time allowed on top of two fields when waiting for V-Sync
const VSYNC_MARGIN: MicrosDurationU32 = MicrosDurationU32::millis(1);

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl EngineConfig {
    /// One frame buffer, two descriptors per line, one monitor, with an
    /// interrupt handler and the default timeouts.
    pub const DEFAULT: EngineConfig = EngineConfig {
        frame_buffers: 1,
        descriptors_per_line: 2,
        monitors_x: 1,
        monitors_y: 1,
        bits_per_monitor: None,
        use_interrupt: true,
        timeouts: Timeouts::DEFAULT,
    };

    /// Use `count` frame buffers: 1 for single, 2 for double and 3 for
    /// triple buffering.
    pub const fn with_frame_buffers(mut self, count: usize) -> Self {
        self.frame_buffers = count;
        self
    }

    /// Send each line as one descriptor, or as two (blanking, then pixels)
    pub const fn with_descriptors_per_line(mut self, count: u8) -> Self {
        self.descriptors_per_line = count;
        self
    }

    /// Drive a grid of monitors
    pub const fn with_monitors(mut self, across: usize, down: usize) -> Self {
        self.monitors_x = across;
        self.monitors_y = down;
        self
    }

    /// Give each monitor this many colour bits.
    ///
    /// By default the colour bits are shared out evenly.
    pub const fn with_bits_per_monitor(mut self, bits: usize) -> Self {
        self.bits_per_monitor = Some(bits);
        self
    }

    /// Is there an interrupt handler for the channel?
    pub const fn with_interrupt(mut self, use_interrupt: bool) -> Self {
        self.use_interrupt = use_interrupt;
        self
    }

    /// How long to wait for the hardware
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// How many frame buffers
    pub const fn frame_buffers(&self) -> usize {
        self.frame_buffers
    }

    /// Descriptors per line
    pub const fn descriptors_per_line(&self) -> u8 {
        self.descriptors_per_line
    }

    /// The tiling this configuration gives on `mode`.
    ///
    /// Useful for building the pin map before calling
    /// [`VgaEngine::init`].
    pub fn tiling<L: BufferLayout>(&self, mode: &Mode) -> Result<Tiling, ConfigError> {
        let unit_bits = L::unit_bits();
        let bits = self.bits_per_monitor.unwrap_or_else(|| {
            let monitors = (self.monitors_x * self.monitors_y).max(1);
            ((unit_bits - 2) / monitors).max(1)
        });
        Tiling::compose(
            self.monitors_x,
            self.monitors_y,
            bits,
            usize::from(mode.h_res),
            mode.rows(),
            unit_bits,
        )
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::DEFAULT
    }
}

impl<R, D, L> VgaEngine<R, D, L>
where
    R: PeripheralRegisters,
    D: DelayNs,
    L: BufferLayout,
{
    /// Set everything up and start sending video.
    ///
    /// All the memory is allocated, and the configuration checked, before
    /// any register is written. The caller draws into frame buffer 0 first.
    pub fn init(
        regs: R,
        delay: D,
        signals: &'static ChannelSignals,
        mode: &Mode,
        config: EngineConfig,
        pins: &PinMap,
    ) -> Result<Self, Error> {
        mode.validate()?;
        let count = config.frame_buffers;
        if count == 0 {
            return Err(ConfigError::FrameBufferCount(count).into());
        }
        let tiling = config.tiling::<L>(mode)?;
        let sync = SyncBits::new::<L>(mode);
        let apll = ApllConfig::synthesize(mode.pixel_clock)?;

        let buffers = ScanlineBuffers::allocate::<L>(mode, count, config.descriptors_per_line, &sync)?;
        let front = count - 1;
        let ring = buffers.build_ring(front)?;
        let chain_source = try_vec(count, front)?;
        let mut states = try_vec(count, FrameState::Idle)?;
        states[front] = FrameState::Presented;
        states[0] = FrameState::Rendering;
        // Room for every pixel descriptor, so presenting never allocates
        let pixel_descriptors = count * buffers.geometry().active_lines();
        let mut deferred = Vec::new();
        deferred
            .try_reserve_exact(pixel_descriptors)
            .map_err(|_| Error::OutOfMemory {
                bytes: pixel_descriptors.saturating_mul(core::mem::size_of::<usize>()),
            })?;

        let mut driver = I2sDriver::new(regs, delay, signals)
            .with_timeouts(config.timeouts)
            .with_interrupt(config.use_interrupt);
        driver.configure_parallel_output(pins, mode.pixel_clock, L::WIDTH)?;
        driver.install_ring(ring)?;
        driver.start_streaming()?;

        let mut timing = *mode;
        timing.pixel_clock = apll.pixel_clock();
        info!(
            "VGA {}x{} on {} monitor(s), {} frame buffer(s)",
            mode.h_res,
            mode.v_res,
            tiling.monitors(),
            count
        );

        Ok(VgaEngine {
            driver,
            buffers,
            mode: *mode,
            timing,
            apll,
            sync,
            tiling,
            chain_source,
            states,
            current: 0,
            front,
            deferred,
            _layout: PhantomData,
        })
    }

    /// Hand the back buffer to the DMA engine, and move on to the next one.
    ///
    /// With `wait_for_vsync`, first wait for the start of vertical blanking.
    /// With exactly two frame buffers this then waits one field, so the
    /// buffer handed back is no longer on screen. With three, a field that
    /// was part way through its pixels may keep showing the previous frame
    /// until it ends.
    pub fn present(&mut self, wait_for_vsync: bool) -> Result<(), Error> {
        if wait_for_vsync {
            self.wait_for_vsync()?;
        }
        let count = self.states.len();
        let completed = self.current;
        self.states[completed] = FrameState::Complete;
        if self.front != completed {
            self.states[self.front] = FrameState::Idle;
        }
        self.front = completed;

        for chain in 0..count {
            if self.chain_source[chain] != completed {
                self.chain_source[chain] = completed;
                self.defer_chain(chain);
            }
        }
        self.retry_deferred()?;
        self.publish();
        self.settle()?;

        self.states[completed] = FrameState::Presented;
        self.current = (completed + 1) % count;
        self.states[self.current] = FrameState::Rendering;

        if count == 2 {
            // The chain that was on screen only picks up the change next
            // time round
            let field = self.field_duration();
            self.driver.delay_mut().delay_us(field.ticks());
            self.retry_deferred()?;
            self.publish();
        }
        self.release_back_buffer()?;
        trace!("Presented frame buffer {}", completed);
        Ok(())
    }

    /// Scroll the back buffer by `dy` rows (positive moves the picture down)
    /// and fill the rows that come into view with `colour`.
    ///
    /// Every monitor scrolls within its own tile.
    pub fn scroll(&mut self, dy: i32, colour: u32) -> Result<(), Error> {
        let back = self.current;
        self.retry_deferred()?;
        let stale = self.buffers.frame_mut(back).rotate(dy);
        {
            let mut canvas = self.canvas();
            for row in stale {
                canvas.fill_row(row, colour);
            }
        }
        for chain in 0..self.chain_source.len() {
            if self.chain_source[chain] == back {
                self.defer_chain(chain);
            }
        }
        self.retry_deferred()?;
        self.publish();
        self.settle()
    }

    /// Draw into the back buffer, across all the monitors.
    pub fn canvas(&mut self) -> Canvas<'_, L> {
        Canvas::new(self.buffers.frame_mut(self.current), self.tiling, self.sync)
    }

    /// The back buffer itself, for drawing a scan-line at a time.
    pub fn back_buffer(&mut self) -> &mut FrameBuffer {
        self.buffers.frame_mut(self.current)
    }

    /// Stop the video at the end of the field.
    pub fn stop(&mut self) -> Result<(), Error> {
        self.driver.stop()
    }

    /// Which line of the field the DMA engine is sending, counting from the
    /// start of the front porch.
    pub fn scan_line(&self) -> Option<usize> {
        let index = self.driver.in_flight_descriptor()?;
        Some(self.buffers.geometry().line_of(index))
    }

    /// Which frame buffer is being drawn into
    pub fn current_frame_buffer(&self) -> usize {
        self.current
    }

    /// Where frame buffer `index` is in its life
    pub fn frame_state(&self, index: usize) -> Option<FrameState> {
        self.states.get(index).copied()
    }

    /// The video mode as asked for
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// The Audio PLL settings in use
    pub fn apll(&self) -> ApllConfig {
        self.apll
    }

    /// The monitor layout
    pub fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    /// How long one field really takes
    pub fn field_duration(&self) -> MicrosDurationU32 {
        self.timing.field_duration()
    }

    /// How long one line really takes
    pub fn line_duration(&self) -> NanosDurationU64 {
        self.timing.line_duration()
    }

    /// Fields sent so far (needs the interrupt handler)
    pub fn fields(&self) -> u32 {
        self.driver.signals().fields()
    }

    /// Descriptor errors so far (needs the interrupt handler)
    pub fn descriptor_errors(&self) -> u32 {
        self.driver.signals().descriptor_errors()
    }

    /// Pixel descriptors still waiting to be repointed
    pub fn pending_relinks(&self) -> usize {
        self.deferred.len()
    }

    fn wait_for_vsync(&mut self) -> Result<(), Error> {
        let field = self.field_duration();
        if !self.driver.uses_interrupt() {
            self.driver.delay_mut().delay_us(field.ticks());
            return Ok(());
        }
        let signals = self.driver.signals();
        signals.clear_vsync();
        let limit = Timeout::Bounded(field + field + VSYNC_MARGIN);
        spin_until(self.driver.delay_mut(), limit, || signals.take_vsync()).map_err(|_| {
            warn!("No V-Sync interrupt");
            Error::Timeout(Operation::VerticalSync)
        })
    }

    /// Queue every pixel descriptor of `chain` to be pointed at its source.
    fn defer_chain(&mut self, chain: usize) {
        let geometry = *self.buffers.geometry();
        self.deferred.retain(|&index| geometry.chain_of(index) != chain);
        self.deferred.extend(geometry.pixel_descriptors(chain));
    }

    /// Repoint whatever the DMA engine is clear of right now.
    fn retry_deferred(&mut self) -> Result<(), Error> {
        if self.deferred.is_empty() {
            return Ok(());
        }
        let in_flight = self.driver.in_flight_descriptor();
        match self.driver.ring_mut() {
            Some(ring) => {
                catch_up(&self.buffers, &self.chain_source, &mut self.deferred, ring, in_flight)?
            }
            None => self.deferred.clear(),
        }
        Ok(())
    }

    /// Keep repointing deferred descriptors as the DMA engine gets clear of
    /// them, until `done` says so or `limit` runs out. Returns whether `done`
    /// was reached.
    fn catch_up_until<F>(&mut self, limit: Timeout, mut done: F) -> Result<bool, Error>
    where
        F: FnMut(&ScanlineBuffers, &DescriptorRing, &[usize]) -> bool,
    {
        let buffers = &self.buffers;
        let sources = &self.chain_source;
        let deferred = &mut self.deferred;
        let mut failure = Ok(());
        let result = self.driver.poll_ring(limit, |ring, in_flight| {
            if let Err(e) = catch_up(buffers, sources, deferred, ring, in_flight) {
                failure = Err(e);
                return true;
            }
            ring.publish();
            done(buffers, ring, deferred.as_slice())
        });
        failure?;
        Ok(result.is_ok())
    }

    /// With one chain, give the DMA engine a few lines to get clear of the
    /// deferred descriptors. Anything left over is tried again next time.
    ///
    /// A deferred chain only comes free at the end of its field, so this
    /// does nothing with more than one.
    fn settle(&mut self) -> Result<(), Error> {
        if self.deferred.is_empty() || self.chain_source.len() > 1 {
            return Ok(());
        }
        let ns = self.line_duration().ticks() * SETTLE_LINES;
        let limit = Timeout::Bounded(MicrosDurationU32::from_ticks(ns.div_ceil(1000).max(1) as u32));
        if !self.catch_up_until(limit, |_, _, deferred| deferred.is_empty())? {
            warn!("{} descriptors left to repoint", self.deferred.len());
        }
        Ok(())
    }

    /// Wait for the DMA engine to finish any field still being sent from the
    /// new back buffer, and repoint its chain, before anyone draws into it.
    fn release_back_buffer(&mut self) -> Result<(), Error> {
        let back = self.current;
        if self.chain_source.len() == 1 {
            return Ok(());
        }
        let field = self.field_duration();
        let limit = Timeout::Bounded(field + VSYNC_MARGIN);
        let released = self.catch_up_until(limit, |buffers, ring, deferred| {
            let frame = buffers.frame(back);
            !deferred
                .iter()
                .any(|&index| frame.holds(ring.descriptor(index).buffer_address()))
        })?;
        if !released {
            warn!("Frame buffer {} is still on screen", back);
        }
        Ok(())
    }

    fn publish(&self) {
        if let Some(ring) = self.driver.ring() {
            ring.publish();
        }
    }
}

/// Would the DMA engine notice pixel descriptor `index` changing?
///
/// It may be reading the descriptor it is on, and may already have fetched
/// the next one. When there is more than one chain, a chain that has
/// started on its pixels (or is about to) is left whole until its field
/// ends.
fn is_guarded(
    geometry: &Geometry,
    ring: &DescriptorRing,
    in_flight: Option<usize>,
    index: usize,
) -> bool {
    let Some(current) = in_flight else {
        return false;
    };
    if index == current || index == ring.next_index(current) {
        return true;
    }
    let chains = ring.len() / geometry.chain_len();
    chains > 1
        && geometry.chain_of(index) == geometry.chain_of(current)
        && geometry.line_of(current) + 1 >= geometry.blank_lines()
}

/// Point every deferred descriptor the DMA engine is clear of at its
/// chain's source, deciding from one look at where the engine is.
fn catch_up(
    buffers: &ScanlineBuffers,
    sources: &[usize],
    deferred: &mut Vec<usize>,
    ring: &mut DescriptorRing,
    in_flight: Option<usize>,
) -> Result<(), ConfigError> {
    let geometry = *buffers.geometry();
    let mut failure = Ok(());
    deferred.retain(|&index| {
        if failure.is_err() || is_guarded(&geometry, ring, in_flight, index) {
            return true;
        }
        let source = sources[geometry.chain_of(index)];
        match buffers.point_pixels(ring, index, source) {
            Ok(()) => false,
            Err(e) => {
                failure = Err(e);
                true
            }
        }
    });
    failure
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;
    use crate::driver::InterruptHandler;
    use crate::layout::{Bits16, Bits8};
    use crate::mock::{FakeDelay, FakeRegisters};
    use crate::mode::{MODE_320X240, MODE_640X480};
    use crate::registers::Channel;
    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use core::cell::RefCell;
    use core::ops::Range;

    type Engine<L> = VgaEngine<FakeRegisters, FakeDelay, L>;

    fn signals() -> &'static ChannelSignals {
        Box::leak(Box::new(ChannelSignals::new()))
    }

    fn pins<L: BufferLayout>(config: &EngineConfig, mode: &Mode) -> PinMap {
        let tiling = config.tiling::<L>(mode).unwrap();
        let colour_pins = tiling.monitors() * tiling.bits_per_monitor();
        let data: Vec<u8> = (0..colour_pins as u8).collect();
        tiling.pin_map(&data, 30, 31, Some(32)).unwrap()
    }

    fn start<L: BufferLayout>(hw: &FakeRegisters, mode: &Mode, config: EngineConfig) -> Engine<L> {
        let pins = pins::<L>(&config, mode);
        VgaEngine::init(hw.clone(), FakeDelay::new(hw), signals(), mode, config, &pins).unwrap()
    }

    fn addresses(ring: &DescriptorRing) -> Vec<usize> {
        (0..ring.len())
            .map(|idx| ring.descriptor(idx).buffer_address())
            .collect()
    }

    /// Pretend the DMA engine is sending descriptor `index`
    fn park_at(hw: &FakeRegisters, ring: &DescriptorRing, index: usize) {
        hw.state_mut().position = ring.first_address() + index * core::mem::size_of::<Descriptor>();
    }

    impl<R, D, L> VgaEngine<R, D, L>
    where
        R: PeripheralRegisters,
        D: DelayNs,
        L: BufferLayout,
    {
        fn ring(&self) -> &DescriptorRing {
            self.driver.ring().unwrap()
        }
    }

    #[test]
    fn ring_holds_one_chain_per_frame_buffer() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(2);
        let engine = start::<Bits8>(&hw, &MODE_640X480, config);
        assert_eq!(engine.ring().len(), 525 * 2 * 2);
        let state = hw.state();
        assert!(state.tx_start);
        assert_eq!(state.out_link, Some(engine.ring().first_address()));
        assert_eq!(state.tx_bits, 16);
        assert_eq!(engine.current_frame_buffer(), 0);
        assert_eq!(engine.frame_state(0), Some(FrameState::Rendering));
        assert_eq!(engine.frame_state(1), Some(FrameState::Presented));
    }

    #[test]
    fn double_buffering_toggles() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(2);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
        engine.present(false).unwrap();
        assert_eq!(engine.current_frame_buffer(), 1);
        assert_eq!(engine.frame_state(0), Some(FrameState::Presented));
        assert_eq!(engine.frame_state(1), Some(FrameState::Rendering));
        engine.present(false).unwrap();
        assert_eq!(engine.current_frame_buffer(), 0);
        assert_eq!(engine.frame_state(0), Some(FrameState::Rendering));
        assert_eq!(engine.frame_state(1), Some(FrameState::Presented));
    }

    #[test]
    fn triple_buffering_cycles() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(3);
        let mut engine = start::<Bits8>(&hw, &MODE_320X240, config);
        let mut seen = Vec::new();
        for _ in 0..4 {
            engine.present(false).unwrap();
            seen.push(engine.current_frame_buffer());
        }
        assert_eq!(seen, [1, 2, 0, 1]);
        assert_eq!(engine.frame_state(0), Some(FrameState::Presented));
        assert_eq!(engine.frame_state(2), Some(FrameState::Idle));
    }

    #[test]
    fn only_double_buffering_waits_a_field() {
        for count in 1..=3 {
            let hw = FakeRegisters::new(Channel::I2s1);
            let config = EngineConfig::DEFAULT.with_frame_buffers(count);
            let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
            let before = hw.state().elapsed_ns;
            engine.present(false).unwrap();
            let waited = hw.state().elapsed_ns - before;
            if count == 2 {
                let field = u64::from(engine.field_duration().ticks()) * 1000;
                assert_eq!(waited, field);
            } else {
                assert_eq!(waited, 0, "{count} frame buffers");
            }
        }
    }

    #[test]
    fn present_points_every_chain_at_the_finished_buffer() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(3);
        let mut engine = start::<Bits16>(&hw, &MODE_320X240, config);
        let before = addresses(engine.ring());
        engine.present(false).unwrap();
        let geometry = *engine.buffers.geometry();
        let ring = engine.ring();
        for chain in 0..3 {
            for line in 0..480 {
                let index = geometry.pixel_descriptor(chain, line);
                assert_eq!(
                    ring.descriptor(index).buffer_address(),
                    engine.buffers.frame(0).scanline_address(line / 2)
                );
            }
        }
        // Blanking is never touched
        for (index, address) in before.iter().enumerate() {
            if geometry.row_of(index).is_none() {
                assert_eq!(ring.descriptor(index).buffer_address(), *address);
            }
        }
    }

    #[test]
    fn field_being_sent_keeps_its_frame() {
        for count in 1..=3 {
            let hw = FakeRegisters::new(Channel::I2s1);
            let config = EngineConfig::DEFAULT.with_frame_buffers(count);
            let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
            let geometry = *engine.buffers.geometry();
            park_at(&hw, engine.ring(), geometry.pixel_descriptor(0, 240));
            assert_eq!(engine.scan_line(), Some(285));
            let before = addresses(engine.ring());

            // The DMA engine is frozen, so it never gets out of the field
            engine.present(false).unwrap();
            let ring = engine.ring();
            for index in geometry.pixel_descriptors(0) {
                assert_eq!(
                    ring.descriptor(index).buffer_address(),
                    before[index],
                    "{count} frame buffers"
                );
            }
            let frame = engine.buffers.frame(0);
            for chain in 1..count {
                for line in 0..480 {
                    let index = geometry.pixel_descriptor(chain, line);
                    assert_eq!(ring.descriptor(index).buffer_address(), frame.scanline_address(line));
                }
            }
            let pending = if count == 1 { 0 } else { 480 };
            assert_eq!(engine.pending_relinks(), pending);
        }
    }

    #[test]
    fn single_buffer_leaves_the_descriptor_being_sent() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_descriptors_per_line(1);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
        let geometry = *engine.buffers.geometry();
        let busy = geometry.pixel_descriptor(0, 10);
        park_at(&hw, engine.ring(), busy);
        assert_eq!(engine.scan_line(), Some(55));
        let before = addresses(engine.ring());

        engine.scroll(1, 0).unwrap();
        let ring = engine.ring();
        assert_eq!(ring.descriptor(busy).buffer_address(), before[busy]);
        assert_eq!(ring.descriptor(busy + 1).buffer_address(), before[busy + 1]);
        assert_eq!(
            ring.descriptor(busy + 2).buffer_address(),
            engine.buffers.frame(0).scanline_address(12) - 160
        );
        assert_eq!(engine.pending_relinks(), 2);

        // Once it moves on, the next call catches up
        park_at(&hw, engine.ring(), 0);
        engine.scroll(0, 0).unwrap();
        assert_eq!(engine.pending_relinks(), 0);
        let frame = engine.buffers.frame(0);
        assert_eq!(
            engine.ring().descriptor(busy).buffer_address(),
            frame.scanline_address(10) - 160
        );
    }

    #[test]
    fn deferred_chain_catches_up_once_its_field_ends() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(3);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
        let geometry = *engine.buffers.geometry();
        park_at(&hw, engine.ring(), geometry.pixel_descriptor(0, 100));
        // Half a line per descriptor
        hw.state_mut().ns_per_descriptor = 15_000;
        let before = addresses(engine.ring());
        engine.present(false).unwrap();
        assert_eq!(engine.pending_relinks(), 480);
        for index in geometry.pixel_descriptors(0) {
            assert_eq!(engine.ring().descriptor(index).buffer_address(), before[index]);
        }

        // 800 descriptors on is the top of chain 1
        engine.driver.delay_mut().delay_ms(12);
        assert_eq!(engine.scan_line(), Some(20));
        engine.scroll(0, 0).unwrap();
        assert_eq!(engine.pending_relinks(), 0);
        let frame = engine.buffers.frame(0);
        for chain in 0..3 {
            for line in 0..480 {
                let index = geometry.pixel_descriptor(chain, line);
                assert_eq!(
                    engine.ring().descriptor(index).buffer_address(),
                    frame.scanline_address(line)
                );
            }
        }
    }

    /// What the monitor sees, checked each time fake time moves on.
    struct Screen {
        first: usize,
        geometry: Geometry,
        frames: Vec<Range<usize>>,
        /// The frame buffer being drawn into, if any
        drawing: Option<usize>,
        /// Chain and frame buffer of the field whose pixels are going out
        showing: Option<(usize, usize)>,
        ticks: usize,
    }

    impl Screen {
        fn frame_at(&self, index: usize) -> usize {
            let address = self.first + index * core::mem::size_of::<Descriptor>();
            // SAFETY: the engine, and so the ring, outlives its delay
            let descriptor = unsafe { &*(address as *const Descriptor) };
            let buffer = descriptor.buffer_address();
            self.frames.iter().position(|f| f.contains(&buffer)).unwrap()
        }

        fn tick(&mut self, position: usize) {
            self.ticks += 1;
            let index = (position - self.first) / core::mem::size_of::<Descriptor>();
            let chain = self.geometry.chain_of(index);
            let source = self.frame_at(self.geometry.pixel_descriptor(chain, 0));
            assert!(self
                .geometry
                .pixel_descriptors(chain)
                .all(|pixels| self.frame_at(pixels) == source));
            if let Some(back) = self.drawing {
                assert_ne!(source, back, "drawing into the field on screen");
            }
            let in_pixels = self.geometry.line_of(index) + 1 >= self.geometry.blank_lines();
            if let (true, Some((was_chain, was_source))) = (in_pixels, self.showing) {
                if was_chain == chain {
                    assert_eq!(source, was_source, "field changed frame part way through");
                }
            }
            self.showing = in_pixels.then_some((chain, source));
        }
    }

    #[test]
    fn drawing_never_touches_the_field_on_screen() {
        for count in 1..=3 {
            let hw = FakeRegisters::new(Channel::I2s1);
            let screen: Rc<RefCell<Option<Screen>>> = Rc::new(RefCell::new(None));
            let delay = FakeDelay::new(&hw).with_watch({
                let screen = screen.clone();
                move |state| {
                    if let Some(screen) = screen.borrow_mut().as_mut() {
                        screen.tick(state.position);
                    }
                }
            });
            let config = EngineConfig::DEFAULT.with_frame_buffers(count);
            let pins = pins::<Bits8>(&config, &MODE_320X240);
            let mut engine: Engine<Bits8> =
                VgaEngine::init(hw.clone(), delay, signals(), &MODE_320X240, config, &pins).unwrap();
            let geometry = *engine.buffers.geometry();
            let frames = (0..count)
                .map(|idx| {
                    let start = engine.buffers.frame(idx).scanline_address(0);
                    start..start + geometry.frame_bytes()
                })
                .collect();
            *screen.borrow_mut() = Some(Screen {
                first: engine.ring().first_address(),
                geometry,
                frames,
                drawing: None,
                showing: None,
                ticks: 0,
            });
            hw.state_mut().ns_per_descriptor = 15_000;

            for round in 0..6u32 {
                let back = engine.current_frame_buffer();
                if count > 1 {
                    screen.borrow_mut().as_mut().unwrap().drawing = Some(back);
                }
                engine.canvas().clear(round);
                // Drawing takes a field and a bit
                for _ in 0..40 {
                    engine.driver.delay_mut().delay_us(500);
                }
                screen.borrow_mut().as_mut().unwrap().drawing = None;
                engine.present(false).unwrap();
            }
            let watched = screen.borrow_mut().take().unwrap();
            assert!(watched.ticks >= 240, "{count} frame buffers");
        }
    }

    #[test]
    fn scroll_repoints_every_pixel_descriptor() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, EngineConfig::DEFAULT);
        let before = addresses(engine.ring());
        engine.scroll(1, 0).unwrap();
        let after = addresses(engine.ring());
        let geometry = *engine.buffers.geometry();
        let changed: Vec<usize> = (0..before.len()).filter(|i| before[*i] != after[*i]).collect();
        assert_eq!(changed.len(), 480);
        assert!(changed.iter().all(|i| geometry.row_of(*i).is_some()));
    }

    #[test]
    fn scroll_moves_pixels_and_keeps_sync() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, EngineConfig::DEFAULT);
        engine.canvas().set_pixel(5, 5, 0x15);
        engine.canvas().set_pixel(5, 0, 0x3F);
        engine.scroll(2, 0x2A).unwrap();
        let canvas = engine.canvas();
        assert_eq!(canvas.pixel(5, 7), Some(0x15));
        assert_eq!(canvas.pixel(5, 2), Some(0x3F));
        assert_eq!(canvas.pixel(5, 0), Some(0x2A));
        assert_eq!(canvas.pixel(639, 1), Some(0x2A));
        let unit = Bits8::read(engine.back_buffer().scanline(1), 0);
        assert_eq!(unit, 0xC0 | 0x2A);
    }

    #[test]
    fn scroll_with_double_buffering_leaves_the_ring_alone() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(2);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
        let before = addresses(engine.ring());
        engine.scroll(-3, 0).unwrap();
        assert_eq!(addresses(engine.ring()), before);
    }

    #[test]
    fn bad_configuration_touches_nothing() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_descriptors_per_line(3);
        let pins = pins::<Bits8>(&config, &MODE_640X480);
        let result: Result<Engine<Bits8>, Error> = VgaEngine::init(
            hw.clone(),
            FakeDelay::new(&hw),
            signals(),
            &MODE_640X480,
            config,
            &pins,
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::DescriptorsPerLine(3)))
        ));
        let state = hw.state();
        assert!(state.events.is_empty());
        assert!(!state.module_enabled);
        assert!(state.outputs.is_empty());
    }

    #[test]
    fn out_of_memory_touches_nothing() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(1 << 50);
        let pins = pins::<Bits8>(&EngineConfig::DEFAULT, &MODE_640X480);
        let result: Result<Engine<Bits8>, Error> = VgaEngine::init(
            hw.clone(),
            FakeDelay::new(&hw),
            signals(),
            &MODE_640X480,
            config,
            &pins,
        );
        assert!(matches!(result, Err(Error::OutOfMemory { .. })));
        assert!(hw.state().events.is_empty());
    }

    #[test]
    fn eight_bit_needs_i2s1() {
        let hw = FakeRegisters::new(Channel::I2s0);
        let pins = pins::<Bits8>(&EngineConfig::DEFAULT, &MODE_320X240);
        let result: Result<Engine<Bits8>, Error> = VgaEngine::init(
            hw.clone(),
            FakeDelay::new(&hw),
            signals(),
            &MODE_320X240,
            EngineConfig::DEFAULT,
            &pins,
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::BitWidthOnChannel(8)))
        ));
        assert!(!hw.state().tx_start);
    }

    #[test]
    fn vsync_wait_uses_the_interrupt() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let signals = signals();
        let delay = FakeDelay::new(&hw).with_handler(InterruptHandler::new(hw.clone(), signals));
        let config = EngineConfig::DEFAULT.with_frame_buffers(3);
        let pins = pins::<Bits8>(&config, &MODE_640X480);
        let mut engine: Engine<Bits8> =
            VgaEngine::init(hw.clone(), delay, signals, &MODE_640X480, config, &pins).unwrap();
        hw.state_mut().ns_per_descriptor = 1_000;
        engine.present(true).unwrap();
        assert!(engine.fields() >= 1);
        assert_eq!(engine.descriptor_errors(), 0);
        // The EOF is on the last descriptor of a chain, so the DMA engine is
        // now at the top of a field
        assert!(engine.scan_line().unwrap() < 45);
        engine.stop().unwrap();
        assert!(!hw.state().tx_start);
    }

    #[test]
    fn vsync_wait_times_out_without_interrupts_arriving() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_frame_buffers(3);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
        assert_eq!(
            engine.present(true),
            Err(Error::Timeout(Operation::VerticalSync))
        );
        // Nothing was handed over
        assert_eq!(engine.current_frame_buffer(), 0);
    }

    #[test]
    fn vsync_without_interrupt_waits_a_field() {
        let hw = FakeRegisters::new(Channel::I2s1);
        let config = EngineConfig::DEFAULT.with_interrupt(false);
        let mut engine = start::<Bits8>(&hw, &MODE_640X480, config);
        assert!(!hw.state().interrupt_line);
        engine.present(true).unwrap();
        let field = u64::from(engine.field_duration().ticks()) * 1000;
        assert_eq!(hw.state().elapsed_ns, field);
    }

    #[test]
    fn four_rgb_monitors_on_sixteen_bits() {
        let hw = FakeRegisters::new(Channel::I2s0);
        let config = EngineConfig::DEFAULT.with_monitors(2, 2).with_bits_per_monitor(3);
        let mut engine = start::<Bits16>(&hw, &MODE_320X240, config);
        assert_eq!(engine.tiling().monitors(), 4);
        let mut canvas = engine.canvas();
        assert_eq!((canvas.width(), canvas.height()), (640, 480));
        canvas.clear(0);
        canvas.set_pixel(330, 10, 0b111);
        assert_eq!(canvas.pixel(10, 10), Some(0));
        assert_eq!(canvas.pixel(330, 10), Some(0b111));
        let unit = Bits16::read(engine.back_buffer().scanline(10), 10);
        assert_eq!(unit, 0xC000 | (0b111 << 3));
        assert!(hw.state().outputs.contains(&(30, crate::registers::Signal::Data(14))));
    }

    #[test]
    fn dropping_the_engine_halts_the_hardware() {
        let hw = FakeRegisters::new(Channel::I2s1);
        {
            let _engine = start::<Bits8>(&hw, &MODE_320X240, EngineConfig::DEFAULT.with_interrupt(false));
            assert!(hw.state().tx_start);
        }
        assert!(!hw.state().tx_start);
    }
}

// End of file
