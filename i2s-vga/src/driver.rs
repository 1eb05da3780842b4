//! The I2S peripheral driver.
//!
//! [`I2sDriver`] owns one I2S channel. It knows how to reset it, how to set
//! it up for parallel output (video) or parallel input (capture), how to
//! start the DMA engine on a descriptor ring, and how to stop it again.
//!
//! Stopping is a handshake with the interrupt handler: the driver raises a
//! flag in [`ChannelSignals`], and the [`InterruptHandler`] clears it at the
//! next interrupt, which for video is the end of the current field. Only
//! then is the channel halted, so the monitor never sees half a field.

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

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embedded_hal::delay::DelayNs;
use fugit::{HertzU32, MicrosDurationU32};

use crate::clock::{ApllConfig, INPUT_DIVIDER, OUTPUT_DIVIDER};
use crate::descriptor::DescriptorRing;
use crate::error::{ConfigError, Error, Operation};
use crate::registers::{
    Channel, Direction, FifoConfig, Interrupts, PeripheralRegisters, ResetGroup, Signal,
};
use crate::wait::{spin_until, Elapsed, Timeout};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Width of one parallel sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitWidth {
    Eight,
    Sixteen,
}

/// Which GPIO carries which parallel signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinMap {
    data: [Option<u8>; MAX_PARALLEL_BITS],
    clock: Option<u8>,
    word_select: Option<u8>,
}

/// How long the driver waits for the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeouts {
    /// Waiting for the FIFOs to come out of reset
    pub reset: Timeout,
    /// Waiting for the interrupt handler to acknowledge a stop
    pub stop: Timeout,
}

/// Flags shared between the driver and the interrupt handler.
///
/// Put one of these in a `static` for each channel in use.
#[derive(Debug)]
pub struct ChannelSignals {
    /// Set by `stop()`, cleared by the interrupt handler
    stop_requested: AtomicBool,
    /// Set by the interrupt handler at the end of each field
    vsync_passed: AtomicBool,
    /// How many fields have been sent
    fields: AtomicU32,
    /// How many descriptor errors the DMA engine has reported
    descriptor_errors: AtomicU32,
}

/// The part of the driver that runs in interrupt context.
///
/// It only reads and clears interrupt status and updates
/// [`ChannelSignals`]. It never touches the descriptor ring.
pub struct InterruptHandler<R> {
    regs: R,
    signals: &'static ChannelSignals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Idle,
    Streaming,
    Capturing,
}

/// Owns and drives one I2S channel.
pub struct I2sDriver<R: PeripheralRegisters, D: DelayNs> {
    regs: R,
    delay: D,
    signals: &'static ChannelSignals,
    timeouts: Timeouts,
    use_interrupt: bool,
    ring: Option<DescriptorRing>,
    state: State,
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// The I2S block has 24 parallel data lines
pub const MAX_PARALLEL_BITS: usize = 24;

/// The sample width used on the wire in parallel mode
const SAMPLE_BITS: u8 = 16;

/// FIFO setup shared by both directions
const FIFO_CONFIG: FifoConfig = FifoConfig {
    mode: 1,
    data_num: 32,
    force_mode: true,
    dma: true,
};

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl BitWidth {
    /// Convert a bit count
    pub fn from_bits(bits: u8) -> Result<BitWidth, ConfigError> {
        match bits {
            8 => Ok(BitWidth::Eight),
            16 => Ok(BitWidth::Sixteen),
            _ => Err(ConfigError::BitWidth(bits)),
        }
    }

    /// How many bits wide
    pub const fn bits(&self) -> u8 {
        match self {
            BitWidth::Eight => 8,
            BitWidth::Sixteen => 16,
        }
    }
}

impl PinMap {
    /// A pin map with nothing connected
    pub const fn new() -> PinMap {
        PinMap {
            data: [None; MAX_PARALLEL_BITS],
            clock: None,
            word_select: None,
        }
    }

    /// Connect data bit `bit` to `gpio`
    pub fn with_data(mut self, bit: usize, gpio: u8) -> Result<PinMap, ConfigError> {
        let slot = self.data.get_mut(bit).ok_or(ConfigError::TooManyPins {
            requested: bit + 1,
            supported: MAX_PARALLEL_BITS,
        })?;
        *slot = Some(gpio);
        Ok(self)
    }

    /// Output the pixel clock on `gpio`
    pub const fn with_clock(mut self, gpio: u8) -> PinMap {
        self.clock = Some(gpio);
        self
    }

    /// Output the word-select strobe on `gpio`
    pub const fn with_word_select(mut self, gpio: u8) -> PinMap {
        self.word_select = Some(gpio);
        self
    }

    /// Which GPIO carries data bit `bit`
    pub fn data(&self, bit: usize) -> Option<u8> {
        self.data.get(bit).copied().flatten()
    }

    /// The highest data bit in use, plus one
    pub fn data_bits_used(&self) -> usize {
        self.data
            .iter()
            .rposition(|pin| pin.is_some())
            .map_or(0, |idx| idx + 1)
    }

    /// The pixel clock pin
    pub fn clock(&self) -> Option<u8> {
        self.clock
    }

    /// The word-select pin
    pub fn word_select(&self) -> Option<u8> {
        self.word_select
    }

    fn data_pins(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(bit, pin)| pin.map(|gpio| (gpio, bit as u8)))
    }
}

impl Default for PinMap {
    fn default() -> Self {
        PinMap::new()
    }
}

impl Timeouts {
    /// The defaults: 10 ms for a reset, 100 ms for a stop
    pub const DEFAULT: Timeouts = Timeouts {
        reset: Timeout::Bounded(MicrosDurationU32::millis(10)),
        stop: Timeout::Bounded(MicrosDurationU32::millis(100)),
    };
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts::DEFAULT
    }
}

impl ChannelSignals {
    /// Make a new set of flags, all clear
    pub const fn new() -> ChannelSignals {
        ChannelSignals {
            stop_requested: AtomicBool::new(false),
            vsync_passed: AtomicBool::new(false),
            fields: AtomicU32::new(0),
            descriptor_errors: AtomicU32::new(0),
        }
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    fn cancel_stop(&self) {
        self.stop_requested.store(false, Ordering::Release);
    }

    /// Is a stop waiting to be acknowledged?
    pub fn stop_pending(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Forget any end-of-field seen so far
    pub fn clear_vsync(&self) {
        self.vsync_passed.store(false, Ordering::Release);
    }

    /// Has a field ended since the last call? Clears the flag.
    pub fn take_vsync(&self) -> bool {
        self.vsync_passed.swap(false, Ordering::AcqRel)
    }

    /// How many fields have been sent
    pub fn fields(&self) -> u32 {
        self.fields.load(Ordering::Relaxed)
    }

    /// How many descriptor errors have been reported
    pub fn descriptor_errors(&self) -> u32 {
        self.descriptor_errors.load(Ordering::Relaxed)
    }
}

impl Default for ChannelSignals {
    fn default() -> Self {
        ChannelSignals::new()
    }
}

impl<R> InterruptHandler<R>
where
    R: PeripheralRegisters,
{
    /// Make a handler. `regs` must refer to the same channel as the driver's.
    pub fn new(regs: R, signals: &'static ChannelSignals) -> InterruptHandler<R> {
        InterruptHandler { regs, signals }
    }

    /// Call this from the channel's interrupt.
    pub fn on_interrupt(&mut self) {
        let status = self.regs.raw_interrupts();
        self.regs.clear_interrupts(status);
        if status.out_eof {
            self.signals.fields.fetch_add(1, Ordering::Relaxed);
            self.signals.vsync_passed.store(true, Ordering::Release);
        }
        if status.out_dscr_err {
            self.signals.descriptor_errors.fetch_add(1, Ordering::Relaxed);
        }
        if self.signals.stop_requested.load(Ordering::Acquire) {
            self.signals.stop_requested.store(false, Ordering::Release);
        }
    }
}

impl<R, D> I2sDriver<R, D>
where
    R: PeripheralRegisters,
    D: DelayNs,
{
    /// Take ownership of a channel.
    ///
    /// Nothing is written to the hardware until it is configured.
    pub fn new(regs: R, delay: D, signals: &'static ChannelSignals) -> I2sDriver<R, D> {
        I2sDriver {
            regs,
            delay,
            signals,
            timeouts: Timeouts::DEFAULT,
            use_interrupt: true,
            ring: None,
            state: State::Idle,
        }
    }

    /// Change how long we wait for the hardware
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Choose whether an interrupt handler is installed for this channel.
    ///
    /// Without one there is no stop handshake and no vsync flag.
    pub fn with_interrupt(mut self, use_interrupt: bool) -> Self {
        self.use_interrupt = use_interrupt;
        self
    }

    /// Which channel we drive
    pub fn channel(&self) -> Channel {
        self.regs.channel()
    }

    /// Are we streaming or capturing?
    pub fn is_running(&self) -> bool {
        self.state != State::Idle
    }

    /// Do we have an interrupt handler?
    pub fn uses_interrupt(&self) -> bool {
        self.use_interrupt
    }

    /// The flags shared with the interrupt handler
    pub fn signals(&self) -> &'static ChannelSignals {
        self.signals
    }

    /// The delay provider, for callers who need to wait on the video timing.
    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    /// Reset the DMA engine, the FIFOs and the transmitter and receiver.
    ///
    /// Safe to call any number of times.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.regs.set_reset(ResetGroup::Dma, true);
        self.regs.set_reset(ResetGroup::Dma, false);
        self.regs.set_reset(ResetGroup::Channel, true);
        self.regs.set_reset(ResetGroup::Channel, false);
        let regs = &self.regs;
        spin_until(&mut self.delay, self.timeouts.reset, || {
            !regs.rx_fifo_reset_pending()
        })
        .map_err(|_| {
            error!("I2S FIFO reset never finished");
            Error::Timeout(Operation::Reset)
        })
    }

    /// Set the channel up to send parallel samples.
    ///
    /// The samples are 16 bits on the wire; with [`BitWidth::Eight`] only the
    /// low eight data lines are used. Returns the APLL settings chosen for
    /// `pixel_clock`. The channel is left stopped.
    pub fn configure_parallel_output(
        &mut self,
        pins: &PinMap,
        pixel_clock: HertzU32,
        width: BitWidth,
    ) -> Result<ApllConfig, Error> {
        self.ensure_idle()?;
        if width == BitWidth::Eight && self.channel() != Channel::I2s1 {
            return Err(ConfigError::BitWidthOnChannel(width.bits()).into());
        }
        Self::check_pins(pins, width)?;
        let apll = ApllConfig::synthesize(pixel_clock)?;

        for (gpio, bit) in pins.data_pins() {
            self.regs.route_output(gpio, Signal::Data(bit));
        }
        if let Some(gpio) = pins.clock() {
            self.regs.route_output(gpio, Signal::BitClock);
        }
        if let Some(gpio) = pins.word_select() {
            self.regs.route_output(gpio, Signal::WordSelect);
        }

        self.regs.enable_module();
        self.reset()?;

        self.regs.set_lcd_mode(true);
        self.regs.set_bits_per_sample(Direction::Tx, SAMPLE_BITS);
        self.regs.set_apll(Some(apll));
        self.regs.set_clock_divider(Direction::Tx, OUTPUT_DIVIDER);
        self.regs.set_fifo(Direction::Tx, FIFO_CONFIG);
        self.regs.set_stop_on_empty(true);
        self.regs.set_pcm_bypass(Direction::Tx, true);
        self.regs.set_channel_mode(Direction::Tx, 0);
        self.regs.set_right_first(Direction::Tx, true);
        self.regs.clear_serial_options(Direction::Tx);
        self.regs.set_start(Direction::Tx, false);

        info!(
            "I2S parallel output: {} bits, {} Hz pixel clock",
            width.bits(),
            apll.pixel_clock().to_Hz()
        );
        Ok(apll)
    }

    /// Set the channel up to sample parallel input.
    ///
    /// The sample clock comes from the fixed divider, not the APLL. The
    /// channel is left stopped.
    pub fn configure_parallel_input(&mut self, pins: &PinMap, width: BitWidth) -> Result<(), Error> {
        self.ensure_idle()?;
        Self::check_pins(pins, width)?;

        for (gpio, bit) in pins.data_pins() {
            self.regs.route_input(gpio, Signal::Data(bit));
        }
        if let Some(gpio) = pins.clock() {
            self.regs.route_input(gpio, Signal::BitClock);
        }
        if let Some(gpio) = pins.word_select() {
            self.regs.route_input(gpio, Signal::WordSelect);
        }

        self.regs.enable_module();
        self.reset()?;

        self.regs.set_lcd_mode(true);
        self.regs.set_bits_per_sample(Direction::Rx, SAMPLE_BITS);
        self.regs.set_apll(None);
        self.regs.set_clock_divider(Direction::Rx, INPUT_DIVIDER);
        self.regs.set_fifo(Direction::Rx, FIFO_CONFIG);
        self.regs.set_stop_on_empty(true);
        // TX on purpose: CONF1 is left as output mode sets it, and the RX
        // PCM path keeps its reset value
        self.regs.set_pcm_bypass(Direction::Tx, true);
        self.regs.set_channel_mode(Direction::Rx, 0);
        self.regs.set_right_first(Direction::Rx, true);
        self.regs.clear_serial_options(Direction::Rx);
        self.regs.set_start(Direction::Rx, false);

        info!("I2S parallel input: {} bits", width.bits());
        Ok(())
    }

    /// Make a ring of `count` buffers of `bytes` bytes each, and keep it.
    ///
    /// Any previous ring is freed.
    pub fn allocate_ring(
        &mut self,
        count: usize,
        bytes: usize,
        bytes_per_sample: usize,
    ) -> Result<(), Error> {
        self.ensure_idle()?;
        let ring = DescriptorRing::allocate(count, bytes, bytes_per_sample)?;
        self.ring = Some(ring);
        Ok(())
    }

    /// Use a ring that was built elsewhere.
    pub fn install_ring(&mut self, ring: DescriptorRing) -> Result<(), Error> {
        self.ensure_idle()?;
        self.ring = Some(ring);
        Ok(())
    }

    /// Free the ring, and any buffers it owns.
    pub fn release_ring(&mut self) -> Result<(), Error> {
        self.ensure_idle()?;
        self.ring = None;
        Ok(())
    }

    /// The ring, if there is one
    pub fn ring(&self) -> Option<&DescriptorRing> {
        self.ring.as_ref()
    }

    /// The ring, if there is one, for re-pointing descriptors
    pub fn ring_mut(&mut self) -> Option<&mut DescriptorRing> {
        self.ring.as_mut()
    }

    /// Start sending the ring, from descriptor zero, forever.
    pub fn start_streaming(&mut self) -> Result<(), Error> {
        self.ensure_idle()?;
        let first = self.first_descriptor()?;
        self.regs.set_interrupt_line(false);
        self.reset()?;
        self.regs.start_link(Direction::Tx, first);
        let raw = self.regs.raw_interrupts();
        self.regs.clear_interrupts(raw);
        self.regs.set_enabled_interrupts(Interrupts::STREAMING);
        if self.use_interrupt {
            self.regs.set_interrupt_line(true);
        }
        self.regs.set_start(Direction::Tx, true);
        self.state = State::Streaming;
        debug!("I2S streaming");
        Ok(())
    }

    /// Start filling the ring from the parallel input.
    pub fn start_capture(&mut self) -> Result<(), Error> {
        self.ensure_idle()?;
        let first = self.first_descriptor()?;
        let samples = self.ring.as_ref().map_or(0, |ring| ring.sample_count(0));
        self.regs.set_interrupt_line(false);
        self.reset()?;
        self.regs.start_link(Direction::Rx, first);
        self.regs.set_rx_eof_num(samples as u32);
        let raw = self.regs.raw_interrupts();
        self.regs.clear_interrupts(raw);
        self.regs.set_enabled_interrupts(Interrupts::CAPTURE);
        if self.use_interrupt {
            self.regs.set_interrupt_line(true);
        }
        self.regs.set_start(Direction::Rx, true);
        self.state = State::Capturing;
        debug!("I2S capturing");
        Ok(())
    }

    /// Stop at the end of the current field, and halt the channel.
    ///
    /// If the interrupt handler doesn't acknowledge in time, the channel is
    /// halted anyway and the timeout is reported.
    pub fn stop(&mut self) -> Result<(), Error> {
        if self.state == State::Idle {
            return Ok(());
        }
        if self.use_interrupt {
            let signals = self.signals;
            signals.request_stop();
            let acked = spin_until(&mut self.delay, self.timeouts.stop, || {
                !signals.stop_pending()
            });
            if acked.is_err() {
                warn!("I2S stop was never acknowledged");
                signals.cancel_stop();
                self.halt()?;
                return Err(Error::Timeout(Operation::Stop));
            }
        }
        self.halt()
    }

    /// Halt the channel right now, wherever it is.
    pub fn halt(&mut self) -> Result<(), Error> {
        self.regs.set_interrupt_line(false);
        self.regs.set_enabled_interrupts(Interrupts::NONE);
        self.regs.stop_link(Direction::Tx);
        self.regs.stop_link(Direction::Rx);
        let result = self.reset();
        self.regs.set_start(Direction::Rx, false);
        self.regs.set_start(Direction::Tx, false);
        self.state = State::Idle;
        debug!("I2S halted");
        result
    }

    /// Which descriptor the DMA engine is sending, if we're streaming.
    pub fn in_flight_descriptor(&self) -> Option<usize> {
        if self.state != State::Streaming {
            return None;
        }
        let ring = self.ring.as_ref()?;
        ring.index_of(self.regs.current_out_descriptor())
    }

    /// Keep calling `done` with the ring and the in-flight descriptor until
    /// it returns true, or `timeout` runs out.
    ///
    /// Without a ring there is nothing to wait for.
    pub fn poll_ring<F>(&mut self, timeout: Timeout, mut done: F) -> Result<(), Elapsed>
    where
        F: FnMut(&mut DescriptorRing, Option<usize>) -> bool,
    {
        let streaming = self.state == State::Streaming;
        let regs = &self.regs;
        let ring = &mut self.ring;
        spin_until(&mut self.delay, timeout, || match ring.as_mut() {
            Some(ring) => {
                let in_flight = if streaming {
                    ring.index_of(regs.current_out_descriptor())
                } else {
                    None
                };
                done(ring, in_flight)
            }
            None => true,
        })
    }

    fn ensure_idle(&self) -> Result<(), Error> {
        if self.state == State::Idle {
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }

    fn first_descriptor(&self) -> Result<usize, Error> {
        self.ring
            .as_ref()
            .map(|ring| ring.first_address())
            .ok_or(Error::Config(ConfigError::NoRing))
    }

    fn check_pins(pins: &PinMap, width: BitWidth) -> Result<(), ConfigError> {
        let used = pins.data_bits_used();
        let supported = usize::from(width.bits());
        if used > supported {
            return Err(ConfigError::TooManyPins {
                requested: used,
                supported,
            });
        }
        Ok(())
    }
}

impl<R, D> Drop for I2sDriver<R, D>
where
    R: PeripheralRegisters,
    D: DelayNs,
{
    fn drop(&mut self) {
        // The ring is about to be freed; the DMA engine must not be using it
        if self.state != State::Idle {
            let _ = self.halt();
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
