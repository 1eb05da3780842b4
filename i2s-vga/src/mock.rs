//! A fake I2S channel for the unit tests.
//!
//! [`FakeRegisters`] records what the driver asked for. Once started, it
//! also walks the real descriptor ring the driver gave it, one descriptor
//! per `ns_per_descriptor` of fake time, and raises `out_eof` whenever it
//! passes a descriptor with the EOF flag set. Fake time only moves when
//! [`FakeDelay`] is asked to wait, and that is also where the fake
//! interrupt gets delivered, and where a test can look at the channel after
//! every step.

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

use std::boxed::Box;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::clock::{ApllConfig, ClockDivider};
use crate::descriptor::Descriptor;
use crate::driver::InterruptHandler;
use crate::registers::{
    Channel, Direction, FifoConfig, Interrupts, PeripheralRegisters, ResetGroup, Signal,
};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Register writes whose order matters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Reset,
    InterruptLine(bool),
    StartLink(Direction, usize),
    ClearInterrupts,
    EnableInterrupts(Interrupts),
    Start(Direction, bool),
}

#[derive(Debug)]
pub(crate) struct FakeState {
    pub channel: Channel,
    pub events: Vec<Event>,
    pub module_enabled: bool,
    pub dma_reset_pulses: u32,
    pub channel_reset_pulses: u32,
    pub dma_reset_held: bool,
    pub channel_reset_held: bool,
    /// Makes the FIFO reset never finish
    pub reset_stuck: bool,
    pub tx_start: bool,
    pub rx_start: bool,
    pub out_link: Option<usize>,
    pub in_link: Option<usize>,
    pub rx_eof_num: u32,
    pub raw: Interrupts,
    pub enabled: Interrupts,
    pub interrupt_line: bool,
    pub lcd_mode: bool,
    pub tx_bits: u8,
    pub rx_bits: u8,
    pub tx_divider: Option<ClockDivider>,
    pub rx_divider: Option<ClockDivider>,
    pub apll: Option<ApllConfig>,
    pub tx_fifo: Option<FifoConfig>,
    pub rx_fifo: Option<FifoConfig>,
    pub stop_on_empty: bool,
    pub tx_pcm_bypass: bool,
    pub rx_pcm_bypass: bool,
    pub tx_right_first: bool,
    pub rx_right_first: bool,
    pub outputs: Vec<(u8, Signal)>,
    pub inputs: Vec<(u8, Signal)>,
    /// Address of the descriptor being sent
    pub position: usize,
    /// Zero means the DMA engine is frozen
    pub ns_per_descriptor: u64,
    pending_ns: u64,
    pub elapsed_ns: u64,
}

/// A shared handle to one fake channel.
#[derive(Debug, Clone)]
pub(crate) struct FakeRegisters(Rc<RefCell<FakeState>>);

/// Called with the channel state each time fake time moves on
pub(crate) type Watch = Box<dyn FnMut(&FakeState)>;

/// Moves fake time along, and delivers the fake interrupt.
pub(crate) struct FakeDelay {
    hw: FakeRegisters,
    handler: Option<InterruptHandler<FakeRegisters>>,
    watch: Option<Watch>,
}

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

impl FakeRegisters {
    pub fn new(channel: Channel) -> FakeRegisters {
        FakeRegisters(Rc::new(RefCell::new(FakeState {
            channel,
            events: Vec::new(),
            module_enabled: false,
            dma_reset_pulses: 0,
            channel_reset_pulses: 0,
            dma_reset_held: false,
            channel_reset_held: false,
            reset_stuck: false,
            tx_start: false,
            rx_start: false,
            out_link: None,
            in_link: None,
            rx_eof_num: 0,
            raw: Interrupts::NONE,
            enabled: Interrupts::NONE,
            interrupt_line: false,
            lcd_mode: false,
            tx_bits: 0,
            rx_bits: 0,
            tx_divider: None,
            rx_divider: None,
            apll: None,
            tx_fifo: None,
            rx_fifo: None,
            stop_on_empty: false,
            tx_pcm_bypass: false,
            rx_pcm_bypass: false,
            tx_right_first: false,
            rx_right_first: false,
            outputs: Vec::new(),
            inputs: Vec::new(),
            position: 0,
            ns_per_descriptor: 0,
            pending_ns: 0,
            elapsed_ns: 0,
        })))
    }

    pub fn state(&self) -> Ref<'_, FakeState> {
        self.0.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, FakeState> {
        self.0.borrow_mut()
    }

    /// Let `ns` of fake time pass. Returns true if the interrupt should fire.
    fn advance(&self, ns: u64) -> bool {
        let mut guard = self.0.borrow_mut();
        let s = &mut *guard;
        s.elapsed_ns += ns;
        if !s.tx_start || s.position == 0 || s.ns_per_descriptor == 0 {
            return false;
        }
        s.pending_ns += ns;
        let mut eof = false;
        while s.pending_ns >= s.ns_per_descriptor {
            s.pending_ns -= s.ns_per_descriptor;
            // SAFETY: `position` was loaded from the ring the driver started
            // us on, and the driver stops us before that ring is freed.
            let descriptor = unsafe { &*(s.position as *const Descriptor) };
            eof |= descriptor.is_eof();
            s.position = descriptor.next_address();
        }
        if eof && s.enabled.out_eof {
            s.raw.out_eof = true;
        }
        s.raw.any() && s.enabled.intersect(s.raw).any() && s.interrupt_line
    }
}

impl PeripheralRegisters for FakeRegisters {
    fn channel(&self) -> Channel {
        self.state().channel
    }

    fn enable_module(&mut self) {
        self.state_mut().module_enabled = true;
    }

    fn set_reset(&mut self, group: ResetGroup, asserted: bool) {
        let mut s = self.state_mut();
        match group {
            ResetGroup::Dma => {
                if asserted {
                    s.dma_reset_pulses += 1;
                    s.events.push(Event::Reset);
                }
                s.dma_reset_held = asserted;
            }
            ResetGroup::Channel => {
                if asserted {
                    s.channel_reset_pulses += 1;
                }
                s.channel_reset_held = asserted;
            }
        }
    }

    fn rx_fifo_reset_pending(&self) -> bool {
        self.state().reset_stuck
    }

    fn set_start(&mut self, direction: Direction, start: bool) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => s.tx_start = start,
            Direction::Rx => s.rx_start = start,
        }
        s.events.push(Event::Start(direction, start));
    }

    fn start_link(&mut self, direction: Direction, descriptor: usize) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => {
                s.out_link = Some(descriptor);
                s.position = descriptor;
                s.pending_ns = 0;
            }
            Direction::Rx => s.in_link = Some(descriptor),
        }
        s.events.push(Event::StartLink(direction, descriptor));
    }

    fn stop_link(&mut self, direction: Direction) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => s.out_link = None,
            Direction::Rx => s.in_link = None,
        }
    }

    fn current_out_descriptor(&self) -> usize {
        self.state().position
    }

    fn set_rx_eof_num(&mut self, samples: u32) {
        self.state_mut().rx_eof_num = samples;
    }

    fn raw_interrupts(&self) -> Interrupts {
        self.state().raw
    }

    fn clear_interrupts(&mut self, which: Interrupts) {
        let mut s = self.state_mut();
        s.raw.out_eof &= !which.out_eof;
        s.raw.out_dscr_err &= !which.out_dscr_err;
        s.raw.in_done &= !which.in_done;
        s.events.push(Event::ClearInterrupts);
    }

    fn set_enabled_interrupts(&mut self, which: Interrupts) {
        let mut s = self.state_mut();
        s.enabled = which;
        if which.any() {
            s.events.push(Event::EnableInterrupts(which));
        }
    }

    fn set_interrupt_line(&mut self, enabled: bool) {
        let mut s = self.state_mut();
        s.interrupt_line = enabled;
        s.events.push(Event::InterruptLine(enabled));
    }

    fn set_lcd_mode(&mut self, enabled: bool) {
        self.state_mut().lcd_mode = enabled;
    }

    fn set_bits_per_sample(&mut self, direction: Direction, bits: u8) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => s.tx_bits = bits,
            Direction::Rx => s.rx_bits = bits,
        }
    }

    fn set_clock_divider(&mut self, direction: Direction, divider: ClockDivider) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => s.tx_divider = Some(divider),
            Direction::Rx => s.rx_divider = Some(divider),
        }
    }

    fn set_apll(&mut self, config: Option<ApllConfig>) {
        self.state_mut().apll = config;
    }

    fn set_fifo(&mut self, direction: Direction, config: FifoConfig) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => s.tx_fifo = Some(config),
            Direction::Rx => s.rx_fifo = Some(config),
        }
    }

    fn set_channel_mode(&mut self, _direction: Direction, _mode: u8) {}

    fn set_stop_on_empty(&mut self, enabled: bool) {
        self.state_mut().stop_on_empty = enabled;
    }

    fn set_pcm_bypass(&mut self, direction: Direction, bypass: bool) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => s.tx_pcm_bypass = bypass,
            Direction::Rx => s.rx_pcm_bypass = bypass,
        }
    }

    fn set_right_first(&mut self, direction: Direction, right_first: bool) {
        let mut s = self.state_mut();
        match direction {
            Direction::Tx => s.tx_right_first = right_first,
            Direction::Rx => s.rx_right_first = right_first,
        }
    }

    fn clear_serial_options(&mut self, _direction: Direction) {}

    fn route_output(&mut self, gpio: u8, signal: Signal) {
        self.state_mut().outputs.push((gpio, signal));
    }

    fn route_input(&mut self, gpio: u8, signal: Signal) {
        self.state_mut().inputs.push((gpio, signal));
    }
}

impl FakeDelay {
    pub fn new(hw: &FakeRegisters) -> FakeDelay {
        FakeDelay {
            hw: hw.clone(),
            handler: None,
            watch: None,
        }
    }

    /// Deliver interrupts to this handler
    pub fn with_handler(mut self, handler: InterruptHandler<FakeRegisters>) -> FakeDelay {
        self.handler = Some(handler);
        self
    }

    /// Call `watch` after every step of fake time
    pub fn with_watch(mut self, watch: impl FnMut(&FakeState) + 'static) -> FakeDelay {
        self.watch = Some(Box::new(watch));
        self
    }
}

impl DelayNs for FakeDelay {
    fn delay_ns(&mut self, ns: u32) {
        let fire = self.hw.advance(u64::from(ns));
        if let Some(watch) = self.watch.as_mut() {
            watch(&self.hw.state());
        }
        if fire {
            if let Some(handler) = self.handler.as_mut() {
                handler.on_interrupt();
            }
        }
    }
}

// End of file
