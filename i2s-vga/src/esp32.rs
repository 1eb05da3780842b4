//! Register backend for the ESP32 I2S blocks.
//!
//! [`Esp32I2s`] writes the I2S registers directly. The parts of the job that
//! live outside the I2S block (the GPIO matrix, the Audio PLL, the module
//! clock gate and the interrupt matrix) are left to a [`Platform`], which
//! the board support crate provides.

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

use bitfield::bitfield;

use crate::clock::{ApllConfig, ClockDivider};
use crate::registers::{
    Channel, Direction, FifoConfig, Interrupts, PeripheralRegisters, ResetGroup, Signal,
};

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// Things outside the I2S block that the board has to do for us.
pub trait Platform {
    /// Ungate the clock to the I2S module and take it out of reset
    fn enable_module(&mut self, channel: Channel);

    /// Route an I2S output signal to a GPIO
    fn route_output(&mut self, gpio: u8, channel: Channel, signal: Signal);

    /// Route a GPIO to an I2S input signal
    fn route_input(&mut self, gpio: u8, channel: Channel, signal: Signal);

    /// Program and enable the Audio PLL, or turn it off
    fn set_apll(&mut self, config: Option<ApllConfig>);

    /// Enable or disable the CPU interrupt the channel is wired to
    fn set_interrupt_line(&mut self, channel: Channel, enabled: bool);
}

/// One ESP32 I2S block.
///
/// Cloning gives a second handle to the same registers, which is how the
/// [`InterruptHandler`](crate::driver::InterruptHandler) gets one.
#[derive(Debug, Clone)]
pub struct Esp32I2s<P> {
    base: usize,
    channel: Channel,
    platform: P,
}

bitfield! {
    /// `I2S_CONF_REG`
    #[derive(Clone, Copy)]
    struct Conf(u32);
    tx_reset, set_tx_reset: 0;
    rx_reset, set_rx_reset: 1;
    tx_fifo_reset, set_tx_fifo_reset: 2;
    rx_fifo_reset, set_rx_fifo_reset: 3;
    tx_start, set_tx_start: 4;
    rx_start, set_rx_start: 5;
    tx_slave_mod, set_tx_slave_mod: 6;
    rx_slave_mod, set_rx_slave_mod: 7;
    tx_right_first, set_tx_right_first: 8;
    rx_right_first, set_rx_right_first: 9;
    tx_msb_shift, set_tx_msb_shift: 10;
    rx_msb_shift, set_rx_msb_shift: 11;
    tx_short_sync, set_tx_short_sync: 12;
    rx_short_sync, set_rx_short_sync: 13;
    tx_mono, set_tx_mono: 14;
    rx_mono, set_rx_mono: 15;
    tx_msb_right, set_tx_msb_right: 16;
    rx_msb_right, set_rx_msb_right: 17;
}

bitfield! {
    /// `I2S_INT_RAW_REG` and friends, which all share a layout
    #[derive(Clone, Copy)]
    struct InterruptBits(u32);
    in_done, set_in_done: 8;
    out_eof, set_out_eof: 12;
    out_dscr_err, set_out_dscr_err: 14;
}

bitfield! {
    /// `I2S_FIFO_CONF_REG`
    #[derive(Clone, Copy)]
    struct FifoConf(u32);
    u8, rx_data_num, set_rx_data_num: 5, 0;
    u8, tx_data_num, set_tx_data_num: 11, 6;
    dscr_en, set_dscr_en: 12;
    u8, tx_fifo_mod, set_tx_fifo_mod: 15, 13;
    u8, rx_fifo_mod, set_rx_fifo_mod: 18, 16;
    tx_fifo_mod_force_en, set_tx_fifo_mod_force_en: 19;
    rx_fifo_mod_force_en, set_rx_fifo_mod_force_en: 20;
}

bitfield! {
    /// `I2S_CONF_CHAN_REG`
    #[derive(Clone, Copy)]
    struct ConfChan(u32);
    u8, tx_chan_mod, set_tx_chan_mod: 2, 0;
    u8, rx_chan_mod, set_rx_chan_mod: 4, 3;
}

bitfield! {
    /// `I2S_OUT_LINK_REG` and `I2S_IN_LINK_REG`
    #[derive(Clone, Copy)]
    struct Link(u32);
    u32, addr, set_addr: 19, 0;
    stop, set_stop: 28;
    start, set_start: 29;
}

bitfield! {
    /// `I2S_LC_CONF_REG`
    #[derive(Clone, Copy)]
    struct LcConf(u32);
    in_rst, set_in_rst: 0;
    out_rst, set_out_rst: 1;
    ahbm_fifo_rst, set_ahbm_fifo_rst: 2;
    ahbm_rst, set_ahbm_rst: 3;
}

bitfield! {
    /// `I2S_CONF1_REG`
    #[derive(Clone, Copy)]
    struct Conf1(u32);
    tx_pcm_bypass, set_tx_pcm_bypass: 3;
    rx_pcm_bypass, set_rx_pcm_bypass: 7;
    tx_stop_en, set_tx_stop_en: 8;
}

bitfield! {
    /// `I2S_CONF2_REG`
    #[derive(Clone, Copy)]
    struct Conf2(u32);
    lcd_en, set_lcd_en: 5;
}

bitfield! {
    /// `I2S_CLKM_CONF_REG`
    #[derive(Clone, Copy)]
    struct ClkmConf(u32);
    u8, div_num, set_div_num: 7, 0;
    u8, div_b, set_div_b: 13, 8;
    u8, div_a, set_div_a: 19, 14;
    clk_en, set_clk_en: 20;
    clka_en, set_clka_en: 21;
}

bitfield! {
    /// `I2S_SAMPLE_RATE_CONF_REG`
    #[derive(Clone, Copy)]
    struct SampleRateConf(u32);
    u8, tx_bck_div_num, set_tx_bck_div_num: 5, 0;
    u8, rx_bck_div_num, set_rx_bck_div_num: 11, 6;
    u8, tx_bits_mod, set_tx_bits_mod: 17, 12;
    u8, rx_bits_mod, set_rx_bits_mod: 23, 18;
}

bitfield! {
    /// `I2S_STATE_REG`
    #[derive(Clone, Copy)]
    struct State(u32);
    rx_fifo_reset_back, _: 2;
}

/// A register word with a known offset in the block.
trait Register: Copy {
    const OFFSET: usize;
    fn from_bits(bits: u32) -> Self;
    fn bits(self) -> u32;
}

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// Where I2S0 lives
const I2S0_BASE: usize = 0x3FF4_F000;

/// Where I2S1 lives
const I2S1_BASE: usize = 0x3FF6_D000;

const INT_RAW: usize = 0x0C;
const INT_ENA: usize = 0x14;
const INT_CLR: usize = 0x18;
const TIMING: usize = 0x1C;
const RX_EOF_NUM: usize = 0x24;
const OUT_LINK: usize = 0x30;
const IN_LINK: usize = 0x34;
const OUT_LINK_DSCR: usize = 0x54;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

macro_rules! register {
    ($name:ident, $offset:expr) => {
        impl Register for $name {
            const OFFSET: usize = $offset;

            fn from_bits(bits: u32) -> Self {
                $name(bits)
            }

            fn bits(self) -> u32 {
                self.0
            }
        }
    };
}

register!(Conf, 0x08);
register!(FifoConf, 0x20);
register!(ConfChan, 0x2C);
register!(LcConf, 0x60);
register!(Conf1, 0xA0);
register!(Conf2, 0xA8);
register!(ClkmConf, 0xAC);
register!(SampleRateConf, 0xB0);
register!(State, 0xBC);

impl InterruptBits {
    fn from_interrupts(which: Interrupts) -> InterruptBits {
        let mut bits = InterruptBits(0);
        bits.set_out_eof(which.out_eof);
        bits.set_out_dscr_err(which.out_dscr_err);
        bits.set_in_done(which.in_done);
        bits
    }

    fn interrupts(&self) -> Interrupts {
        Interrupts {
            out_eof: self.out_eof(),
            out_dscr_err: self.out_dscr_err(),
            in_done: self.in_done(),
        }
    }
}

impl<P> Esp32I2s<P>
where
    P: Platform,
{
    /// Take over an I2S block.
    ///
    /// # Safety
    ///
    /// Nothing else may use the block's registers, except clones of the
    /// value returned.
    pub unsafe fn new(channel: Channel, platform: P) -> Esp32I2s<P> {
        let base = match channel {
            Channel::I2s0 => I2S0_BASE,
            Channel::I2s1 => I2S1_BASE,
        };
        Esp32I2s {
            base,
            channel,
            platform,
        }
    }

    /// Use a register block at some other address.
    ///
    /// # Safety
    ///
    /// `base` must point at 0x100 bytes of readable and writable memory laid
    /// out like an I2S block, used by nothing else.
    pub unsafe fn at_address(base: usize, channel: Channel, platform: P) -> Esp32I2s<P> {
        Esp32I2s {
            base,
            channel,
            platform,
        }
    }

    /// The board hooks
    pub fn platform(&self) -> &P {
        &self.platform
    }

    fn read_word(&self, offset: usize) -> u32 {
        // SAFETY: `new` guarantees the block is ours, and every offset we use
        // is a register in it
        unsafe { ((self.base + offset) as *const u32).read_volatile() }
    }

    fn write_word(&mut self, offset: usize, value: u32) {
        // SAFETY: as for `read_word`
        unsafe { ((self.base + offset) as *mut u32).write_volatile(value) }
    }

    fn read<W: Register>(&self) -> W {
        W::from_bits(self.read_word(W::OFFSET))
    }

    fn modify<W: Register>(&mut self, f: impl FnOnce(&mut W)) {
        let mut word = self.read::<W>();
        f(&mut word);
        self.write_word(W::OFFSET, word.bits());
    }
}

impl<P> PeripheralRegisters for Esp32I2s<P>
where
    P: Platform,
{
    fn channel(&self) -> Channel {
        self.channel
    }

    fn enable_module(&mut self) {
        self.platform.enable_module(self.channel);
    }

    fn set_reset(&mut self, group: ResetGroup, asserted: bool) {
        match group {
            ResetGroup::Dma => self.modify::<LcConf>(|r| {
                r.set_in_rst(asserted);
                r.set_out_rst(asserted);
                r.set_ahbm_rst(asserted);
                r.set_ahbm_fifo_rst(asserted);
            }),
            ResetGroup::Channel => self.modify::<Conf>(|r| {
                r.set_rx_reset(asserted);
                r.set_rx_fifo_reset(asserted);
                r.set_tx_reset(asserted);
                r.set_tx_fifo_reset(asserted);
            }),
        }
    }

    fn rx_fifo_reset_pending(&self) -> bool {
        self.read::<State>().rx_fifo_reset_back()
    }

    fn set_start(&mut self, direction: Direction, start: bool) {
        self.modify::<Conf>(|r| match direction {
            Direction::Tx => r.set_tx_start(start),
            Direction::Rx => r.set_rx_start(start),
        });
    }

    fn start_link(&mut self, direction: Direction, descriptor: usize) {
        let mut link = Link(0);
        link.set_addr(descriptor as u32);
        link.set_start(true);
        let offset = match direction {
            Direction::Tx => OUT_LINK,
            Direction::Rx => IN_LINK,
        };
        self.write_word(offset, link.0);
    }

    fn stop_link(&mut self, direction: Direction) {
        let offset = match direction {
            Direction::Tx => OUT_LINK,
            Direction::Rx => IN_LINK,
        };
        let mut link = Link(self.read_word(offset));
        link.set_start(false);
        link.set_stop(true);
        self.write_word(offset, link.0);
    }

    fn current_out_descriptor(&self) -> usize {
        self.read_word(OUT_LINK_DSCR) as usize
    }

    fn set_rx_eof_num(&mut self, samples: u32) {
        self.write_word(RX_EOF_NUM, samples);
    }

    fn raw_interrupts(&self) -> Interrupts {
        InterruptBits(self.read_word(INT_RAW)).interrupts()
    }

    fn clear_interrupts(&mut self, which: Interrupts) {
        self.write_word(INT_CLR, InterruptBits::from_interrupts(which).0);
    }

    fn set_enabled_interrupts(&mut self, which: Interrupts) {
        self.write_word(INT_ENA, InterruptBits::from_interrupts(which).0);
    }

    fn set_interrupt_line(&mut self, enabled: bool) {
        self.platform.set_interrupt_line(self.channel, enabled);
    }

    fn set_lcd_mode(&mut self, enabled: bool) {
        self.modify::<Conf2>(|r| r.set_lcd_en(enabled));
    }

    fn set_bits_per_sample(&mut self, direction: Direction, bits: u8) {
        self.modify::<SampleRateConf>(|r| match direction {
            Direction::Tx => r.set_tx_bits_mod(bits),
            Direction::Rx => r.set_rx_bits_mod(bits),
        });
    }

    fn set_clock_divider(&mut self, direction: Direction, divider: ClockDivider) {
        self.modify::<ClkmConf>(|r| {
            r.set_div_num(divider.num);
            r.set_div_a(divider.a);
            r.set_div_b(divider.b);
            r.set_clka_en(divider.use_apll);
            r.set_clk_en(true);
        });
        self.modify::<SampleRateConf>(|r| match direction {
            Direction::Tx => r.set_tx_bck_div_num(divider.bck),
            Direction::Rx => r.set_rx_bck_div_num(divider.bck),
        });
    }

    fn set_apll(&mut self, config: Option<ApllConfig>) {
        self.platform.set_apll(config);
    }

    fn set_fifo(&mut self, direction: Direction, config: FifoConfig) {
        self.modify::<FifoConf>(|r| {
            match direction {
                Direction::Tx => {
                    r.set_tx_fifo_mod(config.mode);
                    r.set_tx_data_num(config.data_num);
                    r.set_tx_fifo_mod_force_en(config.force_mode);
                }
                Direction::Rx => {
                    r.set_rx_fifo_mod(config.mode);
                    r.set_rx_data_num(config.data_num);
                    r.set_rx_fifo_mod_force_en(config.force_mode);
                }
            }
            r.set_dscr_en(config.dma);
        });
    }

    fn set_channel_mode(&mut self, direction: Direction, mode: u8) {
        self.modify::<ConfChan>(|r| match direction {
            Direction::Tx => r.set_tx_chan_mod(mode),
            Direction::Rx => r.set_rx_chan_mod(mode),
        });
    }

    fn set_stop_on_empty(&mut self, enabled: bool) {
        self.modify::<Conf1>(|r| r.set_tx_stop_en(enabled));
    }

    fn set_pcm_bypass(&mut self, direction: Direction, bypass: bool) {
        self.modify::<Conf1>(|r| match direction {
            Direction::Tx => r.set_tx_pcm_bypass(bypass),
            Direction::Rx => r.set_rx_pcm_bypass(bypass),
        });
    }

    fn set_right_first(&mut self, direction: Direction, right_first: bool) {
        self.modify::<Conf>(|r| match direction {
            Direction::Tx => r.set_tx_right_first(right_first),
            Direction::Rx => r.set_rx_right_first(right_first),
        });
    }

    fn clear_serial_options(&mut self, direction: Direction) {
        self.modify::<Conf>(|r| match direction {
            Direction::Tx => {
                r.set_tx_slave_mod(false);
                r.set_tx_msb_shift(false);
                r.set_tx_short_sync(false);
                r.set_tx_mono(false);
                r.set_tx_msb_right(false);
            }
            Direction::Rx => {
                r.set_rx_slave_mod(false);
                r.set_rx_msb_shift(false);
                r.set_rx_short_sync(false);
                r.set_rx_mono(false);
                r.set_rx_msb_right(false);
            }
        });
        self.write_word(TIMING, 0);
    }

    fn route_output(&mut self, gpio: u8, signal: Signal) {
        self.platform.route_output(gpio, self.channel, signal);
    }

    fn route_input(&mut self, gpio: u8, signal: Signal) {
        self.platform.route_input(gpio, self.channel, signal);
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------


// End of file
