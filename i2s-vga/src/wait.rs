//! Bounded busy-waiting.
//!
//! The hardware occasionally needs to be polled until it reports something.
//! Every such poll goes through [`spin_until`], which gives up after a
//! configurable time instead of hanging the CPU.

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

use embedded_hal::delay::DelayNs;
use fugit::MicrosDurationU32;

// -----------------------------------------------------------------------------
// Types
// -----------------------------------------------------------------------------

/// How long to wait for the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Give up after this long
    Bounded(MicrosDurationU32),
    /// Wait forever
    Unbounded,
}

/// The condition did not come true in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

// -----------------------------------------------------------------------------
// Static and Const Data
// -----------------------------------------------------------------------------

/// How long to sleep between polls
const POLL_INTERVAL_US: u32 = 1;

// -----------------------------------------------------------------------------
// Functions
// -----------------------------------------------------------------------------

/// Poll `done` until it returns `true`, sleeping between polls.
///
/// `done` is always checked at least once, before any delay.
pub fn spin_until<D, F>(delay: &mut D, timeout: Timeout, mut done: F) -> Result<(), Elapsed>
where
    D: DelayNs,
    F: FnMut() -> bool,
{
    let mut waited_us: u32 = 0;
    loop {
        if done() {
            return Ok(());
        }
        if let Timeout::Bounded(limit) = timeout {
            if waited_us >= limit.ticks() {
                return Err(Elapsed);
            }
        }
        delay.delay_us(POLL_INTERVAL_US);
        waited_us = waited_us.saturating_add(POLL_INTERVAL_US);
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDelay(u64);

    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.0 += u64::from(ns);
        }
    }

    #[test]
    fn already_done_does_not_wait() {
        let mut delay = CountingDelay(0);
        let result = spin_until(&mut delay, Timeout::Bounded(MicrosDurationU32::millis(1)), || true);
        assert_eq!(result, Ok(()));
        assert_eq!(delay.0, 0);
    }

    #[test]
    fn gives_up_after_timeout() {
        let mut delay = CountingDelay(0);
        let result = spin_until(&mut delay, Timeout::Bounded(MicrosDurationU32::micros(50)), || {
            false
        });
        assert_eq!(result, Err(Elapsed));
        assert_eq!(delay.0, 50_000);
    }

    #[test]
    fn unbounded_waits_as_long_as_it_takes() {
        let mut delay = CountingDelay(0);
        let mut polls = 0;
        let result = spin_until(&mut delay, Timeout::Unbounded, || {
            polls += 1;
            polls == 100_000
        });
        assert_eq!(result, Ok(()));
        assert_eq!(delay.0, 99_999_000);
    }
}

// End of file
