//! Capture timestamps.
//!
//! Each packet from the radio carries the high bits of its native Bluetooth
//! clock (CLKN, 312.5 µs ticks) and a free-running 32-bit 100 ns counter. The
//! counter rolls over about every seven minutes, so long captures need
//! [`Clk100nsTracker`] to keep timestamps monotonic.

use crate::bluetooth::trim::RX_LATENCY_100NS;

/// One CLKN tick (312.5 µs) in 100 ns units.
pub const CLKN_TICK_100NS: u32 = 3125;

/// Valid bits of the native and master clocks (CLK27-0).
pub const CLKN_MASK: u32 = 0x0fff_ffff;

/// Master clock at an access code found `ac_offset` symbols into a captured
/// block.
///
/// The arithmetic wraps the way the radio's own counters do.
pub fn clkn_at(clkn_high: u8, clk100ns: u32, ac_offset: usize) -> u32 {
    let ticks = clk100ns
        .wrapping_add((ac_offset as u32).wrapping_mul(10))
        .wrapping_sub(RX_LATENCY_100NS)
        / CLKN_TICK_100NS;
    ((clkn_high as u32) << 20).wrapping_add(ticks)
}

/// Extends the 32-bit 100 ns counter to 64 bits.
///
/// Any time a timestamp goes backwards, the counter is assumed to have rolled
/// over once.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clk100nsTracker {
    last: Option<u32>,
    wraps: u64,
}

impl Clk100nsTracker {
    /// Start a fresh tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed in the next timestamp, getting back the extended time.
    pub fn update(&mut self, now: u32) -> u64 {
        if let Some(last) = self.last {
            if now < last {
                self.wraps += 1;
            }
        }
        self.last = Some(now);
        (self.wraps << 32) | now as u64
    }

    /// The last extended time, if any timestamps have been seen.
    pub fn current(&self) -> Option<u64> {
        self.last.map(|last| (self.wraps << 32) | last as u64)
    }

    /// Number of rollovers seen so far.
    pub fn wraps(&self) -> u64 {
        self.wraps
    }
}
