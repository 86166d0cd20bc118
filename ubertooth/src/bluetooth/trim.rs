//! Clock trim control loop.
//!
//! While following a piconet, the radio's idea of the master clock drifts. Each
//! time the access code is found, we know where the slot boundary actually was
//! relative to the radio's 100 ns counter. [`TrimController`] turns that into
//! occasional corrections: a hard trim that moves the radio's clock by a given
//! number of 100 ns ticks, optionally followed by a drift rate estimate in
//! parts per million.
//!
//! Small errors inside the dead-band are ignored. Larger ones only trigger a
//! trim once they've persisted in the same direction for more than
//! `threshold` packets, and the trim itself happens on the packet after that.

use tracing::{debug, info};

use crate::clock::CLKN_MASK;

/// Consecutive out-of-band errors (in one direction) before a hard trim.
pub const CLOCK_TRIM_THRESHOLD: i32 = 2;

/// Where the slot boundary should sit within a slot, in 100 ns units.
pub const CLK_TUNE_TIME: i32 = 2250;

/// Half-width of the dead-band around [`CLK_TUNE_TIME`], in 100 ns units.
pub const CLK_TUNE_OFFSET: i32 = 200;

/// One 625 µs slot in 100 ns units.
pub const SLOT_100NS: u32 = 6250;

/// Receive pipeline latency, in 100 ns units.
pub const RX_LATENCY_100NS: u32 = 4000;

/// Where in the slot an access code landed, in 100 ns units.
///
/// `ac_offset` is the access code's symbol offset in the captured block; each
/// symbol is 1 µs long.
pub fn clk_offset(clk100ns: u32, ac_offset: usize) -> u32 {
    clk100ns
        .wrapping_add((ac_offset as u32).wrapping_mul(10))
        .wrapping_add(SLOT_100NS)
        .wrapping_sub(RX_LATENCY_100NS)
        % SLOT_100NS
}

/// Trim loop tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrimConfig {
    /// Counter magnitude that must be exceeded before a hard trim.
    pub threshold: i32,
    /// Target slot-boundary offset, in 100 ns units.
    pub tune_time: i32,
    /// Dead-band half-width, in 100 ns units.
    pub tune_offset: i32,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            threshold: CLOCK_TRIM_THRESHOLD,
            tune_time: CLK_TUNE_TIME,
            tune_offset: CLK_TUNE_OFFSET,
        }
    }
}

/// What the trim loop decided for one captured access code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrimAction {
    /// The error is inside the dead-band.
    Stable,
    /// Out of band, but not for long enough to act on yet.
    Pending {
        /// Signed count of consecutive out-of-band errors.
        counter: i32,
    },
    /// Move the radio's clock.
    Trim {
        /// Amount to trim, in 100 ns units, modulo one slot.
        offset: u16,
        /// Estimated drift since the last trim, if there was one.
        drift_ppm: Option<i16>,
    },
}

/// Clock trim state for one piconet.
#[derive(Clone, Debug, Default)]
pub struct TrimController {
    config: TrimConfig,
    counter: i32,
    calibrated: bool,
    clkn_trim: u32,
}

impl TrimController {
    /// Make a new, uncalibrated, trim controller.
    pub fn new(config: TrimConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// The loop tuning in use.
    pub fn config(&self) -> &TrimConfig {
        &self.config
    }

    /// Whether at least one hard trim has happened since the last reset.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// The current hysteresis counter.
    pub fn counter(&self) -> i32 {
        self.counter
    }

    /// Forget calibration, e.g. after losing the piconet.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.calibrated = false;
        self.clkn_trim = 0;
    }

    /// Signed slot-boundary error for a `clk_offset`, wrapped to half a slot
    /// either side of zero.
    pub fn error(&self, clk_offset: u32) -> i32 {
        let half = (SLOT_100NS / 2) as i32;
        let err = (clk_offset % SLOT_100NS) as i32 - self.config.tune_time;
        (err + half).rem_euclid(SLOT_100NS as i32) - half
    }

    /// Feed one access code observation into the loop.
    ///
    /// `clk_offset` comes from [`clk_offset`], and `clkn` is the master clock
    /// at which the access code was seen.
    ///
    /// The counter built up by earlier observations is checked before this
    /// one is counted, so a hard trim lands on the observation after the
    /// counter passes `threshold`, whatever that observation's own error.
    pub fn evaluate(&mut self, clk_offset: u32, clkn: u32) -> TrimAction {
        let err = self.error(clk_offset);
        if !self.calibrated || self.counter.abs() > self.config.threshold {
            return self.trim(err, clkn);
        }
        if err.abs() <= self.config.tune_offset {
            self.counter = 0;
            return TrimAction::Stable;
        }
        self.counter += err.signum();
        debug!(
            "Slot error {err} outside dead-band, counter now {}",
            self.counter
        );
        TrimAction::Pending {
            counter: self.counter,
        }
    }

    fn trim(&mut self, err: i32, clkn: u32) -> TrimAction {
        let offset = err.rem_euclid(SLOT_100NS as i32) as u16;
        let drift_ppm = if self.calibrated {
            // CLK is 28 bits wide, so elapsed ticks are taken modulo 2^28.
            let elapsed = clkn.wrapping_sub(self.clkn_trim) & CLKN_MASK;
            (elapsed != 0).then(|| {
                let ppm = err as i64 * 320 / elapsed as i64;
                ppm.clamp(i16::MIN as i64, i16::MAX as i64) as i16
            })
        } else {
            None
        };
        self.counter = 0;
        self.clkn_trim = clkn;
        self.calibrated = true;
        match drift_ppm {
            Some(ppm) => info!("Trimming clock by {err} (offset {offset}), drift {ppm} ppm"),
            None => info!("Trimming clock by {err} (offset {offset})"),
        }
        TrimAction::Trim { offset, drift_ppm }
    }
}
