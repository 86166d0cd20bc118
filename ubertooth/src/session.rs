//! Following a single piconet.
//!
//! A [`Session`] holds everything needed to follow one piconet from the stream
//! of records the radio sends back: the hop kernel for the master's address, a
//! correlator for its access code, the clock trim loop, and timestamp and RSSI
//! bookkeeping. It never talks to the radio itself. Instead, each processed
//! packet lists the [`DeviceCommand`]s that should be sent back, which can be
//! applied with [`Ubertooth::send`][crate::Ubertooth::send].
//!
//! ```no_run
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! use ubertooth::{Session, SessionConfig, bluetooth::BdAddr};
//!
//! let ut = ubertooth::open_ubertooth()?;
//! let mut session = Session::new(SessionConfig::new(BdAddr::new(0x0011_229e_8b33)));
//! ut.set_bdaddr(session.address()).await?;
//! let mut rx = ut.start_rx().await.map_err(|e| e.err)?;
//! for _ in 0..8 {
//!     rx.submit();
//! }
//! loop {
//!     for block in rx.next_complete().await? {
//!         if let Some(pkt) = session.process(&block) {
//!             println!("{pkt}");
//!             for cmd in pkt.commands.iter() {
//!                 rx.send(cmd).await?;
//!             }
//!         }
//!     }
//!     rx.submit();
//! }
//! # }
//! ```

use tracing::{debug, trace, warn};

use crate::Error;
use crate::bluetooth::{
    AccessCodeNotFound, AfhMap, BdAddr, Correlator, HopKernel, MAX_SYNCWORD_ERRS, SYNC_WORD_LEN,
    TrimAction, TrimConfig, TrimController, trim::clk_offset, whiten,
};
use crate::clock::{CLKN_MASK, Clk100nsTracker, clkn_at};
use crate::consts::ControlRequest;
use crate::packet::{CapturedBlock, RssiHistory};

/// Offset of the packet header from the start of the sync word, which is
/// followed by a 4-bit trailer.
const HEADER_START: usize = SYNC_WORD_LEN + 4;

/// Default number of records without the access code before the piconet
/// counts as lost. Each record covers 400 µs, so this is about a second.
pub const LOST_AFTER_RECORDS: u32 = 2500;

/// Settings for following one piconet.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// The piconet master's address. Only the lower 32 bits matter.
    pub address: BdAddr,
    /// AFH map in use by the piconet, if known.
    pub afh_map: Option<AfhMap>,
    /// Access codes must have fewer than this many bit errors.
    pub max_ac_errors: u32,
    /// Whether to run the clock trim loop.
    pub trim: bool,
    /// Trim loop tuning.
    pub trim_config: TrimConfig,
    /// Master clock minus the radio's native clock, if known. With it the
    /// radio hops along with the piconet instead of parking on one channel.
    pub clkn_offset: Option<u32>,
    /// Basic-rate records in a row without the access code before the
    /// piconet counts as lost and hopping is restarted. Zero never gives up.
    pub lost_after: u32,
}

impl SessionConfig {
    /// Default settings for following a given master.
    pub fn new(address: BdAddr) -> Self {
        Self {
            address,
            afh_map: None,
            max_ac_errors: MAX_SYNCWORD_ERRS,
            trim: true,
            trim_config: TrimConfig::default(),
            clkn_offset: None,
            lost_after: LOST_AFTER_RECORDS,
        }
    }
}

/// A command for the radio, produced while following a piconet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Tune to a frequency, in MHz.
    SetChannel(u16),
    /// Hard-trim the radio's clock, in 100 ns units modulo one slot.
    TrimClock(u16),
    /// Correct the radio's clock rate, in parts per million.
    FixClockDrift(i16),
    /// Load an AFH map.
    SetAfhMap(AfhMap),
    /// Drop the AFH map and hop over every channel.
    ClearAfhMap,
    /// Hop along with the piconet set by
    /// [`Ubertooth::set_bdaddr`][crate::Ubertooth::set_bdaddr].
    StartHopping {
        /// Master clock minus the radio's native clock.
        clkn_offset: u32,
        /// Sub-tick adjustment, in 100 ns units.
        clk100ns_offset: u16,
    },
}

impl DeviceCommand {
    /// Control request, `wValue`, and payload for this command.
    pub(crate) fn encode(&self) -> (ControlRequest, u16, Vec<u8>) {
        match *self {
            Self::SetChannel(mhz) => (ControlRequest::SetChannel, mhz, Vec::new()),
            Self::TrimClock(offset) => (ControlRequest::TrimClock, 0, offset.to_be_bytes().to_vec()),
            Self::FixClockDrift(ppm) => {
                (ControlRequest::FixClockDrift, 0, ppm.to_be_bytes().to_vec())
            }
            Self::SetAfhMap(map) => (ControlRequest::SetAfhMap, 0, map.as_bytes().to_vec()),
            Self::ClearAfhMap => (ControlRequest::ClearAfhMap, 0, Vec::new()),
            Self::StartHopping {
                clkn_offset,
                clk100ns_offset,
            } => {
                let mut data = clkn_offset.to_be_bytes().to_vec();
                data.extend_from_slice(&clk100ns_offset.to_be_bytes());
                (ControlRequest::StartHopping, 0, data)
            }
        }
    }
}

impl std::fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SetChannel(mhz) => write!(f, "set channel {mhz} MHz"),
            Self::TrimClock(offset) => write!(f, "trim clock {offset}"),
            Self::FixClockDrift(ppm) => write!(f, "fix clock drift {ppm} ppm"),
            Self::SetAfhMap(map) => write!(f, "set AFH map {map}"),
            Self::ClearAfhMap => f.write_str("clear AFH map"),
            Self::StartHopping { clkn_offset, .. } => {
                write!(f, "start hopping at clock offset {clkn_offset}")
            }
        }
    }
}

/// A basic-rate packet found while following a piconet.
#[derive(Clone, Debug)]
pub struct RxPacket {
    /// Channel it was captured on.
    pub channel: u8,
    /// LAP of the matched access code.
    pub lap: u32,
    /// Symbol offset of the sync word within the captured block.
    pub ac_offset: usize,
    /// Bit errors in the sync word.
    pub ac_errors: u32,
    /// Radio's native clock at the access code.
    pub clkn: u32,
    /// Master clock at the access code, from `clkn` and the configured offset.
    pub clk: u32,
    /// Where in the slot the access code landed, in 100 ns units.
    pub clk_offset: u32,
    /// Capture time in 100 ns units, extended past the counter's rollover.
    pub timestamp: u64,
    /// Signal level estimate, in dBm.
    pub signal_dbm: i8,
    /// Noise level estimate, in dBm.
    pub noise_dbm: i8,
    /// What the trim loop decided, if it's running.
    pub trim: Option<TrimAction>,
    /// Commands to send back to the radio.
    pub commands: Vec<DeviceCommand>,
    /// Symbols from the start of the sync word to the end of the block.
    pub symbols: Vec<u8>,
}

impl RxPacket {
    /// Signal-to-noise ratio, in dB.
    pub fn snr(&self) -> i8 {
        self.signal_dbm.saturating_sub(self.noise_dbm)
    }

    /// Symbols following the access code, with whitening removed.
    pub fn dewhitened(&self) -> Vec<u8> {
        let start = HEADER_START.min(self.symbols.len());
        whiten::dewhiten(&self.symbols[start..], self.clk, 0)
    }
}

impl std::fmt::Display for RxPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ch={:2} LAP={:06x} err={} clkn={} clk_offset={} s={} n={} snr={}",
            self.channel,
            self.lap,
            self.ac_errors,
            self.clkn,
            self.clk_offset,
            self.signal_dbm,
            self.noise_dbm,
            self.snr()
        )
    }
}

/// Running counts for a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Records handed to [`Session::process`].
    pub blocks: u64,
    /// Records that passed the basic-rate sanity checks.
    pub valid: u64,
    /// Records with an access code in them.
    pub found: u64,
    /// Hard clock trims issued.
    pub trims: u64,
    /// Times the piconet was lost and hopping restarted.
    pub losses: u64,
}

/// State for following one piconet.
#[derive(Clone, Debug)]
pub struct Session {
    config: SessionConfig,
    kernel: HopKernel,
    correlator: Correlator,
    trim: TrimController,
    clock: Clk100nsTracker,
    rssi: RssiHistory,
    stats: SessionStats,
    misses: u32,
    last_clkn: u32,
    outbox: Vec<DeviceCommand>,
}

impl Session {
    /// Set up a session from its settings.
    pub fn new(mut config: SessionConfig) -> Self {
        let kernel = HopKernel::new(config.address, config.afh_map);
        config.afh_map = kernel.afh_map().copied();
        let correlator = Correlator::new(config.address.sync_word(), config.max_ac_errors);
        let trim = TrimController::new(config.trim_config);
        Self {
            config,
            kernel,
            correlator,
            trim,
            clock: Clk100nsTracker::new(),
            rssi: RssiHistory::new(),
            stats: SessionStats::default(),
            misses: 0,
            last_clkn: 0,
            outbox: Vec::new(),
        }
    }

    /// The master address being followed.
    pub fn address(&self) -> BdAddr {
        self.config.address
    }

    /// The settings this session was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The hop kernel for this piconet.
    pub fn kernel(&self) -> &HopKernel {
        &self.kernel
    }

    /// The trim loop state.
    pub fn trim(&self) -> &TrimController {
        &self.trim
    }

    /// Running counts.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Look for a packet from this piconet in one received record.
    ///
    /// Records that aren't basic-rate captures, are flagged for discard, or
    /// don't contain the access code give back `None`.
    pub fn process(&mut self, block: &CapturedBlock) -> Option<RxPacket> {
        self.stats.blocks += 1;
        if !block.is_valid_br() {
            trace!(
                "Skipping {} record on channel {} (status 0x{:02x})",
                block.pkt_type, block.channel, block.status
            );
            return None;
        }
        self.stats.valid += 1;
        let timestamp = self.clock.update(block.clk100ns);
        let (signal_dbm, noise_dbm) = self.rssi.update(block);

        self.last_clkn = clkn_at(block.clkn_high, block.clk100ns, 0);

        let symbols = block.symbols();
        let ac = match self.correlator.find_access_code(&symbols) {
            Ok(ac) => ac,
            Err(AccessCodeNotFound) => {
                self.missed();
                return None;
            }
        };
        self.stats.found += 1;
        self.misses = 0;

        let clkn = clkn_at(block.clkn_high, block.clk100ns, ac.offset);
        let clk_offset = clk_offset(block.clk100ns, ac.offset);
        debug!(
            "Access code on channel {} at offset {} ({} errors), clkn {clkn}, clk_offset {clk_offset}",
            block.channel, ac.offset, ac.errors
        );

        let mut commands = Vec::new();
        let trim = self.config.trim.then(|| {
            let action = self.trim.evaluate(clk_offset, clkn);
            if let TrimAction::Trim { offset, drift_ppm } = action {
                self.stats.trims += 1;
                commands.push(DeviceCommand::TrimClock(offset));
                if let Some(ppm) = drift_ppm {
                    commands.push(DeviceCommand::FixClockDrift(ppm));
                }
            }
            action
        });

        Some(RxPacket {
            channel: block.channel,
            lap: self.correlator.sync_word().lap(),
            ac_offset: ac.offset,
            ac_errors: ac.errors,
            clkn,
            clk: self.master_clock(clkn),
            clk_offset,
            timestamp,
            signal_dbm,
            noise_dbm,
            trim,
            commands,
            symbols: symbols[ac.offset..].to_vec(),
        })
    }

    fn missed(&mut self) {
        self.misses = self.misses.wrapping_add(1);
        let lost_after = self.config.lost_after;
        if lost_after == 0 || self.misses % lost_after != 0 {
            return;
        }
        warn!(
            "No access code for LAP {:06x} in {} records, restarting",
            self.config.address.lap(),
            self.misses
        );
        self.stats.losses += 1;
        self.trim.reset();
        let cmds = self.start_commands(self.last_clkn);
        self.outbox.extend(cmds);
    }

    fn master_clock(&self, clkn: u32) -> u32 {
        clkn.wrapping_add(self.config.clkn_offset.unwrap_or(0)) & CLKN_MASK
    }

    /// Command to tune to the channel for a given master clock.
    pub fn hop_command(&self, clkn: u32) -> DeviceCommand {
        DeviceCommand::SetChannel(self.kernel.next_hop(clkn))
    }

    /// Commands that put the radio on the piconet's hop sequence, given the
    /// radio's current native clock.
    ///
    /// Without a known clock offset there's nothing to hop along with, and
    /// this is empty.
    pub fn start_commands(&self, clkn: u32) -> Vec<DeviceCommand> {
        let Some(clkn_offset) = self.config.clkn_offset else {
            return Vec::new();
        };
        vec![
            self.hop_command(self.master_clock(clkn)),
            DeviceCommand::StartHopping {
                clkn_offset,
                clk100ns_offset: 0,
            },
        ]
    }

    /// Take the commands produced outside of any one packet, like the restart
    /// after losing the piconet.
    pub fn drain_commands(&mut self) -> std::vec::Drain<'_, DeviceCommand> {
        self.outbox.drain(..)
    }

    /// Switch to a new AFH map, getting the command to load it into the radio.
    ///
    /// A map with no used channels is rejected, and the session falls back to
    /// hopping over every channel.
    pub fn set_afh_map(&mut self, map: AfhMap) -> Result<DeviceCommand, Error> {
        let res = self.kernel.set_afh_map(map);
        self.config.afh_map = self.kernel.afh_map().copied();
        res.map(|_| DeviceCommand::SetAfhMap(map))
    }

    /// Stop using AFH, getting the command to clear it in the radio.
    pub fn clear_afh_map(&mut self) -> DeviceCommand {
        self.kernel.clear_afh_map();
        self.config.afh_map = None;
        DeviceCommand::ClearAfhMap
    }

    /// Forget clock calibration, e.g. after losing the piconet.
    pub fn reset_trim(&mut self) {
        self.trim.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_encoding() {
        let (req, value, data) = DeviceCommand::SetChannel(2441).encode();
        assert!(matches!(req, ControlRequest::SetChannel));
        assert_eq!(value, 2441);
        assert!(data.is_empty());

        let (req, value, data) = DeviceCommand::TrimClock(0x1234).encode();
        assert!(matches!(req, ControlRequest::TrimClock));
        assert_eq!(value, 0);
        assert_eq!(data, [0x12, 0x34]);

        let (req, _, data) = DeviceCommand::FixClockDrift(-2).encode();
        assert!(matches!(req, ControlRequest::FixClockDrift));
        assert_eq!(data, [0xff, 0xfe]);

        let map = AfhMap::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 0x7f]);
        let (req, _, data) = DeviceCommand::SetAfhMap(map).encode();
        assert!(matches!(req, ControlRequest::SetAfhMap));
        assert_eq!(data, map.as_bytes());

        let (req, _, data) = DeviceCommand::StartHopping {
            clkn_offset: 0x0102_0304,
            clk100ns_offset: 0x0506,
        }
        .encode();
        assert!(matches!(req, ControlRequest::StartHopping));
        assert_eq!(data, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn start_needs_clock_offset() {
        let mut config = SessionConfig::new(BdAddr::new(0x1234_5678));
        assert!(Session::new(config.clone()).start_commands(0).is_empty());

        config.clkn_offset = Some(2);
        let session = Session::new(config);
        assert_eq!(
            session.start_commands(0),
            [
                DeviceCommand::SetChannel(2439),
                DeviceCommand::StartHopping {
                    clkn_offset: 2,
                    clk100ns_offset: 0
                }
            ]
        );
    }

    #[test]
    fn hop_commands_follow_kernel() {
        let session = Session::new(SessionConfig::new(BdAddr::new(0x1234_5678)));
        assert_eq!(session.hop_command(0), DeviceCommand::SetChannel(2462));
        assert_eq!(session.hop_command(2), DeviceCommand::SetChannel(2439));
    }

    #[test]
    fn afh_map_updates() {
        let mut session = Session::new(SessionConfig::new(BdAddr::new(0x1234_5678)));
        let mut map = AfhMap::empty();
        map.set(40);
        assert_eq!(session.set_afh_map(map).unwrap(), DeviceCommand::SetAfhMap(map));
        assert_eq!(session.config().afh_map, Some(map));
        assert_eq!(session.hop_command(0), DeviceCommand::SetChannel(2442));

        assert!(session.set_afh_map(AfhMap::empty()).is_err());
        assert_eq!(session.config().afh_map, None);
        assert_eq!(session.hop_command(0), DeviceCommand::SetChannel(2462));

        session.set_afh_map(map).unwrap();
        assert_eq!(session.clear_afh_map(), DeviceCommand::ClearAfhMap);
        assert_eq!(session.kernel().used_channels(), 79);
    }

    #[test]
    fn packet_summary() {
        let pkt = RxPacket {
            channel: 7,
            lap: 0x9e8b33,
            ac_offset: 0,
            ac_errors: 1,
            clkn: 100,
            clk: 100,
            clk_offset: 2250,
            timestamp: 0,
            signal_dbm: -40,
            noise_dbm: -90,
            trim: None,
            commands: Vec::new(),
            symbols: vec![0; 10],
        };
        assert_eq!(pkt.snr(), 50);
        assert_eq!(
            pkt.to_string(),
            "ch= 7 LAP=9e8b33 err=1 clkn=100 clk_offset=2250 s=-40 n=-90 snr=50"
        );
        assert!(pkt.dewhitened().is_empty());
    }
}
