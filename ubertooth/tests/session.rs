use ubertooth::bluetooth::{BdAddr, SyncWord, TrimAction, TrimConfig, whiten};
use ubertooth::clock::{CLKN_MASK, clkn_at};
use ubertooth::packet::{PacketType, STATUS_DISCARD};
use ubertooth::{CapturedBlock, DeviceCommand, Session, SessionConfig};

const LAP: u32 = 0x9e8b33;
const SLOT: i64 = 6250;

fn address() -> BdAddr {
    BdAddr::from_parts(0x0011, 0x22, LAP)
}

fn pack(symbols: &[u8]) -> [u8; 50] {
    let mut data = [0u8; 50];
    for (byte, chunk) in data.iter_mut().zip(symbols.chunks(8)) {
        *byte = chunk.iter().fold(0u8, |acc, &s| (acc << 1) | (s & 1));
    }
    data
}

/// Alternating filler never gets near a real sync word.
fn filler() -> Vec<u8> {
    (0..400).map(|i| (i / 3 % 2) as u8).collect()
}

fn block_with(symbols: &[u8], channel: u8, clkn_high: u8, clk100ns: u32) -> CapturedBlock {
    CapturedBlock {
        pkt_type: PacketType::Br,
        status: 0,
        channel,
        clkn_high,
        clk100ns,
        rssi_max: 10,
        rssi_min: -40,
        rssi_avg: -30,
        rssi_count: 20,
        data: pack(symbols),
    }
}

/// A record holding the access code at `at`, timed so the slot error is `err`.
///
/// `slot` moves the capture forward in whole slots.
fn block_at(lap: u32, at: usize, err: i64, slot: u32) -> CapturedBlock {
    let mut syms = filler();
    syms[at..at + 64].copy_from_slice(&SyncWord::from_lap(lap).symbols());
    let clk100ns = 100_000 * SLOT as u32 + slot * SLOT as u32 + (err - 10 * at as i64).rem_euclid(SLOT) as u32;
    block_with(&syms, 17, 3, clk100ns)
}

#[test]
fn follows_and_trims() {
    let mut session = Session::new(SessionConfig::new(address()));

    // First sighting calibrates straight away
    let pkt = session.process(&block_at(LAP, 100, 0, 0)).unwrap();
    assert_eq!(pkt.lap, LAP);
    assert_eq!(pkt.ac_offset, 100);
    assert_eq!(pkt.ac_errors, 0);
    assert_eq!(pkt.channel, 17);
    assert_eq!(pkt.clk_offset, 2250);
    assert_eq!(
        pkt.trim,
        Some(TrimAction::Trim {
            offset: 0,
            drift_ppm: None
        })
    );
    assert_eq!(pkt.commands, [DeviceCommand::TrimClock(0)]);
    let first_clkn = pkt.clkn;

    // On time: nothing to do
    let pkt = session.process(&block_at(LAP, 40, 150, 10)).unwrap();
    assert_eq!(pkt.trim, Some(TrimAction::Stable));
    assert!(pkt.commands.is_empty());

    // Late for long enough to act on
    let pkt = session.process(&block_at(LAP, 200, 500, 20)).unwrap();
    assert_eq!(pkt.trim, Some(TrimAction::Pending { counter: 1 }));
    let pkt = session.process(&block_at(LAP, 200, 500, 30)).unwrap();
    assert_eq!(pkt.trim, Some(TrimAction::Pending { counter: 2 }));
    let pkt = session.process(&block_at(LAP, 200, 500, 40)).unwrap();
    assert_eq!(pkt.trim, Some(TrimAction::Pending { counter: 3 }));
    assert!(pkt.commands.is_empty());
    let block = block_at(LAP, 200, 500, 40_000);
    let pkt = session.process(&block).unwrap();
    let clkn = clkn_at(block.clkn_high, block.clk100ns, 200);
    assert_eq!(pkt.clkn, clkn);
    let ppm = (500 * 320 / clkn.wrapping_sub(first_clkn) as i32) as i16;
    assert!(ppm > 0);
    assert_eq!(
        pkt.commands,
        [
            DeviceCommand::TrimClock(500),
            DeviceCommand::FixClockDrift(ppm)
        ]
    );

    let stats = session.stats();
    assert_eq!(stats.blocks, 6);
    assert_eq!(stats.found, 6);
    assert_eq!(stats.trims, 2);
    assert!(session.trim().is_calibrated());
}

#[test]
fn skips_unusable_records() {
    let mut session = Session::new(SessionConfig::new(address()));

    let mut block = block_at(LAP, 100, 0, 0);
    block.status = STATUS_DISCARD;
    assert!(session.process(&block).is_none());

    let mut block = block_at(LAP, 100, 0, 0);
    block.pkt_type = PacketType::Le;
    assert!(session.process(&block).is_none());

    let mut block = block_at(LAP, 100, 0, 0);
    block.channel = 80;
    assert!(session.process(&block).is_none());

    assert!(session.process(&block_at(0x12_3456, 100, 0, 0)).is_none());
    assert!(session.process(&block_with(&filler(), 5, 0, 0)).is_none());

    let stats = session.stats();
    assert_eq!(stats.blocks, 5);
    assert_eq!(stats.valid, 2);
    assert_eq!(stats.found, 0);
    assert!(!session.trim().is_calibrated());
}

#[test]
fn trim_can_be_disabled() {
    let mut config = SessionConfig::new(address());
    config.trim = false;
    let mut session = Session::new(config);
    for slot in 0..5 {
        let pkt = session.process(&block_at(LAP, 60, 1500, slot * 10)).unwrap();
        assert_eq!(pkt.trim, None);
        assert!(pkt.commands.is_empty());
    }
    assert!(!session.trim().is_calibrated());
}

#[test]
fn custom_trim_threshold() {
    let mut config = SessionConfig::new(address());
    config.trim_config = TrimConfig {
        threshold: 0,
        ..Default::default()
    };
    let mut session = Session::new(config);
    session.process(&block_at(LAP, 60, 0, 0)).unwrap();
    let pkt = session.process(&block_at(LAP, 60, -400, 100)).unwrap();
    assert_eq!(pkt.trim, Some(TrimAction::Pending { counter: -1 }));
    let pkt = session.process(&block_at(LAP, 60, -400, 110)).unwrap();
    assert!(matches!(
        pkt.trim,
        Some(TrimAction::Trim {
            offset: 5850,
            drift_ppm: Some(_)
        })
    ));
}

#[test]
fn reset_drops_calibration() {
    let mut session = Session::new(SessionConfig::new(address()));
    session.process(&block_at(LAP, 60, 0, 0)).unwrap();
    session.reset_trim();
    let pkt = session.process(&block_at(LAP, 60, 700, 100)).unwrap();
    assert_eq!(
        pkt.trim,
        Some(TrimAction::Trim {
            offset: 700,
            drift_ppm: None
        })
    );
}

#[test]
fn tolerates_a_bit_error() {
    let mut block = block_at(LAP, 100, 0, 0);
    let mut syms = block.symbols();
    syms[100 + 30] ^= 1;
    block.data = pack(&syms);

    let mut session = Session::new(SessionConfig::new(address()));
    let pkt = session.process(&block).unwrap();
    assert_eq!(pkt.ac_errors, 1);

    let mut strict = SessionConfig::new(address());
    strict.max_ac_errors = 1;
    assert!(Session::new(strict).process(&block).is_none());
}

#[test]
fn timestamps_survive_rollover() {
    let mut session = Session::new(SessionConfig::new(address()));
    let mut syms = filler();
    syms[10..74].copy_from_slice(&SyncWord::from_lap(LAP).symbols());

    let a = session
        .process(&block_with(&syms, 1, 0, u32::MAX - 1000))
        .unwrap();
    let b = session.process(&block_with(&syms, 1, 0, 500)).unwrap();
    assert_eq!(a.timestamp, (u32::MAX - 1000) as u64);
    assert_eq!(b.timestamp, (1u64 << 32) + 500);
}

#[test]
fn signal_and_noise() {
    let mut session = Session::new(SessionConfig::new(address()));
    let pkt = session.process(&block_at(LAP, 100, 0, 0)).unwrap();
    assert_eq!(pkt.signal_dbm, ubertooth::packet::rssi_to_dbm(10));
    assert_eq!(pkt.noise_dbm, ubertooth::packet::rssi_to_dbm(-30));
    assert!(pkt.snr() > 0);
}

#[test]
fn payload_dewhitens() {
    let at = 20;
    let mut syms = filler();
    syms[at..at + 64].copy_from_slice(&SyncWord::from_lap(LAP).symbols());
    let clk100ns = 123_456_789;
    let clkn = clkn_at(4, clk100ns, at);

    let payload: Vec<u8> = (0..100).map(|i| ((i * 5) % 7 < 3) as u8).collect();
    let start = at + 68;
    syms[start..start + payload.len()].copy_from_slice(&whiten(&payload, clkn, 0));

    let mut session = Session::new(SessionConfig::new(address()));
    let pkt = session.process(&block_with(&syms, 9, 4, clk100ns)).unwrap();
    assert_eq!(pkt.clkn, clkn);
    assert_eq!(pkt.symbols.len(), 400 - at);
    assert_eq!(&pkt.dewhitened()[..payload.len()], &payload[..]);
}

#[test]
fn hopping_with_afh() {
    let mut config = SessionConfig::new(BdAddr::new(0x1234_5678));
    config.afh_map = Some("ffff0000000000000000".parse().unwrap());
    let session = Session::new(config);
    let hops: Vec<DeviceCommand> = (0..8).map(|clk| session.hop_command(clk)).collect();
    let expect: Vec<DeviceCommand> = [2415, 2415, 2407, 2407, 2402, 2402, 2406, 2406]
        .into_iter()
        .map(DeviceCommand::SetChannel)
        .collect();
    assert_eq!(hops, expect);
}

fn quiet_block(slot: u32) -> CapturedBlock {
    block_with(&filler(), 12, 3, 100_000 * SLOT as u32 + slot * SLOT as u32)
}

#[test]
fn restarts_hopping_after_losing_the_piconet() {
    let mut config = SessionConfig::new(address());
    config.clkn_offset = Some(0x100);
    config.lost_after = 3;
    let mut session = Session::new(config);

    let start = session.start_commands(0);
    assert_eq!(
        start[1],
        DeviceCommand::StartHopping {
            clkn_offset: 0x100,
            clk100ns_offset: 0
        }
    );
    session.process(&block_at(LAP, 100, 0, 0)).unwrap();
    assert!(session.trim().is_calibrated());

    for slot in [500, 510] {
        assert!(session.process(&quiet_block(slot)).is_none());
    }
    assert_eq!(session.drain_commands().count(), 0);

    let quiet = quiet_block(520);
    assert!(session.process(&quiet).is_none());
    let clk = clkn_at(quiet.clkn_high, quiet.clk100ns, 0).wrapping_add(0x100) & CLKN_MASK;
    let expect = vec![
        session.hop_command(clk),
        DeviceCommand::StartHopping {
            clkn_offset: 0x100,
            clk100ns_offset: 0,
        },
    ];
    assert_eq!(session.drain_commands().collect::<Vec<_>>(), expect);
    assert_eq!(session.drain_commands().count(), 0);
    assert!(!session.trim().is_calibrated());
    assert_eq!(session.stats().losses, 1);

    // Found again: the first sighting recalibrates
    let pkt = session.process(&block_at(LAP, 100, 300, 600)).unwrap();
    assert_eq!(
        pkt.trim,
        Some(TrimAction::Trim {
            offset: 300,
            drift_ppm: None
        })
    );
    assert_eq!(pkt.clk, pkt.clkn.wrapping_add(0x100) & CLKN_MASK);
}

#[test]
fn found_packets_hold_off_loss() {
    let mut config = SessionConfig::new(address());
    config.lost_after = 3;
    let mut session = Session::new(config);
    session.process(&block_at(LAP, 100, 0, 0)).unwrap();

    for round in 0..4 {
        for slot in 0..2 {
            assert!(session.process(&quiet_block(round * 100 + slot * 10)).is_none());
        }
        session.process(&block_at(LAP, 100, 0, round * 100 + 50)).unwrap();
    }
    assert_eq!(session.stats().losses, 0);
    assert!(session.trim().is_calibrated());

    // Without a clock offset, losing the piconet only drops calibration
    for slot in 0..3 {
        session.process(&quiet_block(1000 + slot * 10));
    }
    assert_eq!(session.stats().losses, 1);
    assert_eq!(session.drain_commands().count(), 0);
    assert!(!session.trim().is_calibrated());
}
