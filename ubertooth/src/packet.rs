//! Packets received from the Ubertooth.
//!
//! The radio hands back fixed 64-byte records over its bulk endpoint. Each
//! carries a small header (type, status flags, channel, timestamps, RSSI
//! summary) and 50 bytes of raw demodulated symbols, 400 symbols in all.

use bytemuck::{Pod, Zeroable};

use crate::Error;
use crate::bluetooth::hop::NUM_BREDR_CHANNELS;
use crate::consts::{BANK_LEN, DMA_SIZE, PKT_LEN};

/// The DMA buffer overflowed.
pub const STATUS_DMA_OVERFLOW: u8 = 0x01;
/// DMA error.
pub const STATUS_DMA_ERROR: u8 = 0x02;
/// The radio's receive FIFO overflowed.
pub const STATUS_FIFO_OVERFLOW: u8 = 0x04;
/// Carrier sense triggered the capture.
pub const STATUS_CS_TRIGGER: u8 = 0x08;
/// An RSSI threshold triggered the capture.
pub const STATUS_RSSI_TRIGGER: u8 = 0x10;
/// The firmware marked this record as not worth looking at.
pub const STATUS_DISCARD: u8 = 0x20;

/// Kind of data carried in a received record.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// Basic-rate symbols.
    Br,
    Le,
    Message,
    KeepAlive,
    Specan,
    LePromisc,
    Ego,
    Unknown(u8),
}

impl PacketType {
    fn from_u8(v: u8) -> Self {
        use PacketType::*;
        match v {
            0 => Br,
            1 => Le,
            2 => Message,
            3 => KeepAlive,
            4 => Specan,
            5 => LePromisc,
            6 => Ego,
            v => Unknown(v),
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Br => f.write_str("BR"),
            Self::Le => f.write_str("LE"),
            Self::Message => f.write_str("message"),
            Self::KeepAlive => f.write_str("keep-alive"),
            Self::Specan => f.write_str("spectrum analyzer"),
            Self::LePromisc => f.write_str("LE promiscuous"),
            Self::Ego => f.write_str("E-GO"),
            Self::Unknown(v) => write!(f, "unknown (0x{:x})", v),
        }
    }
}

/// Raw `usb_pkt_rx` record, exactly as it comes off the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, Zeroable, Pod)]
pub(crate) struct UsbPktRx {
    pkt_type: u8,
    status: u8,
    channel: u8,
    clkn_high: u8,
    clk100ns: u32,
    rssi_max: i8,
    rssi_min: i8,
    rssi_avg: i8,
    rssi_count: u8,
    reserved: [u8; 2],
    data: [u8; DMA_SIZE],
}

const _: () = assert!(size_of::<UsbPktRx>() == PKT_LEN);

/// One decoded 64-byte receive record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapturedBlock {
    /// What kind of data the record holds.
    pub pkt_type: PacketType,
    /// Status flags, see the `STATUS_*` constants.
    pub status: u8,
    /// Channel the symbols were captured on.
    pub channel: u8,
    /// Bits 27-20 of the radio's native clock.
    pub clkn_high: u8,
    /// The radio's 100 ns counter at the start of capture.
    pub clk100ns: u32,
    /// Highest raw RSSI seen during capture.
    pub rssi_max: i8,
    /// Lowest raw RSSI seen during capture.
    pub rssi_min: i8,
    /// Average raw RSSI during capture.
    pub rssi_avg: i8,
    /// Number of RSSI samples; 0 means the RSSI fields are meaningless.
    pub rssi_count: u8,
    /// Packed symbols, first symbol in the most significant bit.
    pub data: [u8; DMA_SIZE],
}

impl CapturedBlock {
    /// Decode a single 64-byte record.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != PKT_LEN {
            return Err(Error::ReturnData);
        }
        let raw: UsbPktRx = bytemuck::pod_read_unaligned(bytes);
        Ok(Self {
            pkt_type: PacketType::from_u8(raw.pkt_type),
            status: raw.status,
            channel: raw.channel,
            clkn_high: raw.clkn_high,
            clk100ns: u32::from_le(raw.clk100ns),
            rssi_max: raw.rssi_max,
            rssi_min: raw.rssi_min,
            rssi_avg: raw.rssi_avg,
            rssi_count: raw.rssi_count,
            data: raw.data,
        })
    }

    /// Decode every record in a bulk transfer.
    ///
    /// Fails if the transfer isn't a whole number of records.
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<Self>, Error> {
        if bytes.len() % PKT_LEN != 0 {
            return Err(Error::ReturnData);
        }
        bytes.chunks_exact(PKT_LEN).map(Self::from_bytes).collect()
    }

    /// Encode back into the 64-byte wire form.
    pub fn to_bytes(&self) -> [u8; PKT_LEN] {
        let raw = UsbPktRx {
            pkt_type: match self.pkt_type {
                PacketType::Br => 0,
                PacketType::Le => 1,
                PacketType::Message => 2,
                PacketType::KeepAlive => 3,
                PacketType::Specan => 4,
                PacketType::LePromisc => 5,
                PacketType::Ego => 6,
                PacketType::Unknown(v) => v,
            },
            status: self.status,
            channel: self.channel,
            clkn_high: self.clkn_high,
            clk100ns: self.clk100ns.to_le(),
            rssi_max: self.rssi_max,
            rssi_min: self.rssi_min,
            rssi_avg: self.rssi_avg,
            rssi_count: self.rssi_count,
            reserved: [0; 2],
            data: self.data,
        };
        bytemuck::cast(raw)
    }

    /// Whether the firmware flagged this record to be dropped.
    pub fn is_discarded(&self) -> bool {
        self.status & STATUS_DISCARD != 0
    }

    /// Whether this is a basic-rate capture worth searching for an access code.
    pub fn is_valid_br(&self) -> bool {
        self.pkt_type == PacketType::Br
            && !self.is_discarded()
            && (self.channel as usize) < NUM_BREDR_CHANNELS
    }

    /// Unpack the symbols, one per byte.
    pub fn symbols(&self) -> [u8; BANK_LEN] {
        unpack_symbols(&self.data)
    }
}

/// Unpack 50 DMA bytes into 400 symbols, most significant bit first.
pub fn unpack_symbols(data: &[u8; DMA_SIZE]) -> [u8; BANK_LEN] {
    let mut out = [0u8; BANK_LEN];
    for (chunk, &byte) in out.chunks_exact_mut(8).zip(data.iter()) {
        for (i, s) in chunk.iter_mut().enumerate() {
            *s = (byte >> (7 - i)) & 1;
        }
    }
    out
}

/// Convert a raw CC2400 RSSI reading to dBm.
///
/// Piecewise-linear fit of the radio's 1 Mbps RSSI curve.
pub fn rssi_to_dbm(rssi: i8) -> i8 {
    let rssi = rssi as i32;
    let dbm = if rssi < -48 {
        -120
    } else if rssi <= -45 {
        6 * (rssi + 28)
    } else if rssi <= 30 {
        99 * (rssi - 62) / 110
    } else if rssi <= 35 {
        60 * (rssi - 35) / 11
    } else {
        0
    };
    dbm as i8
}

const RSSI_HISTORY_LEN: usize = 10;

/// Recent peak RSSI on each channel, used to estimate signal and noise
/// levels for a received packet.
///
/// A packet's energy can straddle several records on the same channel, so
/// the signal estimate is the highest peak over the last few records there.
#[derive(Clone, Debug)]
pub struct RssiHistory {
    history: [[i8; RSSI_HISTORY_LEN]; NUM_BREDR_CHANNELS],
}

impl Default for RssiHistory {
    fn default() -> Self {
        Self {
            history: [[i8::MIN; RSSI_HISTORY_LEN]; NUM_BREDR_CHANNELS],
        }
    }
}

impl RssiHistory {
    /// Start with an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block's peak RSSI and get back `(signal, noise)` in dBm.
    ///
    /// Blocks on out-of-range channels aren't recorded, and only their own
    /// RSSI is used.
    pub fn update(&mut self, block: &CapturedBlock) -> (i8, i8) {
        let noise = rssi_to_dbm(block.rssi_avg);
        let Some(hist) = self.history.get_mut(block.channel as usize) else {
            return (rssi_to_dbm(block.rssi_max), noise);
        };
        hist.rotate_left(1);
        hist[RSSI_HISTORY_LEN - 1] = block.rssi_max;
        let peak = hist.iter().copied().max().unwrap_or(block.rssi_max);
        (rssi_to_dbm(peak), noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_record() -> [u8; PKT_LEN] {
        let mut b = [0u8; PKT_LEN];
        b[0] = 0; // BR
        b[1] = STATUS_RSSI_TRIGGER;
        b[2] = 39;
        b[3] = 0x12;
        b[4..8].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        b[8] = (-20i8) as u8;
        b[9] = (-60i8) as u8;
        b[10] = (-40i8) as u8;
        b[11] = 5;
        b[14] = 0b1010_0000;
        b[63] = 0x01;
        b
    }

    #[test]
    fn decode_record() {
        let block = CapturedBlock::from_bytes(&raw_record()).unwrap();
        assert_eq!(block.pkt_type, PacketType::Br);
        assert_eq!(block.status, STATUS_RSSI_TRIGGER);
        assert_eq!(block.channel, 39);
        assert_eq!(block.clkn_high, 0x12);
        assert_eq!(block.clk100ns, 0x1234_5678);
        assert_eq!(block.rssi_max, -20);
        assert_eq!(block.rssi_min, -60);
        assert_eq!(block.rssi_avg, -40);
        assert_eq!(block.rssi_count, 5);
        assert_eq!(block.data[0], 0b1010_0000);
        assert_eq!(block.data[49], 0x01);
        assert!(block.is_valid_br());
        assert_eq!(block.to_bytes(), raw_record());
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(matches!(
            CapturedBlock::from_bytes(&[0u8; 63]),
            Err(Error::ReturnData)
        ));
        assert!(matches!(
            CapturedBlock::parse_all(&[0u8; 65]),
            Err(Error::ReturnData)
        ));
    }

    #[test]
    fn parse_transfer() {
        let mut buf = Vec::new();
        for ch in 0..4u8 {
            let mut rec = raw_record();
            rec[2] = ch;
            buf.extend_from_slice(&rec);
        }
        let blocks = CapturedBlock::parse_all(&buf).unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3].channel, 3);
        assert!(CapturedBlock::parse_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn sanity_filter() {
        let mut block = CapturedBlock::from_bytes(&raw_record()).unwrap();
        block.status |= STATUS_DISCARD;
        assert!(block.is_discarded());
        assert!(!block.is_valid_br());

        let mut block = CapturedBlock::from_bytes(&raw_record()).unwrap();
        block.channel = 79;
        assert!(!block.is_valid_br());

        let mut rec = raw_record();
        rec[0] = 1;
        let block = CapturedBlock::from_bytes(&rec).unwrap();
        assert_eq!(block.pkt_type, PacketType::Le);
        assert!(!block.is_valid_br());

        rec[0] = 0x42;
        let block = CapturedBlock::from_bytes(&rec).unwrap();
        assert_eq!(block.pkt_type, PacketType::Unknown(0x42));
        assert_eq!(block.to_bytes()[0], 0x42);
    }

    #[test]
    fn unpack_msb_first() {
        let mut data = [0u8; DMA_SIZE];
        data[0] = 0b1000_0001;
        data[49] = 0b0100_0000;
        let syms = unpack_symbols(&data);
        assert_eq!(&syms[..8], &[1, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(syms[393], 1);
        assert_eq!(syms.iter().filter(|&&s| s == 1).count(), 3);
    }

    #[test]
    fn rssi_curve() {
        assert_eq!(rssi_to_dbm(-128), -120);
        assert_eq!(rssi_to_dbm(-49), -120);
        assert_eq!(rssi_to_dbm(-48), -120);
        assert_eq!(rssi_to_dbm(-45), -102);
        assert_eq!(rssi_to_dbm(-44), -95);
        assert_eq!(rssi_to_dbm(0), -55);
        assert_eq!(rssi_to_dbm(30), -28);
        assert_eq!(rssi_to_dbm(31), -21);
        assert_eq!(rssi_to_dbm(35), 0);
        assert_eq!(rssi_to_dbm(127), 0);
    }

    #[test]
    fn signal_uses_recent_peak() {
        let mut hist = RssiHistory::new();
        let mut block = CapturedBlock::from_bytes(&raw_record()).unwrap();
        block.rssi_max = 10;
        block.rssi_avg = -44;
        assert_eq!(hist.update(&block), (rssi_to_dbm(10), -95));

        // A quieter block on the same channel still reports the earlier peak
        block.rssi_max = -30;
        assert_eq!(hist.update(&block).0, rssi_to_dbm(10));

        // Another channel has its own history
        block.channel = 2;
        assert_eq!(hist.update(&block).0, rssi_to_dbm(-30));

        // The peak ages out after ten blocks
        block.channel = 39;
        for _ in 0..9 {
            block.rssi_max = -30;
            hist.update(&block);
        }
        assert_eq!(hist.update(&block).0, rssi_to_dbm(-30));

        // Out-of-range channels don't touch the history
        block.channel = 200;
        block.rssi_max = 20;
        assert_eq!(hist.update(&block).0, rssi_to_dbm(20));
    }
}
