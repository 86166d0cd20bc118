use std::str::FromStr;

/// PN sequence used to scramble the sync word, host order.
const PN: u64 = 0x83848D96BBCC54FC;

/// BCH(64,30) generator polynomial, `g(D)` in octal.
const GENERATOR: u64 = 0o260534236651;

/// Barker extensions, host order. Chosen by LAP bit 23 so the tail of the sync
/// word stays DC-free.
const BARKER_A23_CLEAR: u64 = 0x2c;
const BARKER_A23_SET: u64 = 0x13;

/// A Bluetooth device address.
///
/// Only the lower 32 bits matter to the hop kernel, and only the lower 24
/// (the LAP) matter to the access code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BdAddr(u64);

impl BdAddr {
    /// Build an address from its 48-bit integer form. Upper bits are dropped.
    pub const fn new(addr: u64) -> Self {
        Self(addr & 0xffff_ffff_ffff)
    }

    /// Build an address from its parts.
    pub const fn from_parts(nap: u16, uap: u8, lap: u32) -> Self {
        Self(((nap as u64) << 32) | ((uap as u64) << 24) | (lap as u64 & 0xff_ffff))
    }

    /// The full 48-bit address.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Lower Address Part.
    pub const fn lap(&self) -> u32 {
        (self.0 & 0xff_ffff) as u32
    }

    /// Upper Address Part.
    pub const fn uap(&self) -> u8 {
        ((self.0 >> 24) & 0xff) as u8
    }

    /// Non-significant Address Part.
    pub const fn nap(&self) -> u16 {
        ((self.0 >> 32) & 0xffff) as u16
    }

    /// The sync word for this address's LAP.
    pub fn sync_word(&self) -> SyncWord {
        SyncWord::from_lap(self.lap())
    }
}

impl std::fmt::Display for BdAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[2], b[3], b[4], b[5], b[6], b[7]
        )
    }
}

/// Parse either `xx:xx:xx:xx:xx:xx` or a bare hex string (optionally prefixed
/// with `0x`). A bare 6-digit hex string is taken as just a LAP.
impl FromStr for BdAddr {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            let mut addr = 0u64;
            let mut count = 0;
            for part in s.split(':') {
                if part.len() != 2 {
                    return Err("Each address octet must be two hex digits");
                }
                let v = u8::from_str_radix(part, 16).map_err(|_| "Address octet isn't valid hex")?;
                addr = (addr << 8) | v as u64;
                count += 1;
            }
            if count != 6 {
                return Err("Address must have six octets");
            }
            return Ok(Self(addr));
        }
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if hex.is_empty() || hex.len() > 12 {
            return Err("Address must be 1-12 hex digits");
        }
        let addr = u64::from_str_radix(hex, 16).map_err(|_| "Address isn't valid hex")?;
        Ok(Self(addr))
    }
}

/// The 64-bit sync word at the head of every BR access code.
///
/// Stored in host order: bit 0 is the first bit transmitted over the air.
/// Bits 0-33 hold the BCH parity, bits 34-57 the LAP and bits 58-63 the
/// Barker extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SyncWord(u64);

impl SyncWord {
    /// Generate the sync word for a LAP.
    pub fn from_lap(lap: u32) -> Self {
        let lap = (lap & 0xff_ffff) as u64;
        let barker = if lap & 0x80_0000 == 0 {
            BARKER_A23_CLEAR
        } else {
            BARKER_A23_SET
        };
        let info = (lap | (barker << 24)) ^ (PN >> 34);
        let parity = poly_mod(info << 34, GENERATOR);
        Self(((info << 34) | parity) ^ PN)
    }

    /// Wrap a raw host-order sync word.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The host-order value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The sync word with the first air bit in the most significant position,
    /// which is how a shift register filled one symbol at a time sees it.
    pub const fn air_order(&self) -> u64 {
        self.0.reverse_bits()
    }

    /// Recover the LAP carried in this sync word.
    pub const fn lap(&self) -> u32 {
        ((self.0 >> 34) & 0xff_ffff) as u32
    }

    /// The sync word as 64 air-order symbols, one bit per byte.
    pub fn symbols(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        for (i, s) in out.iter_mut().enumerate() {
            *s = ((self.0 >> i) & 1) as u8;
        }
        out
    }

    /// Check whether the sync word is a valid codeword.
    pub fn is_valid(&self) -> bool {
        poly_mod(self.0 ^ PN, GENERATOR) == 0
    }
}

/// Remainder of GF(2) polynomial division, where bit `i` is the coefficient
/// of `D^i`.
fn poly_mod(mut a: u64, g: u64) -> u64 {
    let g_deg = 63 - g.leading_zeros();
    while a != 0 && 63 - a.leading_zeros() >= g_deg {
        a ^= g << (63 - a.leading_zeros() - g_deg);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parts() {
        let addr = BdAddr::new(0x0011_2233_4455);
        assert_eq!(addr.lap(), 0x33_4455);
        assert_eq!(addr.uap(), 0x22);
        assert_eq!(addr.nap(), 0x0011);
        assert_eq!(BdAddr::from_parts(0x0011, 0x22, 0x33_4455), addr);
    }

    #[test]
    fn parse_address() {
        let addr: BdAddr = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(addr.as_u64(), 0x0011_2233_4455);
        assert_eq!(addr.to_string(), "00:11:22:33:44:55");
        let lap: BdAddr = "9e8b33".parse().unwrap();
        assert_eq!(lap.lap(), 0x9e8b33);
        let hex: BdAddr = "0x12345678".parse().unwrap();
        assert_eq!(hex.as_u64(), 0x1234_5678);
        assert!("00:11:22:33:44".parse::<BdAddr>().is_err());
        assert!("00:11:22:33:44:5g".parse::<BdAddr>().is_err());
        assert!("".parse::<BdAddr>().is_err());
        assert!("1234567890abc".parse::<BdAddr>().is_err());
    }

    #[test]
    fn default_sync_word() {
        assert_eq!(SyncWord::from_lap(0).as_u64(), 0xb000_0002_c782_0e7e);
    }

    #[test]
    fn sync_word_carries_lap() {
        for lap in [0u32, 1, 0x9e8b33, 0x80_0000, 0xff_ffff, 0x12_3456] {
            let sw = SyncWord::from_lap(lap);
            assert_eq!(sw.lap(), lap);
            assert!(sw.is_valid());
        }
    }

    #[test]
    fn barker_tracks_lap_msb() {
        assert_eq!(SyncWord::from_lap(0x7f_ffff).as_u64() >> 58, 0x2c);
        assert_eq!(SyncWord::from_lap(0x80_0000).as_u64() >> 58, 0x13);
    }

    #[test]
    fn sync_word_is_affine_in_lap() {
        // Codeword generation is linear, so the PN offset cancels in pairs.
        let z = SyncWord::from_lap(0).as_u64();
        let a = SyncWord::from_lap(0x00_0f00).as_u64();
        let b = SyncWord::from_lap(0x00_00f0).as_u64();
        let ab = SyncWord::from_lap(0x00_0ff0).as_u64();
        assert_eq!(a ^ b ^ z, ab);
    }

    #[test]
    fn corrupted_sync_word_is_invalid() {
        let sw = SyncWord::from_lap(0x9e8b33);
        assert!(!SyncWord::from_raw(sw.as_u64() ^ (1 << 17)).is_valid());
    }

    #[test]
    fn symbols_are_air_order() {
        let sw = SyncWord::from_lap(0x9e8b33);
        let syms = sw.symbols();
        let mut reg = 0u64;
        for &s in syms.iter() {
            reg = (reg << 1) | s as u64;
        }
        assert_eq!(reg, sw.air_order());
    }
}
