//! Bluetooth BR frequency hopping.
//!
//! The hop kernel maps a piconet master's address and clock to one of the 79
//! basic-rate channels, 2402 MHz to 2480 MHz. Everything that depends only on
//! the address is worked out once in [`HopKernel::new`]; after that,
//! [`HopKernel::next_hop`] is a handful of shifts plus a 14-stage butterfly.
//!
//! When Adaptive Frequency Hopping is active, the same selection runs over the
//! subset of channels marked as used in an [`AfhMap`].
//!
//! ```
//! use ubertooth::bluetooth::{BdAddr, HopKernel};
//!
//! let kernel = HopKernel::new(BdAddr::new(0x1234_5678), None);
//! assert_eq!(kernel.next_hop(0), 2462);
//! ```

use tracing::warn;

use crate::Error;
use crate::bluetooth::BdAddr;

/// Number of basic-rate channels.
pub const NUM_BREDR_CHANNELS: usize = 79;

/// Frequency of channel 0, in MHz.
pub const BASE_FREQ_MHZ: u16 = 2402;

/// Butterfly stage inputs. Stage `i` swaps bits `INDEX1[i]` and `INDEX2[i]`
/// when control bit `i` is set.
const INDEX1: [u8; 14] = [0, 2, 1, 3, 0, 1, 0, 3, 1, 0, 2, 1, 0, 1];
const INDEX2: [u8; 14] = [1, 3, 2, 4, 4, 3, 2, 4, 4, 3, 4, 3, 3, 2];

/// An AFH channel map.
///
/// Bit `n % 8` of byte `n / 8` is set when channel `n` is in use. The top bit
/// of the last byte would be channel 79, which doesn't exist, and is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AfhMap([u8; 10]);

impl Default for AfhMap {
    /// All 79 channels in use.
    fn default() -> Self {
        let mut map = [0xff; 10];
        map[9] = 0x7f;
        Self(map)
    }
}

impl AfhMap {
    /// A map with every channel unused.
    pub const fn empty() -> Self {
        Self([0; 10])
    }

    /// Wrap the raw map bytes, as carried over the air and over USB.
    pub const fn from_bytes(bytes: [u8; 10]) -> Self {
        Self(bytes)
    }

    /// The raw map bytes.
    pub const fn as_bytes(&self) -> &[u8; 10] {
        &self.0
    }

    /// Check if a channel is in use. Channels past 78 never are.
    pub fn is_used(&self, channel: u8) -> bool {
        (channel as usize) < NUM_BREDR_CHANNELS && self.0[channel as usize / 8] & (1 << (channel % 8)) != 0
    }

    /// Mark a channel as used. Channels past 78 are ignored.
    pub fn set(&mut self, channel: u8) {
        if (channel as usize) < NUM_BREDR_CHANNELS {
            self.0[channel as usize / 8] |= 1 << (channel % 8);
        }
    }

    /// Mark a channel as unused.
    pub fn clear(&mut self, channel: u8) {
        if (channel as usize) < NUM_BREDR_CHANNELS {
            self.0[channel as usize / 8] &= !(1 << (channel % 8));
        }
    }

    /// Count of channels in use.
    pub fn used_channels(&self) -> usize {
        let mut count: usize = self.0[..9].iter().map(|b| b.count_ones() as usize).sum();
        count += (self.0[9] & 0x7f).count_ones() as usize;
        count
    }
}

impl std::fmt::Display for AfhMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Parse 20 hex digits, byte 0 first, as printed by [`Display`][std::fmt::Display].
impl std::str::FromStr for AfhMap {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 20 || !s.is_ascii() {
            return Err("AFH map must be exactly 20 hex digits");
        }
        let mut map = [0u8; 10];
        for (i, b) in map.iter_mut().enumerate() {
            *b = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
                .map_err(|_| "AFH map isn't valid hex")?;
        }
        Ok(Self(map))
    }
}

/// 5-bit permutation used for hop selection.
///
/// `z` is the 5-bit input word. The 14 control bits come from the low 9 bits of
/// `p_low` (stages 0-8) and the low 5 bits of `p_high` (stages 9-13). Stages
/// run from 13 down to 0.
pub fn perm5(z: u8, p_high: u8, p_low: u16) -> u8 {
    let control = (p_low as u32 & 0x1ff) | ((p_high as u32 & 0x1f) << 9);
    let mut z_bit = [0u8; 5];
    for (i, b) in z_bit.iter_mut().enumerate() {
        *b = (z >> i) & 1;
    }
    for i in (0..14).rev() {
        if control & (1 << i) != 0 {
            z_bit.swap(INDEX1[i] as usize, INDEX2[i] as usize);
        }
    }
    z_bit
        .iter()
        .enumerate()
        .fold(0, |acc, (i, &b)| acc | (b << i))
}

/// Per-address hop selection state.
///
/// Holds the address-derived constants and the channel bank, plus the reduced
/// bank when AFH is in effect. Once built it's read-only, so it can be shared
/// freely between threads.
#[derive(Clone, Debug)]
pub struct HopKernel {
    address: BdAddr,
    a1: u32,
    b: u32,
    c1: u32,
    d1: u32,
    e: u32,
    bank: [u8; NUM_BREDR_CHANNELS],
    afh: Option<(AfhMap, Vec<u8>)>,
}

impl HopKernel {
    /// Set up the hop kernel for a piconet master's address.
    ///
    /// If `afh_map` has no used channels, it's ignored and the kernel hops over
    /// the full channel set instead.
    pub fn new(address: BdAddr, afh_map: Option<AfhMap>) -> Self {
        let addr = address.as_u64() as u32;
        let mut bank = [0u8; NUM_BREDR_CHANNELS];
        for (i, ch) in bank.iter_mut().enumerate() {
            *ch = ((i * 2) % NUM_BREDR_CHANNELS) as u8;
        }
        let mut kernel = Self {
            address,
            a1: (addr >> 23) & 0x1f,
            b: (addr >> 19) & 0x0f,
            c1: ((addr >> 4) & 0x10)
                + ((addr >> 3) & 0x08)
                + ((addr >> 2) & 0x04)
                + ((addr >> 1) & 0x02)
                + (addr & 0x01),
            d1: (addr >> 10) & 0x1ff,
            e: ((addr >> 7) & 0x40)
                + ((addr >> 6) & 0x20)
                + ((addr >> 5) & 0x10)
                + ((addr >> 4) & 0x08)
                + ((addr >> 3) & 0x04)
                + ((addr >> 2) & 0x02)
                + ((addr >> 1) & 0x01),
            bank,
            afh: None,
        };
        if let Some(map) = afh_map {
            if let Err(e) = kernel.set_afh_map(map) {
                warn!("Ignoring AFH map {map}: {e}");
            }
        }
        kernel
    }

    /// The address this kernel hops for.
    pub fn address(&self) -> BdAddr {
        self.address
    }

    /// The current AFH map, if AFH is active.
    pub fn afh_map(&self) -> Option<&AfhMap> {
        self.afh.as_ref().map(|(map, _)| map)
    }

    /// Number of channels being hopped over.
    pub fn used_channels(&self) -> usize {
        self.afh
            .as_ref()
            .map_or(NUM_BREDR_CHANNELS, |(_, bank)| bank.len())
    }

    /// Switch to adaptive hopping over the channels marked in `map`.
    ///
    /// A map with no used channels is rejected with
    /// [`Error::InvalidParameter`], and the kernel goes back to hopping over
    /// all channels.
    pub fn set_afh_map(&mut self, map: AfhMap) -> Result<(), Error> {
        let afh_bank: Vec<u8> = self
            .bank
            .iter()
            .copied()
            .filter(|&ch| map.is_used(ch))
            .collect();
        if afh_bank.is_empty() {
            self.afh = None;
            return Err(Error::InvalidParameter("AFH map has no used channels"));
        }
        self.afh = Some((map, afh_bank));
        Ok(())
    }

    /// Drop the AFH map and hop over all 79 channels.
    pub fn clear_afh_map(&mut self) {
        self.afh = None;
    }

    /// Channel index (0-78) for a given master clock.
    pub fn channel(&self, clock: u32) -> u8 {
        let x = (clock >> 2) & 0x1f;
        let y1 = (clock >> 1) & 0x01;
        let y2 = y1 << 5;
        let a = (self.a1 ^ (clock >> 21)) & 0x1f;
        let c = (self.c1 ^ (clock >> 16)) & 0x1f;
        let d = (self.d1 ^ (clock >> 7)) & 0x1ff;
        let base_f = (clock >> 3) & 0x1ff_fff0;

        let perm = perm5(
            ((((x + a) % 32) ^ self.b) & 0x1f) as u8,
            ((y1 * 0x1f) ^ c) as u8,
            d as u16,
        ) as u32;

        match &self.afh {
            None => {
                let f = base_f % NUM_BREDR_CHANNELS as u32;
                let idx = (perm + self.e + f + y2) % NUM_BREDR_CHANNELS as u32;
                self.bank[idx as usize]
            }
            Some((_, afh_bank)) => {
                let used = afh_bank.len() as u32;
                let idx = (perm + self.e + (base_f % used) + y2) % used;
                afh_bank[idx as usize]
            }
        }
    }

    /// Frequency in MHz (2402-2480) for a given master clock.
    pub fn next_hop(&self, clock: u32) -> u16 {
        BASE_FREQ_MHZ + self.channel(clock) as u16
    }
}
