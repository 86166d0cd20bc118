//! Access code search.
//!
//! Every BR packet opens with a 72-bit access code whose middle 64 bits are
//! the [`SyncWord`] for the piconet's LAP. Finding it in a stream of raw
//! demodulated symbols tells us where the packet starts, and from that, where
//! the capture sits relative to the master's slot boundary.

use tracing::trace;

use crate::bluetooth::SyncWord;

/// Default number of bit errors tolerated: a match must have fewer than this
/// many bits different from the sync word.
pub const MAX_SYNCWORD_ERRS: u32 = 2;

/// Sync word length in symbols.
pub const SYNC_WORD_LEN: usize = 64;

/// A located access code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcMatch {
    /// Symbol offset of the first sync word bit.
    pub offset: usize,
    /// Number of bits that differed from the expected sync word.
    pub errors: u32,
}

/// No access code was found in the searched symbols.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Access code not found")]
pub struct AccessCodeNotFound;

/// Searches symbol streams for one piconet's sync word.
///
/// Each search is independent; nothing carries over between calls.
#[derive(Clone, Copy, Debug)]
pub struct Correlator {
    sync_word: SyncWord,
    target: u64,
    max_errors: u32,
}

impl Correlator {
    /// Make a correlator that accepts any window with fewer than `max_errors`
    /// bit errors.
    pub fn new(sync_word: SyncWord, max_errors: u32) -> Self {
        Self {
            sync_word,
            target: sync_word.air_order(),
            max_errors,
        }
    }

    /// The sync word being searched for.
    pub fn sync_word(&self) -> SyncWord {
        self.sync_word
    }

    /// The error tolerance.
    pub fn max_errors(&self) -> u32 {
        self.max_errors
    }

    /// Search unpacked symbols, one bit per byte, for the sync word.
    ///
    /// Returns the earliest offset whose 64-symbol window is within the
    /// tolerance.
    pub fn find_access_code(&self, symbols: &[u8]) -> Result<AcMatch, AccessCodeNotFound> {
        self.search(symbols.iter().map(|&s| s & 1), symbols.len())
    }

    /// Search packed symbols, eight per byte with the first symbol in the most
    /// significant bit, as the radio's DMA buffer holds them.
    pub fn find_access_code_packed(&self, bytes: &[u8]) -> Result<AcMatch, AccessCodeNotFound> {
        let bits = bytes
            .iter()
            .flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1));
        self.search(bits, bytes.len() * 8)
    }

    fn search(
        &self,
        mut bits: impl Iterator<Item = u8>,
        len: usize,
    ) -> Result<AcMatch, AccessCodeNotFound> {
        if len < SYNC_WORD_LEN {
            return Err(AccessCodeNotFound);
        }
        let mut reg = 0u64;
        for bit in bits.by_ref().take(SYNC_WORD_LEN) {
            reg = (reg << 1) | bit as u64;
        }
        let mut offset = 0;
        loop {
            let errors = (reg ^ self.target).count_ones();
            if errors < self.max_errors {
                trace!("Access code at offset {offset} with {errors} bit errors");
                return Ok(AcMatch { offset, errors });
            }
            let Some(bit) = bits.next() else {
                return Err(AccessCodeNotFound);
            };
            reg = (reg << 1) | bit as u64;
            offset += 1;
        }
    }
}
