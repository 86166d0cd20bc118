//! Bluetooth BR data whitening.
//!
//! Whitening XORs the air-order symbol stream against a 127-bit sequence from
//! the `x^7 + x^4 + 1` LFSR. The starting point in the sequence is picked by
//! CLK6-1 of the master clock, so the same function both whitens and
//! dewhitens when called with the same clock and skip.

/// Starting position in [`WHITENING_DATA`] for each value of CLK6-1.
static INDICES: [u8; 64] = [
    99, 85, 17, 50, 102, 58, 108, 45, 92, 62, 32, 118, 88, 11, 80, 2, 37, 69, 55, 8, 20, 40, 74,
    114, 15, 106, 30, 78, 53, 72, 28, 26, 68, 7, 39, 113, 105, 77, 71, 25, 84, 49, 57, 44, 61,
    117, 10, 1, 123, 124, 22, 125, 111, 23, 42, 126, 6, 112, 76, 24, 48, 43, 116, 0,
];

/// One full period of the whitening LFSR output.
static WHITENING_DATA: [u8; 127] = [
    1, 1, 1, 0, 0, 0, 1, 1, //
    1, 0, 1, 1, 0, 0, 0, 1, //
    0, 1, 0, 0, 1, 0, 1, 1, //
    1, 1, 1, 0, 1, 0, 1, 0, //
    1, 0, 0, 0, 0, 1, 0, 1, //
    1, 0, 1, 1, 1, 1, 0, 0, //
    1, 1, 1, 0, 0, 1, 0, 1, //
    0, 1, 1, 0, 0, 1, 1, 0, //
    0, 0, 0, 0, 1, 1, 0, 1, //
    1, 0, 1, 0, 1, 1, 1, 0, //
    1, 0, 0, 0, 1, 1, 0, 0, //
    1, 0, 0, 0, 1, 0, 0, 0, //
    0, 0, 0, 1, 0, 0, 1, 0, //
    0, 1, 1, 0, 1, 0, 0, 1, //
    1, 1, 1, 0, 1, 1, 1, 0, //
    0, 0, 0, 1, 1, 1, 1,
];

const PERIOD: usize = WHITENING_DATA.len();

/// Position in the whitening sequence for a given clock, advanced by `skip`
/// symbols.
fn start_index(clkn: u32, skip: usize) -> usize {
    (INDICES[((clkn >> 1) & 0x3f) as usize] as usize + skip) % PERIOD
}

/// Whiten (or dewhiten) a slice of symbols in place.
///
/// Each symbol is expected to be 0 or 1. `skip` advances the starting point
/// in the sequence, which is how whitening is resumed partway into a packet,
/// e.g. after the access code and header.
pub fn whiten_in_place(symbols: &mut [u8], clkn: u32, skip: usize) {
    let mut index = start_index(clkn, skip);
    for s in symbols.iter_mut() {
        *s ^= WHITENING_DATA[index];
        index += 1;
        if index == PERIOD {
            index = 0;
        }
    }
}

/// Whiten a slice of symbols, returning the result as a new vector.
pub fn whiten(symbols: &[u8], clkn: u32, skip: usize) -> Vec<u8> {
    let mut out = symbols.to_vec();
    whiten_in_place(&mut out, clkn, skip);
    out
}

/// Remove whitening from a slice of symbols.
///
/// Whitening is its own inverse, so this is the same operation as
/// [`whiten`].
pub fn dewhiten(symbols: &[u8], clkn: u32, skip: usize) -> Vec<u8> {
    whiten(symbols, clkn, skip)
}
