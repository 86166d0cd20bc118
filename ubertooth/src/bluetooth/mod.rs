//! Bluetooth BR baseband algorithms.
//!
//! Nothing in here talks to hardware. These are the pieces a host needs to
//! follow a piconet from raw demodulated symbols: hop selection, sync word
//! search, whitening, and the clock trim loop.

mod access_code;
mod address;
pub mod hop;
pub mod trim;
pub mod whiten;

pub use access_code::{AcMatch, AccessCodeNotFound, Correlator, MAX_SYNCWORD_ERRS, SYNC_WORD_LEN};
pub use address::{BdAddr, SyncWord};
pub use hop::{AfhMap, HopKernel, perm5};
pub use trim::{TrimAction, TrimConfig, TrimController};
pub use whiten::{dewhiten, whiten, whiten_in_place};
