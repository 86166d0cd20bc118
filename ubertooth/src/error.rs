use std::ops::Range;

use crate::Ubertooth;

/// Everything that can go wrong talking to an Ubertooth or configuring the
/// baseband pieces.
///
/// The Bluetooth algorithms themselves don't fail: a record without the access
/// code is just skipped, and the trim loop guards its own arithmetic. What's
/// left is mostly the USB side and bad settings:
///
/// - `Io` and `Transfer` come from the USB stack. A single failed control or
///   bulk transfer doesn't mean the dongle is gone, so retrying is reasonable.
/// - `ValueRange` is a setting outside what the radio accepts, like a channel
///   outside 2268-2794 MHz or a PA level above 7.
/// - `InvalidParameter` is a setting that is wrong in some other way, such as
///   an AFH map with every channel marked unused.
/// - `ReturnData` means the dongle sent something that doesn't parse: a short
///   control reply, a non-zero IAP status, or a bulk transfer that isn't a
///   whole number of 64-byte records.
/// - `ApiVersion` means the firmware is too old for the requests this crate
///   makes, and should be updated.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Opening or claiming the USB device failed.
    #[error("USB I/O error")]
    Io(#[from] std::io::Error),

    /// A control or bulk transfer failed.
    #[error("USB transfer failed")]
    Transfer(#[from] nusb::transfer::TransferError),

    /// A setting was outside the range the radio accepts.
    #[error("{val} is outside the accepted range {}..{}", .range.start, .range.end)]
    ValueRange {
        /// Accepted values, end exclusive.
        range: Range<u32>,
        /// The value that was given.
        val: u32,
    },

    /// A setting was rejected for a reason other than its range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The firmware speaks an older API than this crate needs.
    #[error("Firmware API 0x{actual:04x} is older than the required 0x{needed:04x}; update the firmware")]
    ApiVersion {
        /// Oldest API version that works.
        needed: u16,
        /// Version the dongle reported in `bcdDevice`.
        actual: u16,
    },

    /// A reply or receive record from the dongle didn't parse.
    #[error("Malformed data from the Ubertooth")]
    ReturnData,
}

/// Failure to switch an Ubertooth into a new mode, e.g. from idle into
/// symbol streaming.
///
/// The device comes back with the error so it isn't lost. Its mode is unknown
/// at that point; [`Ubertooth::stop`] is the way back to idle.
pub struct StateChangeError {
    /// Why the mode switch failed.
    pub err: Error,
    /// The device, in an unknown mode.
    pub ut: Ubertooth,
}

impl core::fmt::Debug for StateChangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChangeError")
            .field("err", &self.err)
            .field("radio_type", &self.ut.radio_type())
            .finish_non_exhaustive()
    }
}

impl core::fmt::Display for StateChangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed to change mode", self.ut.radio_type())
    }
}

impl core::error::Error for StateChangeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let e = Error::ValueRange {
            range: 2268..2795,
            val: 2900,
        };
        assert_eq!(e.to_string(), "2900 is outside the accepted range 2268..2795");
        let e = Error::ApiVersion {
            needed: 0x0102,
            actual: 0x0101,
        };
        assert_eq!(
            e.to_string(),
            "Firmware API 0x0101 is older than the required 0x0102; update the firmware"
        );
    }
}
