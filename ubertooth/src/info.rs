//! Get information about an Ubertooth board.
//!
//! This module contains the [`Info`] struct for accessing information from the
//! Ubertooth, which can be used to get:
//!
//! - The MCU's [serial number][SerialNumber] with [Info::serial].
//! - The MCU's [part number][PartNumber] with [Info::part_number].
//! - The [board identifier][BoardId], with [Info::board_id].
//! - The firmware revision and build details, with [Info::firmware_rev] and
//!   [Info::compile_info].
//!
//! The general way to do this with an Ubertooth is:
//!
//! ```no_run
//!
//! # use anyhow::Result;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//!
//! use ubertooth::info::*;
//!
//! let ut = ubertooth::open_ubertooth()?;
//! let info = ut.info();
//!
//! let serial: SerialNumber = info.serial().await?;
//! let part: PartNumber = info.part_number().await?;
//! let board_id: BoardId = info.board_id().await?;
//! let rev: String = info.firmware_rev().await?;
//!
//! # Ok(())
//! # }
//! ```
use crate::{Error, Ubertooth, UbertoothType, consts::ControlRequest};

/// The MCU serial number.
///
/// This is the LPC175x device serial number, read through the in-application
/// programming interface. The first byte of the reply is the IAP status code,
/// which must be zero.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Zeroable, bytemuck::Pod)]
pub struct SerialNumber {
    status: u8,
    /// The 128-bit serial number.
    pub serial: [u8; 16],
}

impl std::fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.serial.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// The MCU part number, as reported by the in-application programming
/// interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartNumber(pub u32);

impl std::fmt::Display for PartNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// The physical board's identifier.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardId {
    UbertoothZero,
    UbertoothOne,
    ToorCon13Badge,
    Unknown(u8),
}

impl std::fmt::Display for BoardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UbertoothZero => f.write_str("Ubertooth Zero"),
            Self::UbertoothOne => f.write_str("Ubertooth One"),
            Self::ToorCon13Badge => f.write_str("ToorCon 13 Badge"),
            Self::Unknown(v) => write!(f, "Unknown (0x{:x})", v),
        }
    }
}

impl BoardId {
    fn from_u8(v: u8) -> Self {
        use BoardId::*;
        match v {
            0 => UbertoothZero,
            1 => UbertoothOne,
            2 => ToorCon13Badge,
            v => Unknown(v),
        }
    }
}

/// Decode a firmware revision reply.
///
/// Old firmware sends back only a 16-bit SVN revision number. Newer firmware
/// follows that with a length byte and a version string.
fn parse_rev_num(resp: &[u8]) -> Result<String, Error> {
    let svn: [u8; 2] = resp
        .get(..2)
        .and_then(|b| b.try_into().ok())
        .ok_or(Error::ReturnData)?;
    if resp.len() == 2 {
        return Ok(u16::from_le_bytes(svn).to_string());
    }
    parse_counted_string(&resp[2..])
}

/// Decode a string reply made of a length byte followed by the string.
fn parse_counted_string(resp: &[u8]) -> Result<String, Error> {
    let (&len, body) = resp.split_first().ok_or(Error::ReturnData)?;
    let body = &body[..(len as usize).min(body.len())];
    Ok(String::from_utf8_lossy(body).into_owned())
}

fn parse_part_number(resp: &[u8]) -> Result<PartNumber, Error> {
    match resp {
        [0, a, b, c, d, ..] => Ok(PartNumber(u32::from_le_bytes([*a, *b, *c, *d]))),
        _ => Err(Error::ReturnData),
    }
}

/// Info-gathering operations for the Ubertooth.
///
/// Borrows the interface while doing operations.
pub struct Info<'a> {
    inner: &'a Ubertooth,
}

impl<'a> Info<'a> {
    pub(crate) fn new(inner: &'a Ubertooth) -> Info<'a> {
        Self { inner }
    }

    /// Get the device's implemented API version, as a binary-coded decimal
    /// (BCD) value.
    pub fn api_version(&self) -> u16 {
        self.inner.version
    }

    /// Get the [type][UbertoothType] of Ubertooth.
    pub fn radio_type(&self) -> UbertoothType {
        self.inner.ty
    }

    /// Get the [board hardware ID][BoardId].
    pub async fn board_id(&self) -> Result<BoardId, Error> {
        let ret = self.inner.read_u8(ControlRequest::GetBoardId).await?;
        Ok(BoardId::from_u8(ret))
    }

    /// Get the MCU's serial number.
    pub async fn serial(&self) -> Result<SerialNumber, Error> {
        let v: SerialNumber = self.inner.read_struct(ControlRequest::GetSerial).await?;
        if v.status != 0 {
            return Err(Error::ReturnData);
        }
        Ok(v)
    }

    /// Get the MCU's part number.
    pub async fn part_number(&self) -> Result<PartNumber, Error> {
        let resp = self.inner.read_bytes(ControlRequest::GetPartNum, 5).await?;
        parse_part_number(&resp)
    }

    /// Get the firmware revision, as a string.
    pub async fn firmware_rev(&self) -> Result<String, Error> {
        let resp = self
            .inner
            .read_bytes(ControlRequest::GetRevNum, 2 + 1 + 255)
            .await?;
        parse_rev_num(&resp)
    }

    /// Get the firmware's build information, as a string.
    pub async fn compile_info(&self) -> Result<String, Error> {
        let resp = self
            .inner
            .read_bytes(ControlRequest::GetCompileInfo, 1 + 255)
            .await?;
        parse_counted_string(&resp)
    }
}
