/*!

This is a strongly-asynchronous host crate for the [Ubertooth][ubertooth], made
using the pure-rust [`nusb`] crate for USB interfacing, along with the
Bluetooth basic-rate baseband pieces needed to follow a piconet from the
symbols it captures.

[ubertooth]: https://greatscottgadgets.com/ubertoothone/

The standard entry point for this library is [`open_ubertooth()`], which will
open the first available Ubertooth device.

The device side works like this: open up an Ubertooth, configure it as needed,
and enter receive mode. Changing the operating mode also changes the struct
used, i.e. it uses the typestate pattern:

- [`Ubertooth`] - The default, idle, state.
- [`Receive`] - Streaming captured symbols back to the host.

If a mode change error occurs, the [`Ubertooth`] struct is returned alongside
the error, and it can potentially be reset back to idle by running
[`Ubertooth::stop`].

The [`bluetooth`] module holds the hardware-independent algorithms: the hop
kernel, access code search, whitening, and the clock trim loop. A [`Session`]
ties these together for one piconet, turning received [`CapturedBlock`]s into
[`RxPacket`]s and the [`DeviceCommand`]s needed to keep the radio locked on.

Here's an example program that counts how many received records on the current
channel contain a given piconet's access code:

```no_run
use anyhow::Result;
use ubertooth::bluetooth::{BdAddr, Correlator, MAX_SYNCWORD_ERRS};
#[tokio::main]
async fn main() -> Result<()> {
    let ut = ubertooth::open_ubertooth()?;
    ut.set_channel(2441).await?;

    let correlator = Correlator::new(BdAddr::new(0x9e8b33).sync_word(), MAX_SYNCWORD_ERRS);

    let mut rx = ut.start_rx().await.map_err(|e| e.err)?;
    for _ in 0..16 {
        rx.submit();
    }
    let mut found = 0;
    while rx.pending() > 0 {
        for block in rx.next_complete().await? {
            if block.is_valid_br() && correlator.find_access_code(&block.symbols()).is_ok() {
                found += 1;
            }
        }
    }

    rx.stop().await?;
    println!("Found {found} access codes");
    Ok(())
}
```

*/

#![warn(missing_docs)]

pub mod bluetooth;
pub mod clock;
mod consts;
mod error;
pub mod info;
pub mod packet;
mod rx;
mod session;

use core::mem::size_of;

use bytemuck::Pod;
use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient};
use tracing::{debug, warn};

use crate::bluetooth::{AfhMap, BdAddr};
use crate::consts::*;
use crate::info::Info;

pub use crate::error::{Error, StateChangeError};
pub use crate::packet::CapturedBlock;
pub use crate::rx::Receive;
pub use crate::session::{
    DeviceCommand, LOST_AFTER_RECORDS, RxPacket, Session, SessionConfig, SessionStats,
};

/// Lowest frequency the radio can be tuned to, in MHz.
pub const FREQ_MIN_MHZ: u16 = 2268;
/// Highest frequency the radio can be tuned to, in MHz.
pub const FREQ_MAX_MHZ: u16 = 2794;

/// Modulation scheme used by the radio.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modulation {
    /// Bluetooth basic rate (GFSK, 1 Mbps).
    BtBasicRate,
    /// Bluetooth low energy.
    BtLowEnergy,
    Ieee80211Fhss,
    None,
}

impl Modulation {
    fn as_u16(self) -> u16 {
        match self {
            Self::BtBasicRate => 0,
            Self::BtLowEnergy => 1,
            Self::Ieee80211Fhss => 2,
            Self::None => 3,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::BtBasicRate),
            1 => Some(Self::BtLowEnergy),
            2 => Some(Self::Ieee80211Fhss),
            3 => Some(Self::None),
            _ => None,
        }
    }
}

impl std::fmt::Display for Modulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BtBasicRate => f.write_str("Bluetooth basic rate"),
            Self::BtLowEnergy => f.write_str("Bluetooth low energy"),
            Self::Ieee80211Fhss => f.write_str("802.11 FHSS"),
            Self::None => f.write_str("none"),
        }
    }
}

/// An Ubertooth device descriptor, which can be opened.
///
/// These are mostly returned from calling [`list_ubertooth_devices`], but can
/// also be formed by trying to convert a [`nusb::DeviceInfo`] into one.
pub struct UbertoothDescriptor {
    info: nusb::DeviceInfo,
}

/// The type of Ubertooth device that was detected.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UbertoothType {
    Zero,
    One,
    /// The ToorCon 13 badge.
    ToorCon13,
}

impl UbertoothType {
    fn from_ids(vid: u16, pid: u16) -> Option<Self> {
        match (vid, pid) {
            (U0_USB_VID, U0_USB_PID) => Some(Self::Zero),
            (U1_USB_VID, U1_USB_PID) => Some(Self::One),
            (TC13_USB_VID, TC13_USB_PID) => Some(Self::ToorCon13),
            _ => None,
        }
    }
}

impl std::fmt::Display for UbertoothType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zero => f.write_str("Ubertooth Zero"),
            Self::One => f.write_str("Ubertooth One"),
            Self::ToorCon13 => f.write_str("ToorCon 13 badge"),
        }
    }
}

impl UbertoothDescriptor {
    /// Get the USB serial number of this Ubertooth, as a string.
    pub fn serial(&self) -> Option<&str> {
        self.info.serial_number()
    }

    /// Get the [type][UbertoothType] of Ubertooth this is.
    pub fn radio_type(&self) -> UbertoothType {
        // Descriptors are only ever built from devices with known IDs.
        UbertoothType::from_ids(self.info.vendor_id(), self.info.product_id())
            .unwrap_or(UbertoothType::One)
    }

    /// Try and open this Ubertooth device descriptor.
    pub fn open(self) -> Result<Ubertooth, std::io::Error> {
        let version = self.info.device_version();
        let ty = self.radio_type();
        if version > UBERTOOTH_API_VERSION {
            warn!(
                "{ty} reports API 0x{version:04x}, newer than 0x{UBERTOOTH_API_VERSION:04x}. Things should still work"
            );
        }
        let device = self.info.open()?;
        #[cfg(not(target_os = "windows"))]
        {
            if device.active_configuration()?.configuration_value() != 1 {
                device.detach_kernel_driver(0)?;
                device.set_configuration(1)?;
            }
        }
        let interface = device.detach_and_claim_interface(0)?;

        let (buf_pool_send, buf_pool) = crossbeam_channel::unbounded();
        let rx = RxEndpoint {
            queue: interface.bulk_in_queue(DATA_IN_ENDPOINT_ADDRESS),
            buf_pool,
            buf_pool_send,
        };

        Ok(Ubertooth {
            interface,
            version,
            ty,
            rx,
        })
    }
}

/// Try and turn any [`nusb::DeviceInfo`] descriptor into an Ubertooth, failing
/// if the VID and PID don't match any known devices.
impl TryFrom<nusb::DeviceInfo> for UbertoothDescriptor {
    type Error = &'static str;
    fn try_from(value: nusb::DeviceInfo) -> Result<Self, Self::Error> {
        if UbertoothType::from_ids(value.vendor_id(), value.product_id()).is_some() {
            Ok(UbertoothDescriptor { info: value })
        } else {
            Err("VID and PID don't match any Ubertooth")
        }
    }
}

/// List all available Ubertooth devices.
pub fn list_ubertooth_devices() -> Result<Vec<UbertoothDescriptor>, std::io::Error> {
    Ok(nusb::list_devices()?
        .filter(|d| UbertoothType::from_ids(d.vendor_id(), d.product_id()).is_some())
        .map(|d| UbertoothDescriptor { info: d })
        .collect::<Vec<UbertoothDescriptor>>())
}

/// Open the first detected Ubertooth device in the system.
///
/// This is a shortcut for calling [`list_ubertooth_devices`] and opening the
/// first one.
pub fn open_ubertooth() -> Result<Ubertooth, std::io::Error> {
    list_ubertooth_devices()?
        .into_iter()
        .next()
        .ok_or_else(|| std::io::Error::other("No Ubertooth devices"))?
        .open()
}

/// An Ubertooth device. This is the main struct for talking to the Ubertooth.
///
/// This provides all the settings to configure the Ubertooth while it is idle,
/// as well as info fetching operations with [`Ubertooth::info`]. The commands
/// that make sense mid-capture (tuning, clock trims, AFH maps) are also
/// available while receiving, through [`Receive::send`] and
/// [`Receive::device`].
pub struct Ubertooth {
    pub(crate) interface: nusb::Interface,
    pub(crate) version: u16,
    pub(crate) ty: UbertoothType,
    pub(crate) rx: RxEndpoint,
}

pub(crate) struct RxEndpoint {
    pub(crate) queue: nusb::transfer::Queue<nusb::transfer::RequestBuffer>,
    pub(crate) buf_pool: crossbeam_channel::Receiver<Vec<u8>>,
    pub(crate) buf_pool_send: crossbeam_channel::Sender<Vec<u8>>,
}

impl Ubertooth {
    fn api_check(&self, needed: u16) -> Result<(), Error> {
        if self.version < needed {
            Err(Error::ApiVersion {
                needed,
                actual: self.version,
            })
        } else {
            Ok(())
        }
    }

    async fn write_u16(&self, req: ControlRequest, val: u16) -> Result<(), Error> {
        Ok(self
            .interface
            .control_out(ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: req as u8,
                value: val,
                index: 0,
                data: &[],
            })
            .await
            .status?)
    }

    async fn write_bytes(&self, req: ControlRequest, val: u16, data: &[u8]) -> Result<(), Error> {
        self.interface
            .control_out(ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: req as u8,
                value: val,
                index: 0,
                data,
            })
            .await
            .into_result()?;
        Ok(())
    }

    async fn read_bytes(&self, req: ControlRequest, len: usize) -> Result<Vec<u8>, Error> {
        assert!(len < u16::MAX as usize);
        Ok(self
            .interface
            .control_in(ControlIn {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request: req as u8,
                value: 0,
                index: 0,
                length: len as u16,
            })
            .await
            .into_result()?)
    }

    async fn read_u8(&self, req: ControlRequest) -> Result<u8, Error> {
        let ret = self.read_bytes(req, 1).await?;
        ret.first().copied().ok_or(Error::ReturnData)
    }

    async fn read_u16(&self, req: ControlRequest) -> Result<u16, Error> {
        let ret = self.read_bytes(req, 2).await?;
        let ret: [u8; 2] = ret.as_slice().try_into().map_err(|_| Error::ReturnData)?;
        Ok(u16::from_le_bytes(ret))
    }

    pub(crate) async fn read_struct<T>(&self, req: ControlRequest) -> Result<T, Error>
    where
        T: Pod,
    {
        let size = size_of::<T>();
        let mut resp = self.read_bytes(req, size).await?;
        if resp.len() < size {
            return Err(Error::ReturnData);
        }
        resp.truncate(size);
        Ok(bytemuck::pod_read_unaligned(&resp))
    }

    /// Check the device's firmware is new enough for this crate.
    pub fn check_api(&self) -> Result<(), Error> {
        self.api_check(UBERTOOTH_API_VERSION)
    }

    /// Get the API version reported by the device.
    pub fn api_version(&self) -> u16 {
        self.version
    }

    /// Get the type of Ubertooth this is.
    pub fn radio_type(&self) -> UbertoothType {
        self.ty
    }

    /// Access the info commands for the Ubertooth.
    pub fn info(&self) -> Info<'_> {
        Info::new(self)
    }

    /// Check that the device is responding.
    pub async fn ping(&self) -> Result<(), Error> {
        self.read_bytes(ControlRequest::Ping, 0).await?;
        Ok(())
    }

    /// Halt whatever the radio is doing and return to idle.
    pub async fn stop(&self) -> Result<(), Error> {
        self.write_u16(ControlRequest::Stop, 0).await
    }

    /// Reset the Ubertooth. The device will re-enumerate, so this consumes the
    /// handle.
    pub async fn reset(self) -> Result<(), Error> {
        self.write_u16(ControlRequest::Reset, 0).await
    }

    /// Tune the radio to a frequency, in MHz.
    pub async fn set_channel(&self, mhz: u16) -> Result<(), Error> {
        if !(FREQ_MIN_MHZ..=FREQ_MAX_MHZ).contains(&mhz) {
            return Err(Error::ValueRange {
                range: (FREQ_MIN_MHZ as u32)..(FREQ_MAX_MHZ as u32 + 1),
                val: mhz as u32,
            });
        }
        self.write_u16(ControlRequest::SetChannel, mhz).await
    }

    /// Get the frequency the radio is tuned to, in MHz.
    pub async fn get_channel(&self) -> Result<u16, Error> {
        self.read_u16(ControlRequest::GetChannel).await
    }

    /// Set the modulation scheme.
    pub async fn set_modulation(&self, modulation: Modulation) -> Result<(), Error> {
        self.write_u16(ControlRequest::SetMod, modulation.as_u16())
            .await
    }

    /// Get the modulation scheme.
    pub async fn get_modulation(&self) -> Result<Modulation, Error> {
        let v = self.read_u8(ControlRequest::GetMod).await?;
        Modulation::from_u8(v).ok_or(Error::ReturnData)
    }

    /// Turn the user LED on or off.
    pub async fn set_usr_led(&self, on: bool) -> Result<(), Error> {
        self.write_u16(ControlRequest::SetUsrLed, on as u16).await
    }

    /// Check if the user LED is on.
    pub async fn get_usr_led(&self) -> Result<bool, Error> {
        Ok(self.read_u8(ControlRequest::GetUsrLed).await? != 0)
    }

    /// Turn the RX LED on or off.
    pub async fn set_rx_led(&self, on: bool) -> Result<(), Error> {
        self.write_u16(ControlRequest::SetRxLed, on as u16).await
    }

    /// Check if the RX LED is on.
    pub async fn get_rx_led(&self) -> Result<bool, Error> {
        Ok(self.read_u8(ControlRequest::GetRxLed).await? != 0)
    }

    /// Turn the TX LED on or off.
    pub async fn set_tx_led(&self, on: bool) -> Result<(), Error> {
        self.write_u16(ControlRequest::SetTxLed, on as u16).await
    }

    /// Check if the TX LED is on.
    pub async fn get_tx_led(&self) -> Result<bool, Error> {
        Ok(self.read_u8(ControlRequest::GetTxLed).await? != 0)
    }

    /// Enable or disable the power amplifier.
    pub async fn set_pa_enable(&self, on: bool) -> Result<(), Error> {
        self.write_u16(ControlRequest::SetPaEn, on as u16).await
    }

    /// Check if the power amplifier is enabled.
    pub async fn get_pa_enable(&self) -> Result<bool, Error> {
        Ok(self.read_u8(ControlRequest::GetPaEn).await? != 0)
    }

    /// Enable or disable the receive high-gain mode.
    pub async fn set_high_gain_mode(&self, on: bool) -> Result<(), Error> {
        self.write_u16(ControlRequest::SetHgm, on as u16).await
    }

    /// Check if the receive high-gain mode is enabled.
    pub async fn get_high_gain_mode(&self) -> Result<bool, Error> {
        Ok(self.read_u8(ControlRequest::GetHgm).await? != 0)
    }

    /// Set the transmit power level, 0-7.
    pub async fn set_pa_level(&self, level: u8) -> Result<(), Error> {
        if level > 7 {
            return Err(Error::ValueRange {
                range: 0..8,
                val: level as u32,
            });
        }
        self.write_u16(ControlRequest::SetPaLevel, level as u16)
            .await
    }

    /// Get the transmit power level.
    pub async fn get_pa_level(&self) -> Result<u8, Error> {
        self.read_u8(ControlRequest::GetPaLevel).await
    }

    /// Set the RSSI squelch level. Captures quieter than this are dropped by
    /// the firmware.
    pub async fn set_squelch(&self, level: i8) -> Result<(), Error> {
        self.write_u16(ControlRequest::SetSquelch, level as u8 as u16)
            .await
    }

    /// Get the RSSI squelch level.
    pub async fn get_squelch(&self) -> Result<i8, Error> {
        Ok(self.read_u8(ControlRequest::GetSquelch).await? as i8)
    }

    /// Tell the firmware which piconet to follow.
    ///
    /// Sends the address along with its sync word so the radio can match the
    /// access code itself.
    pub async fn set_bdaddr(&self, addr: BdAddr) -> Result<(), Error> {
        let mut data = [0u8; 16];
        data[..8].copy_from_slice(&addr.as_u64().to_le_bytes());
        data[8..].copy_from_slice(&addr.sync_word().as_u64().to_le_bytes());
        self.write_bytes(ControlRequest::SetBdAddr, 0, &data).await
    }

    /// Start hopping along with the piconet set by
    /// [`set_bdaddr`][Self::set_bdaddr].
    ///
    /// `clkn_offset` is the master clock minus the radio's native clock, and
    /// `clk100ns_offset` a sub-tick adjustment in 100 ns units.
    pub async fn start_hopping(&self, clkn_offset: u32, clk100ns_offset: u16) -> Result<(), Error> {
        self.send(&DeviceCommand::StartHopping {
            clkn_offset,
            clk100ns_offset,
        })
        .await
    }

    /// Set the radio's native clock.
    pub async fn set_clock(&self, clkn: u32) -> Result<(), Error> {
        self.write_bytes(ControlRequest::SetClock, 0, &clkn.to_le_bytes())
            .await
    }

    /// Get the radio's native clock.
    pub async fn get_clock(&self) -> Result<u32, Error> {
        let ret = self.read_bytes(ControlRequest::GetClock, 4).await?;
        let ret: [u8; 4] = ret.as_slice().try_into().map_err(|_| Error::ReturnData)?;
        Ok(u32::from_le_bytes(ret))
    }

    /// Load an AFH map for the firmware's hop selection.
    pub async fn set_afh_map(&self, map: &AfhMap) -> Result<(), Error> {
        self.write_bytes(ControlRequest::SetAfhMap, 0, map.as_bytes())
            .await
    }

    /// Clear the AFH map, hopping over every channel.
    pub async fn clear_afh_map(&self) -> Result<(), Error> {
        self.write_u16(ControlRequest::ClearAfhMap, 0).await
    }

    /// Start AFH map detection in the firmware.
    pub async fn afh(&self) -> Result<(), Error> {
        self.write_u16(ControlRequest::Afh, 0).await
    }

    /// Hop to the next channel right away.
    pub async fn hop(&self) -> Result<(), Error> {
        self.write_u16(ControlRequest::Hop, 0).await
    }

    /// Shift the radio's clock by `offset` 100 ns units, modulo one slot.
    pub async fn trim_clock(&self, offset: u16) -> Result<(), Error> {
        self.write_bytes(ControlRequest::TrimClock, 0, &offset.to_be_bytes())
            .await
    }

    /// Correct the radio's clock rate by `ppm` parts per million.
    pub async fn fix_clock_drift(&self, ppm: i16) -> Result<(), Error> {
        self.write_bytes(ControlRequest::FixClockDrift, 0, &ppm.to_be_bytes())
            .await
    }

    /// Apply a command produced by a [`Session`].
    pub async fn send(&self, cmd: &DeviceCommand) -> Result<(), Error> {
        debug!("Sending {cmd}");
        let (req, value, data) = cmd.encode();
        self.write_bytes(req, value, &data).await
    }

    /// Start streaming captured symbols.
    ///
    /// This is a shortcut for [`Receive::new`].
    pub async fn start_rx(self) -> Result<Receive, StateChangeError> {
        Receive::new(self).await
    }

    pub(crate) async fn rx_symbols(&self) -> Result<(), Error> {
        self.write_u16(ControlRequest::RxSymbols, 0).await
    }
}
