pub const U0_USB_VID: u16 = 0x1d50;
pub const U0_USB_PID: u16 = 0x6000;
pub const U1_USB_VID: u16 = 0x1d50;
pub const U1_USB_PID: u16 = 0x6002;
pub const TC13_USB_VID: u16 = 0xffff;
pub const TC13_USB_PID: u16 = 0x0004;

/// Firmware API version this crate speaks, as reported in `bcdDevice`.
pub const UBERTOOTH_API_VERSION: u16 = 0x0102;

pub const DATA_IN_ENDPOINT_ADDRESS: u8 = 0x82;

/// Size of one `usb_pkt_rx` record.
pub const PKT_LEN: usize = 64;
/// Symbol bytes carried in each record.
pub const DMA_SIZE: usize = 50;
/// Symbols per record.
pub const BANK_LEN: usize = DMA_SIZE * 8;

/// Records per bulk transfer.
pub const PKTS_PER_XFER: usize = 8;
pub const TRANSFER_BUFFER_SIZE: usize = PKT_LEN * PKTS_PER_XFER;

#[repr(u8)]
#[derive(Clone, Copy, Debug)]
pub enum ControlRequest {
    Ping = 0,
    RxSymbols = 1,
    GetUsrLed = 3,
    SetUsrLed = 4,
    GetRxLed = 5,
    SetRxLed = 6,
    GetTxLed = 7,
    SetTxLed = 8,
    GetChannel = 11,
    SetChannel = 12,
    Reset = 13,
    GetSerial = 14,
    GetPartNum = 15,
    GetPaEn = 16,
    SetPaEn = 17,
    GetHgm = 18,
    SetHgm = 19,
    Stop = 21,
    GetMod = 22,
    SetMod = 23,
    GetPaLevel = 28,
    SetPaLevel = 29,
    GetRevNum = 33,
    GetBoardId = 35,
    SetSquelch = 36,
    GetSquelch = 37,
    SetBdAddr = 38,
    StartHopping = 39,
    SetClock = 40,
    GetClock = 41,
    SetAfhMap = 51,
    ClearAfhMap = 52,
    GetCompileInfo = 55,
    Afh = 61,
    Hop = 62,
    TrimClock = 63,
    FixClockDrift = 69,
}
