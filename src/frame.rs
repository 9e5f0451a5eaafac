use embedded_can::{Id, StandardId};
use heapless::Vec;

/// Size of the [`Frame`] wire image: control byte, identifier, payload.
pub const FRAME_SIZE: usize = 1 + 4 + 8;

/// Largest data length code a classic CAN frame carries data for.
pub const MAX_DLC: u8 = 8;

/// Size of the longest frame notification (identifier + 8 payload bytes).
pub const MAX_NOTIFICATION_SIZE: usize = 4 + MAX_DLC as usize;

const MAX_STANDARD_ID: u32 = 0x7FF;

/// Frame format (11-bit/29-bit identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameFormat {
    Standard,
    Extended,
}

/// Remote transmission request bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameRtr {
    Data,
    Remote,
}

/// The frame information byte, shared by the receive buffer window of the
/// peripheral and by the [`Frame`] wire image.
///
/// ```text
///   bit 7   bit 6   bit 5        bit 4            bits 3..0
///   FF      RTR     single shot  self reception   DLC
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameInfo(u8);

impl FrameInfo {
    const DLC_MASK: u8 = 0x0F;
    const SELF_RECEPTION: u8 = 1 << 4;
    const SINGLE_SHOT: u8 = 1 << 5;
    const RTR: u8 = 1 << 6;
    const FRAME_FORMAT: u8 = 1 << 7;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Raw 4-bit data length code. Values above 8 are legal on the bus and
    /// still mean 8 data bytes, see [`FrameInfo::data_len`].
    pub const fn dlc(self) -> u8 {
        self.0 & Self::DLC_MASK
    }

    /// Number of payload bytes the frame carries.
    pub const fn data_len(self) -> usize {
        let dlc = self.dlc();
        if dlc > MAX_DLC {
            MAX_DLC as usize
        } else {
            dlc as usize
        }
    }

    pub const fn self_reception(self) -> bool {
        self.0 & Self::SELF_RECEPTION != 0
    }

    pub const fn single_shot(self) -> bool {
        self.0 & Self::SINGLE_SHOT != 0
    }

    pub const fn rtr(self) -> FrameRtr {
        if self.0 & Self::RTR != 0 {
            FrameRtr::Remote
        } else {
            FrameRtr::Data
        }
    }

    pub const fn format(self) -> FrameFormat {
        if self.0 & Self::FRAME_FORMAT != 0 {
            FrameFormat::Extended
        } else {
            FrameFormat::Standard
        }
    }

    /// Returns a copy with the DLC replaced.
    pub const fn with_dlc(self, dlc: u8) -> Self {
        Self((self.0 & !Self::DLC_MASK) | (dlc & Self::DLC_MASK))
    }
}

/// A received standard data frame.
///
/// Only standard (11-bit) data frames are ever built; extended and remote
/// frames are rejected by every constructor. The DLC is always `<= 8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    info: FrameInfo,
    id: u32,
    data: [u8; 8],
}

impl Frame {
    /// Creates a standard data frame. Returns `None` if `id` does not fit in
    /// 11 bits or `data` is longer than 8 bytes.
    pub fn new_standard(id: u32, data: &[u8]) -> Option<Self> {
        if id > MAX_STANDARD_ID || data.len() > MAX_DLC as usize {
            return None;
        }

        let mut copy = [0u8; 8];
        copy[..data.len()].copy_from_slice(data);

        Some(Self {
            info: FrameInfo::default().with_dlc(data.len() as u8),
            id,
            data: copy,
        })
    }

    /// Builds a frame from the pieces read out of the receive buffer window.
    /// The caller has already rejected remote and extended frames.
    pub(crate) fn from_parts(info: FrameInfo, id: u32, data: [u8; 8]) -> Self {
        Self {
            info: info.with_dlc(info.data_len() as u8),
            id: id & MAX_STANDARD_ID,
            data,
        }
    }

    pub fn info(&self) -> FrameInfo {
        self.info
    }

    /// The identifier as a plain integer (11 significant bits).
    pub fn raw_id(&self) -> u32 {
        self.id
    }

    /// The valid part of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.info.data_len()]
    }

    /// Wire image: control byte, identifier (little-endian), 8 payload bytes.
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0] = self.info.bits();
        bytes[1..5].copy_from_slice(&self.id.to_le_bytes());
        bytes[5..].copy_from_slice(&self.data);
        bytes
    }

    pub fn from_bytes(bytes: &[u8; FRAME_SIZE]) -> Result<Self, FrameParseError> {
        let info = FrameInfo::from_bits(bytes[0]);

        if info.format() == FrameFormat::Extended {
            return Err(FrameParseError::ExtendedFrame);
        }

        if info.rtr() == FrameRtr::Remote {
            return Err(FrameParseError::RemoteFrame);
        }

        if info.dlc() > MAX_DLC {
            return Err(FrameParseError::DataLengthOutOfRange(info.dlc()));
        }

        let id = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

        if id > MAX_STANDARD_ID {
            return Err(FrameParseError::StandardIdOutOfRange(id));
        }

        let mut data = [0u8; 8];
        data.copy_from_slice(&bytes[5..]);

        Ok(Self { info, id, data })
    }

    /// The notification forwarded to the telemetry application: the
    /// identifier as 4 little-endian bytes followed by the payload.
    pub fn notification(&self) -> Vec<u8, MAX_NOTIFICATION_SIZE> {
        let mut result = Vec::new();

        // capacity covers the longest possible notification
        let _ = result.extend_from_slice(&self.id.to_le_bytes());
        let _ = result.extend_from_slice(self.payload());

        result
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        match id.into() {
            Id::Standard(id) => Self::new_standard(id.as_raw() as u32, data),
            Id::Extended(_) => None,
        }
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        false
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        // SAFETY: every constructor keeps the identifier within 11 bits
        Id::Standard(unsafe { StandardId::new_unchecked(self.id as u16) })
    }

    fn dlc(&self) -> usize {
        self.info.data_len()
    }

    fn data(&self) -> &[u8] {
        self.payload()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameParseError {
    #[error("Received a CAN 2 DLC ({0:?}) that was out of the valid range (0..=8)")]
    DataLengthOutOfRange(u8),
    #[error("Received a CAN Standard ID ({0:?}) that was out of the valid range (0..=0x7FF)")]
    StandardIdOutOfRange(u32),
    #[error("Received an extended (29-bit) frame")]
    ExtendedFrame,
    #[error("Received a remote frame")]
    RemoteFrame,
}
