use heapless::Vec;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Longest request the telemetry application writes to the control channel.
pub const MAX_COMMAND_SIZE: usize = 7;

/// Identifier request written by the telemetry application.
///
/// The requested notify interval is carried on the wire but not acted upon;
/// forwarding rates come from the vehicle profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    DenyAll,
    AllowAll { interval_ms: u16 },
    AllowId { interval_ms: u16, id: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[num_enum(error_type(name = CommandParseError, constructor = CommandParseError::UnrecognizedCommand))]
#[repr(u8)]
pub enum CommandKind {
    DenyAll = 0,
    AllowAll = 1,
    AllowId = 2,
}

impl CommandKind {
    /// Exact length of the request, opcode included.
    const fn get_length(&self) -> usize {
        match self {
            Self::DenyAll => 1,
            Self::AllowAll => 1 + 2,    // interval
            Self::AllowId => 1 + 2 + 4, // interval + id
        }
    }
}

impl Command {
    fn get_kind(&self) -> CommandKind {
        match self {
            Self::DenyAll => CommandKind::DenyAll,
            Self::AllowAll { .. } => CommandKind::AllowAll,
            Self::AllowId { .. } => CommandKind::AllowId,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8, MAX_COMMAND_SIZE> {
        let mut result = Vec::new();

        // every request fits in MAX_COMMAND_SIZE
        let _ = result.push(self.get_kind().into());

        match self {
            Self::DenyAll => {}
            Self::AllowAll { interval_ms } => {
                let _ = result.extend_from_slice(&interval_ms.to_be_bytes());
            }
            Self::AllowId { interval_ms, id } => {
                let _ = result.extend_from_slice(&interval_ms.to_be_bytes());
                let _ = result.extend_from_slice(&id.to_be_bytes());
            }
        }

        result
    }
}

/// Errors which can arise while parsing a control channel request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandParseError {
    #[error("Tried to parse an empty buffer")]
    Empty,
    #[error("Received a command with an unrecognized specifier ({0:?})")]
    UnrecognizedCommand(u8),
    #[error("Received a command ({0:?}) with an unexpected length ({1:?})")]
    LengthMismatch(CommandKind, usize),
}

impl Command {
    pub fn from_bytes(buffer: &[u8]) -> Result<Self, CommandParseError> {
        if buffer.is_empty() {
            return Err(CommandParseError::Empty);
        }

        let kind: CommandKind = buffer[0].try_into()?;

        if buffer.len() != kind.get_length() {
            return Err(CommandParseError::LengthMismatch(kind, buffer.len()));
        }

        Ok(match kind {
            CommandKind::DenyAll => Self::DenyAll,
            CommandKind::AllowAll => Self::AllowAll {
                interval_ms: u16::from_be_bytes([buffer[1], buffer[2]]),
            },
            CommandKind::AllowId => Self::AllowId {
                interval_ms: u16::from_be_bytes([buffer[1], buffer[2]]),
                id: u32::from_be_bytes([buffer[3], buffer[4], buffer[5], buffer[6]]),
            },
        })
    }
}
