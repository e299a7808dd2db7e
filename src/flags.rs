use crate::error::{MuxError, Result};

/// Frame type carried in the flags byte of the wire header.
///
/// A data frame has no flag bits set. SYN marks a channel-open event, RST a
/// channel-close event. The remaining bits are reserved and must be zero;
/// SYN and RST are never set together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flags {
    Data,
    Syn,
    Rst,
}

impl Flags {
    pub const SYN: u8 = 0b0000_0001;
    pub const RST: u8 = 0b0000_0010;

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Flags::Data),
            Self::SYN => Ok(Flags::Syn),
            Self::RST => Ok(Flags::Rst),
            other => Err(MuxError::MalformedFrame(format!(
                "unknown flag bits {other:#04x}"
            ))),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Flags::Data => 0,
            Flags::Syn => Self::SYN,
            Flags::Rst => Self::RST,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Flags::Syn | Flags::Rst)
    }

    /// SYN may carry payload (treated as data on the newly opened channel);
    /// RST payloads are ignored on receipt and rejected on send.
    pub fn can_carry_data(self) -> bool {
        matches!(self, Flags::Data | Flags::Syn)
    }
}
