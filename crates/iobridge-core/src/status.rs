/// Status byte leading most standard-space results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    /// A bus transfer was not acknowledged or came back short.
    BusError = 0x01,
    /// A receive timed out before any data arrived.
    DataNotAvailable = 0x02,
    /// An SCI frame format outside 5-8 data bits, N/E/O parity, 1-2 stop bits.
    FrameError = 0x03,
    /// The payload was too short for the command.
    InvalidPayload = 0xFD,
    /// The handle was null, stale or out of range.
    InvalidHandle = 0xFE,
    Failure = 0xFF,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::Success,
            0x01 => Self::BusError,
            0x02 => Self::DataNotAvailable,
            0x03 => Self::FrameError,
            0xFD => Self::InvalidPayload,
            0xFE => Self::InvalidHandle,
            0xFF => Self::Failure,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::BusError => "BUS_ERROR",
            Self::DataNotAvailable => "DATA_NOT_AVAILABLE",
            Self::FrameError => "FRAME_ERROR",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InvalidHandle => "INVALID_HANDLE",
            Self::Failure => "FAILURE",
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_values_roundtrip() {
        for status in [
            Status::Success,
            Status::BusError,
            Status::DataNotAvailable,
            Status::FrameError,
            Status::InvalidPayload,
            Status::InvalidHandle,
            Status::Failure,
        ] {
            assert_eq!(Status::from_u8(u8::from(status)), Some(status));
        }
        assert_eq!(Status::from_u8(0x42), None);
    }
}
