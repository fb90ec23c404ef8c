/// Errors raised by handle tables.
///
/// These never cross the wire; drivers turn them into
/// [`Status::InvalidHandle`](crate::status::Status::InvalidHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    /// The null handle was used where an open one is required.
    #[error("null handle")]
    Null,

    /// The handle's slot index is beyond the table.
    #[error("handle index {index} out of range (max {max})")]
    OutOfRange { index: usize, max: usize },

    /// The slot was closed, or closed and reopened, after this handle was issued.
    #[error("stale handle for slot {index} (generation {generation}, current {current})")]
    Stale {
        index: usize,
        generation: u16,
        current: u16,
    },
}

/// Errors that can occur inside the IO server core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A packet or payload failed to decode.
    #[error(transparent)]
    Frame(#[from] iobridge_frame::FrameError),

    /// The byte link failed.
    #[error(transparent)]
    Transport(#[from] iobridge_transport::TransportError),

    /// The board descriptor could not be loaded.
    #[error(transparent)]
    Config(#[from] iobridge_config::ConfigError),

    /// A handle did not resolve to an open slot.
    #[error(transparent)]
    Handle(#[from] HandleError),

    /// No more standard-space libraries can be registered.
    #[error("library table full ({max} entries)")]
    RegistryFull { max: usize },

    /// The scheduler was given a base rate it cannot run at.
    #[error("invalid scheduler base rate: {0} s")]
    InvalidRate(f64),

    /// A pin is beyond the board or reserved by it.
    #[error("{family}: pin {pin} is not available on this board")]
    InvalidPin { family: &'static str, pin: u8 },

    /// A peripheral argument is outside what the board supports.
    #[error("{family}: {message}")]
    Unsupported {
        family: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
