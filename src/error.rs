/// Errors that can occur when talking to the mount or solving alignment.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no mount found (tried {0})")]
    NoDevice(String),

    #[error("invalid COBS block: {0}")]
    Framing(&'static str),

    #[error("CRC mismatch: computed 0x{computed:02x}, frame carried 0x{received:02x}")]
    Integrity { computed: u8, received: u8 },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no ACK for command 0x{cmd:02x} after {attempts} attempts")]
    CommandFailed { cmd: u8, attempts: u32 },

    #[error("client is shut down")]
    Shutdown,

    #[error("alignment rejected: {0}")]
    AlignmentRejected(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timeout waiting for data")]
    Timeout,

    #[error("event stream disconnected")]
    StreamDisconnected,
}
