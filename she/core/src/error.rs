use thiserror::Error;

/**
    The SHE status byte (`rc`) carried in every reply.

    This is a closed set: handlers that fail with anything outside it are
    coerced to `GeneralError` at the dispatch boundary.
*/
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError = 0x00,
    SequenceError = 0x01,
    KeyNotAvailable = 0x02,
    KeyInvalid = 0x03,
    KeyEmpty = 0x04,
    NoSecureBoot = 0x05,
    WriteProtected = 0x06,
    KeyUpdateError = 0x07,
    RngSeed = 0x08,
    NoDebugging = 0x09,
    Busy = 0x0A,
    MemoryFailure = 0x0B,
    GeneralError = 0x0C,
}

impl ErrorCode {
    pub const fn from_u8(u: u8) -> Option<Self> {
        match u {
            0x00 => Some(Self::NoError),
            0x01 => Some(Self::SequenceError),
            0x02 => Some(Self::KeyNotAvailable),
            0x03 => Some(Self::KeyInvalid),
            0x04 => Some(Self::KeyEmpty),
            0x05 => Some(Self::NoSecureBoot),
            0x06 => Some(Self::WriteProtected),
            0x07 => Some(Self::KeyUpdateError),
            0x08 => Some(Self::RngSeed),
            0x09 => Some(Self::NoDebugging),
            0x0A => Some(Self::Busy),
            0x0B => Some(Self::MemoryFailure),
            0x0C => Some(Self::GeneralError),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/**
    Internal error type threaded through the command handlers.

    Each variant that corresponds to a SHE status maps onto it in [`rc`];
    everything else (crypto backend or key-store failures with no defined
    status) collapses to `GeneralError`.

    [`rc`]: SheError::rc
*/
#[derive(Debug, Clone, Error)]
pub enum SheError {
    #[error("command received out of sequence")]
    Sequence,
    #[error("requested key is not present")]
    KeyNotAvailable,
    #[error("key is not valid for this operation")]
    KeyInvalid,
    #[error("key slot is empty")]
    KeyEmpty,
    #[error("no boot MAC key provisioned, secure boot skipped")]
    NoSecureBoot,
    #[error("target key slot is write protected")]
    WriteProtected,
    #[error("key update authentication failed")]
    KeyUpdate,
    #[error("random source has not been seeded")]
    RngSeed,
    #[error("debugging is not permitted")]
    NoDebugging,
    #[error("module is busy")]
    Busy,
    #[error("non-volatile memory failure")]
    MemoryFailure,
    #[error("boot measurement did not match the stored digest")]
    Measurement,
    #[error("crypto backend failure: {0}")]
    Crypto(String),
    #[error("key store failure: {0}")]
    Store(String),
}

impl SheError {
    /**
        The SHE status byte this error is reported as.
    */
    pub fn rc(&self) -> ErrorCode {
        match self {
            Self::Sequence => ErrorCode::SequenceError,
            Self::KeyNotAvailable => ErrorCode::KeyNotAvailable,
            Self::KeyInvalid => ErrorCode::KeyInvalid,
            Self::KeyEmpty => ErrorCode::KeyEmpty,
            Self::NoSecureBoot => ErrorCode::NoSecureBoot,
            Self::WriteProtected => ErrorCode::WriteProtected,
            Self::KeyUpdate => ErrorCode::KeyUpdateError,
            Self::RngSeed => ErrorCode::RngSeed,
            Self::NoDebugging => ErrorCode::NoDebugging,
            Self::Busy => ErrorCode::Busy,
            Self::MemoryFailure => ErrorCode::MemoryFailure,
            Self::Measurement | Self::Crypto(_) | Self::Store(_) => ErrorCode::GeneralError,
        }
    }
}

/**
    Type alias for results that may return a [`SheError`].
*/
pub type SheResult<T> = std::result::Result<T, SheError>;

/**
    A request frame the dispatcher cannot act on at all.

    Unlike [`SheError`], these are not reported inside a reply packet; the
    dispatch call itself fails and the transport decides what to do.
*/
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown command byte {0:#04x}")]
    UnknownCommand(u8),
    #[error("request frame is truncated: missing {0}")]
    Truncated(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trip() {
        for u in 0x00..=0x0C {
            let code = ErrorCode::from_u8(u).unwrap();
            assert_eq!(code.to_u8(), u);
        }
        assert!(ErrorCode::from_u8(0x0D).is_none());
        assert!(ErrorCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn standard_errors_keep_their_code() {
        assert_eq!(SheError::Sequence.rc(), ErrorCode::SequenceError);
        assert_eq!(SheError::KeyNotAvailable.rc(), ErrorCode::KeyNotAvailable);
        assert_eq!(SheError::WriteProtected.rc(), ErrorCode::WriteProtected);
        assert_eq!(SheError::KeyUpdate.rc(), ErrorCode::KeyUpdateError);
        assert_eq!(SheError::RngSeed.rc(), ErrorCode::RngSeed);
    }

    #[test]
    fn non_standard_errors_coerce_to_general() {
        assert_eq!(SheError::Measurement.rc(), ErrorCode::GeneralError);
        assert_eq!(SheError::Crypto("backend".into()).rc(), ErrorCode::GeneralError);
        assert_eq!(SheError::Store("nvm".into()).rc(), ErrorCode::GeneralError);
    }
}
