/*!
    Shared vocabulary of the SHE module: status codes, slot identifiers,
    key metadata, KDF constants, and the wire-level command frames.
*/

pub mod constants;

mod error;
mod message;
mod types;

pub use self::error::{ErrorCode, FrameError, SheError, SheResult};
pub use self::message::{
    CipherIvReq, CipherReq, Command, ExtendSeedReq, LoadKeyReq, LoadPlainKeyReq, Reply,
    SecureBootInitReq, SetUidReq, VerifyMacReq,
};
pub use self::types::{KeyFlags, KeyMetadata, SlotId, Uid};
