/*!
    Thin wrappers over the AES-128 backend: block modes, CMAC, and the
    AES-MP compression used for every key derivation.
*/

mod aes;
mod mp;

pub use self::aes::{
    CmacStream, cbc_decrypt, cbc_encrypt, cmac_tag, ecb_decrypt, ecb_encrypt, encrypt_block,
};
pub use self::mp::aes_mp16;

/// SHE block modes run with an all-zero IV unless the host supplies one.
pub const ZERO_IV: [u8; 16] = [0u8; 16];
