use hex_literal::hex;

/// AES-128 key and block size in bytes.
pub const KEY_SIZE: usize = 16;
pub const BLOCK_SIZE: usize = 16;

/// Device identity bound once per startup via SET_UID.
pub const UID_SIZE: usize = 15;

/// Sizes of the five key-update protocol messages.
pub const M1_SIZE: usize = 16;
pub const M2_SIZE: usize = 32;
pub const M3_SIZE: usize = 16;
pub const M4_SIZE: usize = 32;
pub const M5_SIZE: usize = 16;

/// Zero bytes absorbed ahead of the size field in the boot measurement.
pub const BOOT_MAC_PREFIX: usize = 12;

/**
    SHE key-derivation constants.

    Appended to the base key before the AES-MP compression to separate the
    derived-key domains: K1/K3 (encryption), K2/K4 (authentication), and the
    two PRNG keys.
*/
pub const KEY_UPDATE_ENC_C: [u8; 16] = hex!("010153484500800000000000000000b0");
pub const KEY_UPDATE_MAC_C: [u8; 16] = hex!("010253484500800000000000000000b0");
pub const PRNG_KEY_C: [u8; 16] = hex!("010453484500800000000000000000b0");
pub const PRNG_SEED_KEY_C: [u8; 16] = hex!("010553484500800000000000000000b0");

/**
    Status register bits reported by GET_STATUS. Bits not listed here are
    always zero.
*/
pub mod sreg {
    /// A boot MAC key is provisioned and secure boot is active.
    pub const SECURE_BOOT: u8 = 0x02;
    /// The boot measurement reached a terminal state.
    pub const BOOT_FINISHED: u8 = 0x08;
    /// The boot measurement matched the stored digest.
    pub const BOOT_OK: u8 = 0x10;
    /// INIT_RND has completed this startup.
    pub const RND_INIT: u8 = 0x20;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_constants_differ_only_in_domain_byte() {
        for c in [&KEY_UPDATE_MAC_C, &PRNG_KEY_C, &PRNG_SEED_KEY_C] {
            assert_eq!(c[0], KEY_UPDATE_ENC_C[0]);
            assert_ne!(c[1], KEY_UPDATE_ENC_C[1]);
            assert_eq!(&c[2..], &KEY_UPDATE_ENC_C[2..]);
        }
    }

    #[test]
    fn sreg_bits_are_distinct() {
        let all = sreg::SECURE_BOOT | sreg::BOOT_FINISHED | sreg::BOOT_OK | sreg::RND_INIT;
        assert_eq!(all.count_ones(), 4);
    }
}
