use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use zeroize::Zeroize;

use she_core::{SheError, SheResult};

/**
    Miyaguchi–Preneel compression over AES-128, the sole KDF of the module.

    With `H₀ = 0`, each 16-byte block `Mᵢ` (the tail zero-padded) advances
    the chain as `Hᵢ = AES(Hᵢ₋₁, Mᵢ) ⊕ Mᵢ ⊕ Hᵢ₋₁`; the final chaining value
    is the derived key. Callers separate domains by appending one of the
    SHE derivation constants to the input.
*/
pub fn aes_mp16(input: &[u8]) -> SheResult<[u8; 16]> {
    if input.is_empty() {
        return Err(SheError::Crypto("empty KDF input".into()));
    }

    let mut chain = [0u8; 16];
    for block in input.chunks(16) {
        let mut m = [0u8; 16];
        m[..block.len()].copy_from_slice(block);

        // The previous chaining value keys this round.
        let cipher = Aes128::new((&chain).into());
        let mut out = GenericArray::from(m);
        cipher.encrypt_block(&mut out);

        for i in 0..16 {
            chain[i] ^= out[i] ^ m[i];
        }
        m.zeroize();
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use she_core::constants::{KEY_UPDATE_ENC_C, KEY_UPDATE_MAC_C};

    fn derive(key: &[u8; 16], constant: &[u8; 16]) -> [u8; 16] {
        let mut input = Vec::with_capacity(32);
        input.extend_from_slice(key);
        input.extend_from_slice(constant);
        aes_mp16(&input).unwrap()
    }

    // K1/K2 of the SHE memory-update example for an all-ascending key.
    #[test]
    fn she_key_update_example_keys() {
        let auth = hex!("000102030405060708090a0b0c0d0e0f");
        assert_eq!(
            derive(&auth, &KEY_UPDATE_ENC_C),
            hex!("118a46447a770d87828a69c222e2d17e")
        );
        assert_eq!(
            derive(&auth, &KEY_UPDATE_MAC_C),
            hex!("2ebb2a3da62dbd64b18ba6493e9fbe22")
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(aes_mp16(&[]), Err(SheError::Crypto(_))));
    }

    #[test]
    fn short_tail_is_zero_padded() {
        let mut padded = [0u8; 16];
        padded[..2].copy_from_slice(b"ab");
        assert_eq!(aes_mp16(b"ab").unwrap(), aes_mp16(&padded).unwrap());
    }

    #[test]
    fn chaining_depends_on_every_block() {
        let one = aes_mp16(&[0x11u8; 16]).unwrap();
        let mut two = [0x11u8; 32];
        two[31] ^= 0x01;
        let a = aes_mp16(&[0x11u8; 32]).unwrap();
        let b = aes_mp16(&two).unwrap();
        assert_ne!(one, a);
        assert_ne!(a, b);
    }
}
