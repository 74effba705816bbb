use aes::Aes128;
use aes::cipher::{
    BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
    block_padding::NoPadding, generic_array::GenericArray,
};
use cmac::{Cmac, Mac};

use she_core::{SheError, SheResult};

type CbcEnc = cbc::Encryptor<Aes128>;
type CbcDec = cbc::Decryptor<Aes128>;
type EcbEnc = ecb::Encryptor<Aes128>;
type EcbDec = ecb::Decryptor<Aes128>;

fn check_aligned(data: &[u8]) -> SheResult<()> {
    if data.len().is_multiple_of(16) {
        Ok(())
    } else {
        Err(SheError::Crypto("cipher input is not block aligned".into()))
    }
}

/**
    AES-128-ECB encrypt. Input must be a multiple of the block size; the
    dispatcher truncates host data before calling.
*/
pub fn ecb_encrypt(key: &[u8; 16], data: &[u8]) -> SheResult<Vec<u8>> {
    check_aligned(data)?;
    let mut buf = data.to_vec();
    EcbEnc::new(key.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
        .map_err(|_| SheError::Crypto("ECB encrypt failed".into()))?;
    Ok(buf)
}

/**
    AES-128-ECB decrypt of block-aligned data.
*/
pub fn ecb_decrypt(key: &[u8; 16], data: &[u8]) -> SheResult<Vec<u8>> {
    check_aligned(data)?;
    let mut buf = data.to_vec();
    EcbDec::new(key.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| SheError::Crypto("ECB decrypt failed".into()))?;
    Ok(buf)
}

/**
    AES-128-CBC encrypt of block-aligned data, no padding.
*/
pub fn cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> SheResult<Vec<u8>> {
    check_aligned(data)?;
    let mut buf = data.to_vec();
    CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
        .map_err(|_| SheError::Crypto("CBC encrypt failed".into()))?;
    Ok(buf)
}

/**
    AES-128-CBC decrypt of block-aligned data, no padding.
*/
pub fn cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> SheResult<Vec<u8>> {
    check_aligned(data)?;
    let mut buf = data.to_vec();
    CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| SheError::Crypto("CBC decrypt failed".into()))?;
    Ok(buf)
}

/**
    Encrypt a single 16-byte block (used by the KDF chain and the M4
    counter confirmation).
*/
pub fn encrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(key.into());
    let mut out = GenericArray::from(*block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/**
    Compute an AES-128-CMAC tag (RFC 4493).
*/
pub fn cmac_tag(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key)
        .expect("CMAC key length is always valid for AES-128");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/**
    Streaming AES-CMAC context. The boot measurement keeps one of these
    alive across SECURE_BOOT_INIT / UPDATE / FINISH.
*/
pub struct CmacStream {
    mac: Cmac<Aes128>,
}

impl CmacStream {
    pub fn new(key: &[u8; 16]) -> CmacStream {
        CmacStream {
            mac: <Cmac<Aes128> as Mac>::new_from_slice(key)
                .expect("CMAC key length is always valid for AES-128"),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.mac.update(data);
    }

    pub fn finalize(self) -> [u8; 16] {
        self.mac.finalize().into_bytes().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // FIPS-197 appendix B
    #[test]
    fn ecb_known_answer() {
        let key = hex!("000102030405060708090a0b0c0d0e0f");
        let pt = hex!("00112233445566778899aabbccddeeff");
        let ct = ecb_encrypt(&key, &pt).unwrap();
        assert_eq!(ct, hex!("69c4e0d86a7b0430d8cdb78070b4c55a"));
        assert_eq!(ecb_decrypt(&key, &ct).unwrap(), pt);
    }

    #[test]
    fn ecb_rejects_unaligned() {
        let key = [0u8; 16];
        let err = ecb_encrypt(&key, &[0u8; 17]).unwrap_err();
        assert!(matches!(err, SheError::Crypto(_)));
    }

    #[test]
    fn cbc_round_trip_multi_block() {
        let key = [0x42u8; 16];
        let iv = [0x13u8; 16];
        let pt = [0xA5u8; 48];
        let ct = cbc_encrypt(&key, &iv, &pt).unwrap();
        assert_ne!(&ct[..], &pt[..]);
        assert_eq!(cbc_decrypt(&key, &iv, &ct).unwrap(), pt);
    }

    #[test]
    fn cbc_zero_iv_first_block_matches_raw_encrypt() {
        let key = [0x07u8; 16];
        let block = [0x3Cu8; 16];
        let ct = cbc_encrypt(&key, &[0u8; 16], &block).unwrap();
        assert_eq!(ct, encrypt_block(&key, &block));
    }

    // RFC 4493 test vectors
    #[test]
    fn cmac_known_answers() {
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        assert_eq!(
            cmac_tag(&key, &[]),
            hex!("bb1d6929e95937287fa37d129b756746")
        );
        assert_eq!(
            cmac_tag(&key, &hex!("6bc1bee22e409f96e93d7e117393172a")),
            hex!("070a16b46b4d4144f79bdd9dd04a287c")
        );
    }

    #[test]
    fn streaming_cmac_matches_one_shot() {
        let key = [0x55u8; 16];
        let data = b"streamed in three separate chunks";
        let mut stream = CmacStream::new(&key);
        stream.update(&data[..7]);
        stream.update(&data[7..20]);
        stream.update(&data[20..]);
        assert_eq!(stream.finalize(), cmac_tag(&key, data));
    }
}
