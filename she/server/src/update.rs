/*!
    The authenticated key-update protocol.

    An update travels as five messages. M1 names the device and the two
    slots involved, M2 carries the counter, flags and new key encrypted
    under K1, and M3 authenticates M1 ∥ M2 under K2. The module answers
    with M4 (the accepted counter, confirmed under K3) and M5 (M4
    authenticated under K4). All four keys come out of the AES-MP
    compression of the relevant base key and a domain constant: K1/K2 from
    the authorizing key, K3/K4 from the key just written.
*/

use zeroize::Zeroizing;

use she_core::constants::{KEY_UPDATE_ENC_C, KEY_UPDATE_MAC_C, M1_SIZE, M2_SIZE, UID_SIZE};
use she_core::{KeyFlags, SheError, SheResult, SlotId, Uid};

use crate::crypto::{self, ZERO_IV, aes_mp16, cmac_tag, encrypt_block};

/**
    Cleartext content of M2.
*/
pub struct UpdatePayload {
    pub counter: u32,
    pub flags: KeyFlags,
    pub new_key: [u8; 16],
}

/**
    The full M1..M5 bundle produced by EXPORT_RAM_KEY. Feeding M1..M3 to
    LOAD_KEY on a module holding the same SECRET_KEY replays the update.
*/
pub struct ExportBundle {
    pub m1: [u8; M1_SIZE],
    pub m2: [u8; M2_SIZE],
    pub m3: [u8; 16],
    pub m4: [u8; 32],
    pub m5: [u8; 16],
}

/// AES-MP over `base ∥ constant`, the K1..K4 derivation.
pub fn derive_key(base: &[u8; 16], constant: &[u8; 16]) -> SheResult<Zeroizing<[u8; 16]>> {
    let mut input = Zeroizing::new([0u8; 32]);
    input[..16].copy_from_slice(base);
    input[16..].copy_from_slice(constant);
    Ok(Zeroizing::new(aes_mp16(input.as_slice())?))
}

/// M1 = UID ∥ (target ID << 4 | AUTHID).
pub fn pack_m1(uid: &Uid, target: SlotId, auth: SlotId) -> [u8; M1_SIZE] {
    let mut m1 = [0u8; M1_SIZE];
    m1[..UID_SIZE].copy_from_slice(uid.as_bytes());
    m1[UID_SIZE] = (target.to_u8() << 4) | auth.to_u8();
    m1
}

/// The UID bytes and the two slot nibbles of M1.
pub fn unpack_m1(m1: &[u8; M1_SIZE]) -> ([u8; UID_SIZE], u8, u8) {
    let uid = m1[..UID_SIZE].try_into().expect("M1 holds a full UID");
    (uid, m1[UID_SIZE] >> 4, m1[UID_SIZE] & 0x0F)
}

/**
    Cleartext M2: 28-bit counter, 5 flag bits, 95 reserved zero bits, then
    the new key.

    The counter occupies the top 28 bits of the leading big-endian word;
    the flag bits follow it immediately (four in the low nibble of byte 3,
    the fifth in the top bit of byte 4).
*/
pub fn pack_m2(payload: &UpdatePayload) -> [u8; M2_SIZE] {
    let mut m2 = [0u8; M2_SIZE];
    m2[..4].copy_from_slice(&((payload.counter & 0x0FFF_FFFF) << 4).to_be_bytes());
    let bits = payload.flags.bits() as u8;
    m2[3] |= (bits >> 1) & 0x0F;
    m2[4] |= (bits & 0x01) << 7;
    m2[16..].copy_from_slice(&payload.new_key);
    m2
}

pub fn unpack_m2(m2: &[u8; M2_SIZE]) -> UpdatePayload {
    let word = u32::from_be_bytes(m2[..4].try_into().expect("M2 holds a counter word"));
    let bits = (((m2[3] & 0x0F) as u16) << 1) | ((m2[4] >> 7) as u16);
    UpdatePayload {
        counter: word >> 4,
        flags: KeyFlags::from_bits(bits),
        new_key: m2[16..].try_into().expect("M2 holds a full key"),
    }
}

/// The block confirmed in M4: counter in the top 28 bits, pad nibble 1000.
pub fn counter_block(counter: u32) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[..4].copy_from_slice(&(((counter & 0x0FFF_FFFF) << 4) | 0x8).to_be_bytes());
    block
}

/**
    Check M3 against CMAC(K2, M1 ∥ M2) for the given authorizing key.
*/
pub fn authenticate(auth: &[u8; 16], m1: &[u8; M1_SIZE], m2: &[u8; M2_SIZE], m3: &[u8; 16]) -> SheResult<()> {
    let k2 = derive_key(auth, &KEY_UPDATE_MAC_C)?;
    let mut data = [0u8; M1_SIZE + M2_SIZE];
    data[..M1_SIZE].copy_from_slice(m1);
    data[M1_SIZE..].copy_from_slice(m2);
    if cmac_tag(&k2, &data) == *m3 {
        Ok(())
    } else {
        Err(SheError::KeyUpdate)
    }
}

/**
    Recover the cleartext update from M2 under the authorizing key's K1.
*/
pub fn decrypt_m2(auth: &[u8; 16], m2: &[u8; M2_SIZE]) -> SheResult<UpdatePayload> {
    let k1 = derive_key(auth, &KEY_UPDATE_ENC_C)?;
    let clear = Zeroizing::new(crypto::cbc_decrypt(&k1, &ZERO_IV, m2)?);
    let clear: &[u8; M2_SIZE] = clear
        .as_slice()
        .try_into()
        .map_err(|_| SheError::Crypto("M2 decrypt length mismatch".into()))?;
    Ok(unpack_m2(clear))
}

/**
    Build the M4/M5 confirmation for an accepted update: the stored counter
    encrypted under K3, authenticated under K4, both derived from the key
    that was just written.
*/
pub fn confirm(
    uid: &Uid,
    target: SlotId,
    auth: SlotId,
    stored_counter: u32,
    new_key: &[u8; 16],
) -> SheResult<([u8; 32], [u8; 16])> {
    let k3 = derive_key(new_key, &KEY_UPDATE_ENC_C)?;
    let mut m4 = [0u8; 32];
    m4[..M1_SIZE].copy_from_slice(&pack_m1(uid, target, auth));
    m4[M1_SIZE..].copy_from_slice(&encrypt_block(&k3, &counter_block(stored_counter)));

    let k4 = derive_key(new_key, &KEY_UPDATE_MAC_C)?;
    let m5 = cmac_tag(&k4, &m4);
    Ok((m4, m5))
}

/**
    Build the outbound bundle for EXPORT_RAM_KEY: the RAM key wrapped as an
    update authorized by SECRET_KEY, with the counter pinned to 1.
*/
pub fn export_bundle(uid: &Uid, secret: &[u8; 16], ram_key: &[u8; 16]) -> SheResult<ExportBundle> {
    let m1 = pack_m1(uid, SlotId::RAM_KEY, SlotId::SECRET_KEY);

    let clear = Zeroizing::new(pack_m2(&UpdatePayload {
        counter: 1,
        flags: KeyFlags::empty(),
        new_key: *ram_key,
    }));
    let k1 = derive_key(secret, &KEY_UPDATE_ENC_C)?;
    let encrypted = crypto::cbc_encrypt(&k1, &ZERO_IV, clear.as_slice())?;
    let m2: [u8; M2_SIZE] = encrypted
        .as_slice()
        .try_into()
        .map_err(|_| SheError::Crypto("M2 encrypt length mismatch".into()))?;

    let k2 = derive_key(secret, &KEY_UPDATE_MAC_C)?;
    let mut data = [0u8; M1_SIZE + M2_SIZE];
    data[..M1_SIZE].copy_from_slice(&m1);
    data[M1_SIZE..].copy_from_slice(&m2);
    let m3 = cmac_tag(&k2, &data);

    let (m4, m5) = confirm(uid, SlotId::RAM_KEY, SlotId::SECRET_KEY, 1, ram_key)?;
    Ok(ExportBundle { m1, m2, m3, m4, m5 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn m1_nibble_layout() {
        let mut uid = [0u8; UID_SIZE];
        uid[14] = 0x01;
        let m1 = pack_m1(&Uid::new(uid), SlotId::user(1).unwrap(), SlotId::MASTER_ECU_KEY);
        assert_eq!(m1[15], 0x41);
        let (got_uid, id, auth) = unpack_m1(&m1);
        assert_eq!(got_uid, uid);
        assert_eq!(id, 0x4);
        assert_eq!(auth, 0x1);
    }

    #[test]
    fn m2_layout_is_byte_exact() {
        let m2 = pack_m2(&UpdatePayload {
            counter: 6,
            flags: KeyFlags::WRITE_PROTECT | KeyFlags::WILDCARD,
            new_key: [0xEE; 16],
        });
        assert_eq!(&m2[..4], &[0x00, 0x00, 0x00, 0x68]);
        assert_eq!(m2[4], 0x80);
        assert_eq!(&m2[5..16], &[0u8; 11]);
        assert_eq!(&m2[16..], &[0xEE; 16]);

        let payload = unpack_m2(&m2);
        assert_eq!(payload.counter, 6);
        assert_eq!(payload.flags, KeyFlags::WRITE_PROTECT | KeyFlags::WILDCARD);
        assert_eq!(payload.new_key, [0xEE; 16]);
    }

    #[test]
    fn counter_block_sets_the_pad_nibble() {
        let block = counter_block(5);
        assert_eq!(&block[..4], &[0x00, 0x00, 0x00, 0x58]);
        assert_eq!(&block[4..], &[0u8; 12]);
    }

    // The memory-update example from the SHE specification: authorizing key
    // 000102..0f on slot 1 installs 0f0e..00 into slot 4 with counter 1.
    #[test]
    fn she_memory_update_example() {
        let auth = hex!("000102030405060708090a0b0c0d0e0f");
        let new_key = hex!("0f0e0d0c0b0a09080706050403020100");
        let mut uid = [0u8; UID_SIZE];
        uid[14] = 0x01;
        let uid = Uid::new(uid);

        let m1 = pack_m1(&uid, SlotId::user(1).unwrap(), SlotId::MASTER_ECU_KEY);
        assert_eq!(m1, hex!("00000000000000000000000000000141"));

        let clear = pack_m2(&UpdatePayload {
            counter: 1,
            flags: KeyFlags::empty(),
            new_key,
        });
        let k1 = derive_key(&auth, &KEY_UPDATE_ENC_C).unwrap();
        let m2: [u8; M2_SIZE] = crypto::cbc_encrypt(&k1, &ZERO_IV, &clear)
            .unwrap()
            .try_into()
            .unwrap();
        assert_eq!(
            m2,
            hex!(
                "2b111e2d93f486566bcbba1d7f7a9797"
                "c94643b050fc5d4d7de14cff682203c3"
            )
        );

        let k2 = derive_key(&auth, &KEY_UPDATE_MAC_C).unwrap();
        let mut data = [0u8; M1_SIZE + M2_SIZE];
        data[..M1_SIZE].copy_from_slice(&m1);
        data[M1_SIZE..].copy_from_slice(&m2);
        let m3 = cmac_tag(&k2, &data);
        assert_eq!(m3, hex!("b9d745e5ace7d41860bc63c2b9f5bb46"));

        authenticate(&auth, &m1, &m2, &m3).unwrap();
        let payload = decrypt_m2(&auth, &m2).unwrap();
        assert_eq!(payload.counter, 1);
        assert_eq!(payload.flags, KeyFlags::empty());
        assert_eq!(payload.new_key, new_key);

        let (m4, m5) = confirm(&uid, SlotId::user(1).unwrap(), SlotId::MASTER_ECU_KEY, 1, &new_key).unwrap();
        assert_eq!(
            m4,
            hex!(
                "00000000000000000000000000000141"
                "b472e8d8727d70d57295e74849a27917"
            )
        );
        assert_eq!(m5, hex!("820d8d95dc11b4668878160cb2a4e23e"));
    }

    #[test]
    fn tampered_m3_fails_authentication() {
        let auth = [0x31u8; 16];
        let bundle = export_bundle(&Uid::default(), &auth, &[0x77; 16]).unwrap();
        authenticate(&auth, &bundle.m1, &bundle.m2, &bundle.m3).unwrap();
        let mut bad = bundle.m3;
        bad[0] ^= 0x01;
        assert!(matches!(
            authenticate(&auth, &bundle.m1, &bundle.m2, &bad),
            Err(SheError::KeyUpdate)
        ));
    }

    #[test]
    fn export_bundle_wraps_the_ram_key() {
        let secret = [0x13u8; 16];
        let ram_key = [0x9Du8; 16];
        let uid = Uid::new([0x05; UID_SIZE]);
        let bundle = export_bundle(&uid, &secret, &ram_key).unwrap();

        assert_eq!(bundle.m1[15], 0xE0);
        let payload = decrypt_m2(&secret, &bundle.m2).unwrap();
        assert_eq!(payload.counter, 1);
        assert_eq!(payload.flags, KeyFlags::empty());
        assert_eq!(payload.new_key, ram_key);

        let (m4, m5) = confirm(&uid, SlotId::RAM_KEY, SlotId::SECRET_KEY, 1, &ram_key).unwrap();
        assert_eq!(bundle.m4, m4);
        assert_eq!(bundle.m5, m5);
    }
}
