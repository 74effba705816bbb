/*!
    Wire-level command frames.

    The transport hands the dispatcher a one-byte action plus the payload
    that followed it. Fixed fields come first in each payload, bulk data
    (bootloader chunks, cipher and MAC inputs) inline after them. All
    integers are big-endian. Replies lead with the status byte; error
    replies are the bare status.
*/

use crate::constants::{KEY_SIZE, M1_SIZE, M2_SIZE, M3_SIZE, UID_SIZE};
use crate::error::{ErrorCode, FrameError};

/**
    SHE command byte, numbered in protocol order.
*/
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    EncEcb = 0x01,
    EncCbc = 0x02,
    DecEcb = 0x03,
    DecCbc = 0x04,
    GenMac = 0x05,
    VerifyMac = 0x06,
    LoadKey = 0x07,
    LoadPlainKey = 0x08,
    ExportRamKey = 0x09,
    InitRnd = 0x0A,
    ExtendSeed = 0x0B,
    Rnd = 0x0C,
    SecureBootInit = 0x0D,
    SecureBootUpdate = 0x0E,
    SecureBootFinish = 0x0F,
    GetStatus = 0x10,
    SetUid = 0x11,
}

impl Command {
    pub const fn from_u8(u: u8) -> Option<Self> {
        match u {
            0x01 => Some(Self::EncEcb),
            0x02 => Some(Self::EncCbc),
            0x03 => Some(Self::DecEcb),
            0x04 => Some(Self::DecCbc),
            0x05 => Some(Self::GenMac),
            0x06 => Some(Self::VerifyMac),
            0x07 => Some(Self::LoadKey),
            0x08 => Some(Self::LoadPlainKey),
            0x09 => Some(Self::ExportRamKey),
            0x0A => Some(Self::InitRnd),
            0x0B => Some(Self::ExtendSeed),
            0x0C => Some(Self::Rnd),
            0x0D => Some(Self::SecureBootInit),
            0x0E => Some(Self::SecureBootUpdate),
            0x0F => Some(Self::SecureBootFinish),
            0x10 => Some(Self::GetStatus),
            0x11 => Some(Self::SetUid),
            _ => None,
        }
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/**
    SET_UID request: the 15-byte identity.
*/
#[derive(Debug)]
pub struct SetUidReq {
    pub uid: [u8; UID_SIZE],
}

impl SetUidReq {
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        let uid = take(payload, 0, "uid")?;
        Ok(SetUidReq { uid })
    }
}

/**
    SECURE_BOOT_INIT request: expected bootloader size.
*/
pub struct SecureBootInitReq {
    pub size: u32,
}

impl SecureBootInitReq {
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        let bytes: [u8; 4] = take(payload, 0, "bootloader size")?;
        Ok(SecureBootInitReq {
            size: u32::from_be_bytes(bytes),
        })
    }
}

/**
    LOAD_KEY request: the three host-supplied update messages.

    Layout:
      [0..16]   M1 = UID (15) ∥ (target ID << 4 | AUTHID)
      [16..48]  M2, AES-CBC encrypted under K1
      [48..64]  M3 = CMAC(K2, M1 ∥ M2)
*/
pub struct LoadKeyReq {
    pub m1: [u8; M1_SIZE],
    pub m2: [u8; M2_SIZE],
    pub m3: [u8; M3_SIZE],
}

impl LoadKeyReq {
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        Ok(LoadKeyReq {
            m1: take(payload, 0, "M1")?,
            m2: take(payload, M1_SIZE, "M2")?,
            m3: take(payload, M1_SIZE + M2_SIZE, "M3")?,
        })
    }
}

/**
    LOAD_PLAIN_KEY request: the cleartext RAM key.
*/
pub struct LoadPlainKeyReq {
    pub key: [u8; KEY_SIZE],
}

impl LoadPlainKeyReq {
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        let key = take(payload, 0, "key")?;
        Ok(LoadPlainKeyReq { key })
    }
}

/**
    EXTEND_SEED request: 16 bytes of host entropy.
*/
pub struct ExtendSeedReq {
    pub entropy: [u8; KEY_SIZE],
}

impl ExtendSeedReq {
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        let entropy = take(payload, 0, "entropy")?;
        Ok(ExtendSeedReq { entropy })
    }
}

/**
    ENC_ECB / DEC_ECB / GEN_MAC request: key slot byte, data inline.
*/
pub struct CipherReq<'a> {
    pub key_id: u8,
    pub data: &'a [u8],
}

impl<'a> CipherReq<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, FrameError> {
        let (&key_id, data) = payload
            .split_first()
            .ok_or(FrameError::Truncated("key slot"))?;
        Ok(CipherReq { key_id, data })
    }
}

/**
    ENC_CBC / DEC_CBC request: key slot byte, 16-byte IV, data inline.
*/
pub struct CipherIvReq<'a> {
    pub key_id: u8,
    pub iv: [u8; 16],
    pub data: &'a [u8],
}

impl<'a> CipherIvReq<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, FrameError> {
        let (&key_id, rest) = payload
            .split_first()
            .ok_or(FrameError::Truncated("key slot"))?;
        let iv = take(rest, 0, "IV")?;
        Ok(CipherIvReq {
            key_id,
            iv,
            data: &rest[16..],
        })
    }
}

/**
    VERIFY_MAC request.

    Layout:
      [0]      key slot
      [1..3]   message length (u16)
      [3]      MAC length in bytes
      [4..]    message ∥ MAC
*/
#[derive(Debug)]
pub struct VerifyMacReq<'a> {
    pub key_id: u8,
    pub message: &'a [u8],
    pub mac: &'a [u8],
}

impl<'a> VerifyMacReq<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, FrameError> {
        if payload.len() < 4 {
            return Err(FrameError::Truncated("verify header"));
        }
        let key_id = payload[0];
        let msg_len = u16::from_be_bytes([payload[1], payload[2]]) as usize;
        let mac_len = payload[3] as usize;
        let body = &payload[4..];
        if body.len() < msg_len {
            return Err(FrameError::Truncated("message"));
        }
        if body.len() < msg_len + mac_len {
            return Err(FrameError::Truncated("MAC"));
        }
        Ok(VerifyMacReq {
            key_id,
            message: &body[..msg_len],
            mac: &body[msg_len..msg_len + mac_len],
        })
    }
}

/**
    Reply builder: status byte first, command-specific fields appended.
*/
pub struct Reply {
    buf: Vec<u8>,
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::status(ErrorCode::NoError)
    }

    pub fn status(rc: ErrorCode) -> Reply {
        Reply {
            buf: vec![rc.to_u8()],
        }
    }

    pub fn field(mut self, bytes: &[u8]) -> Reply {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Copy a fixed-size field at `offset`, or report which field was cut off.
fn take<const N: usize>(
    payload: &[u8],
    offset: usize,
    field: &'static str,
) -> Result<[u8; N], FrameError> {
    payload
        .get(offset..offset + N)
        .and_then(|s| s.try_into().ok())
        .ok_or(FrameError::Truncated(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trip() {
        for u in 0x01..=0x11 {
            let cmd = Command::from_u8(u).unwrap();
            assert_eq!(cmd.to_u8(), u);
        }
        assert!(Command::from_u8(0x00).is_none());
        assert!(Command::from_u8(0x12).is_none());
    }

    #[test]
    fn set_uid_parse() {
        let req = SetUidReq::parse(&[7u8; 15]).unwrap();
        assert_eq!(req.uid, [7u8; 15]);
        assert_eq!(
            SetUidReq::parse(&[7u8; 14]).unwrap_err(),
            FrameError::Truncated("uid")
        );
    }

    #[test]
    fn secure_boot_init_parse_is_big_endian() {
        let req = SecureBootInitReq::parse(&[0x00, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(req.size, 0x100);
    }

    #[test]
    fn load_key_parse_splits_messages() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&[1u8; 16]);
        payload.extend_from_slice(&[2u8; 32]);
        payload.extend_from_slice(&[3u8; 16]);
        let req = LoadKeyReq::parse(&payload).unwrap();
        assert_eq!(req.m1, [1u8; 16]);
        assert_eq!(req.m2, [2u8; 32]);
        assert_eq!(req.m3, [3u8; 16]);
        assert!(LoadKeyReq::parse(&payload[..63]).is_err());
    }

    #[test]
    fn cipher_parse_keeps_trailing_data_inline() {
        let payload = [0x04, 0xAA, 0xBB, 0xCC];
        let req = CipherReq::parse(&payload).unwrap();
        assert_eq!(req.key_id, 0x04);
        assert_eq!(req.data, &[0xAA, 0xBB, 0xCC]);
        assert!(CipherReq::parse(&[]).is_err());
    }

    #[test]
    fn cipher_iv_parse() {
        let mut payload = vec![0x0E];
        payload.extend_from_slice(&[9u8; 16]);
        payload.extend_from_slice(&[1, 2, 3]);
        let req = CipherIvReq::parse(&payload).unwrap();
        assert_eq!(req.key_id, 0x0E);
        assert_eq!(req.iv, [9u8; 16]);
        assert_eq!(req.data, &[1, 2, 3]);
        assert!(CipherIvReq::parse(&payload[..16]).is_err());
    }

    #[test]
    fn verify_mac_parse_splits_message_and_mac() {
        let mut payload = vec![0x04, 0x00, 0x05, 0x04];
        payload.extend_from_slice(b"hello");
        payload.extend_from_slice(&[0xA1, 0xA2, 0xA3, 0xA4]);
        let req = VerifyMacReq::parse(&payload).unwrap();
        assert_eq!(req.key_id, 0x04);
        assert_eq!(req.message, b"hello");
        assert_eq!(req.mac, &[0xA1, 0xA2, 0xA3, 0xA4]);

        // MAC shorter than advertised
        payload.pop();
        assert_eq!(
            VerifyMacReq::parse(&payload).unwrap_err(),
            FrameError::Truncated("MAC")
        );
    }

    #[test]
    fn reply_layout() {
        let bytes = Reply::ok().field(&[0xAA, 0xBB]).into_bytes();
        assert_eq!(bytes, vec![0x00, 0xAA, 0xBB]);
        let err = Reply::status(ErrorCode::SequenceError).into_bytes();
        assert_eq!(err, vec![0x01]);
    }
}
