use she_core::constants::BOOT_MAC_PREFIX;
use she_core::{SheError, SheResult};

use crate::crypto::CmacStream;

/**
    Secure-boot measurement progress.

    `Init → Update* → Finish → Success | Failure`, driven strictly in that
    order by the three SECURE_BOOT commands. The terminal states gate the
    rest of the command set.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    Init,
    Update,
    Finish,
    Success,
    Failure,
}

/**
    Streaming CMAC measurement of the bootloader image.

    The CMAC context only exists between SECURE_BOOT_INIT and the final
    comparison; `reset` drops it along with the byte counters.
*/
pub struct BootMeasure {
    state: BootState,
    expected: u32,
    received: u32,
    key_found: bool,
    digest: Option<CmacStream>,
}

impl BootMeasure {
    pub fn new() -> BootMeasure {
        BootMeasure {
            state: BootState::Init,
            expected: 0,
            received: 0,
            key_found: false,
            digest: None,
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    pub fn key_found(&self) -> bool {
        self.key_found
    }

    /// Back to Init: counters cleared, streaming context released.
    pub fn reset(&mut self) {
        *self = BootMeasure::new();
    }

    /**
        No boot MAC key is provisioned: secure boot is skipped and the
        module is immediately usable, with the measurement reported absent.
    */
    pub fn skip(&mut self) {
        self.reset();
        self.state = BootState::Success;
    }

    /**
        Open the measurement. The digest absorbs 12 zero bytes followed by
        the size field exactly as it was transmitted.
    */
    pub fn begin(&mut self, size: u32, mac_key: &[u8; 16]) -> SheResult<()> {
        if self.state != BootState::Init {
            return Err(SheError::Sequence);
        }
        self.expected = size;
        self.received = 0;
        self.key_found = true;

        let mut digest = CmacStream::new(mac_key);
        digest.update(&[0u8; BOOT_MAC_PREFIX]);
        digest.update(&size.to_be_bytes());
        self.digest = Some(digest);
        self.state = BootState::Update;
        Ok(())
    }

    /**
        Absorb one bootloader chunk. Receiving more bytes than announced at
        init is a sequence violation.
    */
    pub fn absorb(&mut self, chunk: &[u8]) -> SheResult<()> {
        if self.state != BootState::Update {
            return Err(SheError::Sequence);
        }
        let len = u32::try_from(chunk.len()).map_err(|_| SheError::Sequence)?;
        self.received = self
            .received
            .checked_add(len)
            .ok_or(SheError::Sequence)?;
        if self.received > self.expected {
            return Err(SheError::Sequence);
        }

        self.digest
            .as_mut()
            .ok_or(SheError::Sequence)?
            .update(chunk);
        if self.received == self.expected {
            self.state = BootState::Finish;
        }
        Ok(())
    }

    /**
        Close the measurement and compare against the stored digest,
        entering the matching terminal state.
    */
    pub fn verify(&mut self, expected_mac: &[u8; 16]) -> SheResult<bool> {
        if self.state != BootState::Finish {
            return Err(SheError::Sequence);
        }
        let computed = self.digest.take().ok_or(SheError::Sequence)?.finalize();
        if computed == *expected_mac {
            self.state = BootState::Success;
            Ok(true)
        } else {
            self.state = BootState::Failure;
            Ok(false)
        }
    }
}

impl Default for BootMeasure {
    fn default() -> Self {
        BootMeasure::new()
    }
}
