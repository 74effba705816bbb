use zeroize::Zeroizing;

use she_core::constants::{PRNG_KEY_C, PRNG_SEED_KEY_C, sreg};
use she_core::{
    CipherIvReq, CipherReq, Command, ErrorCode, ExtendSeedReq, FrameError, KeyFlags, KeyMetadata,
    LoadKeyReq, LoadPlainKeyReq, Reply, SecureBootInitReq, SetUidReq, SheError, SheResult, SlotId,
    Uid, VerifyMacReq,
};

use crate::boot::BootState;
use crate::crypto::{self, ZERO_IV, cmac_tag};
use crate::keystore::{KeyStore, StoreError};
use crate::session::Session;
use crate::update;

/// Status reported when gating refuses a command.
const GATE_REFUSAL: ErrorCode = ErrorCode::SequenceError;

/**
    The SHE command dispatcher: one per client session.

    Every decoded command runs to completion against the session state and
    the shared key store. Failures defined by the protocol come back inside
    the reply (`rc` byte); only an unusable request frame fails the
    dispatch call itself.
*/
pub struct SheServer<S: KeyStore> {
    store: S,
    client: u8,
    session: Session,
}

impl<S: KeyStore> SheServer<S> {
    pub fn new(store: S, client: u8) -> SheServer<S> {
        SheServer {
            store,
            client,
            session: Session::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Direct store access, the factory-provisioning path.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn boot_state(&self) -> BootState {
        self.session.boot.state()
    }

    /**
        Drop any in-flight boot measurement. Transports that abandon a
        request before its reply call this so the streaming context is not
        left live.
    */
    pub fn reset_boot(&mut self) {
        self.session.boot.reset();
    }

    /**
        Dispatch a raw frame: action byte followed by the payload.
    */
    pub fn handle_raw(&mut self, frame: &[u8]) -> Result<Vec<u8>, FrameError> {
        let (&action, payload) = frame
            .split_first()
            .ok_or(FrameError::Truncated("action"))?;
        let action = Command::from_u8(action).ok_or(FrameError::UnknownCommand(action))?;
        self.handle(action, payload)
    }

    /**
        Dispatch one decoded command.

        Until SET_UID binds an identity only SET_UID is accepted, and until
        the boot measurement reaches Success only the secure-boot commands
        and GET_STATUS join it; everything else is refused with
        [`GATE_REFUSAL`] before its handler runs.
    */
    pub fn handle(&mut self, action: Command, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        if !self.gate_allows(action) {
            return Ok(Reply::status(GATE_REFUSAL).into_bytes());
        }

        let result: SheResult<Reply> = match action {
            Command::SetUid => {
                let req = SetUidReq::parse(payload)?;
                self.set_uid(req)
            }
            Command::SecureBootInit => {
                let req = SecureBootInitReq::parse(payload)?;
                self.secure_boot_init(req)
            }
            Command::SecureBootUpdate => self.secure_boot_update(payload),
            Command::SecureBootFinish => self.secure_boot_finish(),
            Command::GetStatus => self.get_status(),
            Command::LoadKey => {
                let req = LoadKeyReq::parse(payload)?;
                self.load_key(req)
            }
            Command::LoadPlainKey => {
                let req = LoadPlainKeyReq::parse(payload)?;
                self.load_plain_key(req)
            }
            Command::ExportRamKey => self.export_ram_key(),
            Command::InitRnd => self.init_rnd(),
            Command::Rnd => self.rnd(),
            Command::ExtendSeed => {
                let req = ExtendSeedReq::parse(payload)?;
                self.extend_seed(req)
            }
            Command::EncEcb => {
                let req = CipherReq::parse(payload)?;
                self.enc_ecb(req)
            }
            Command::EncCbc => {
                let req = CipherIvReq::parse(payload)?;
                self.enc_cbc(req)
            }
            Command::DecEcb => {
                let req = CipherReq::parse(payload)?;
                self.dec_ecb(req)
            }
            Command::DecCbc => {
                let req = CipherIvReq::parse(payload)?;
                self.dec_cbc(req)
            }
            Command::GenMac => {
                let req = CipherReq::parse(payload)?;
                self.generate_mac(req)
            }
            Command::VerifyMac => {
                let req = VerifyMacReq::parse(payload)?;
                self.verify_mac(req)
            }
        };

        match result {
            Ok(reply) => Ok(reply.into_bytes()),
            Err(err) => {
                // A failed secure-boot step restarts the measurement, except
                // for the skip status and the terminal mismatch verdict.
                if is_secure_boot(action)
                    && !matches!(err, SheError::NoSecureBoot | SheError::Measurement)
                {
                    self.session.boot.reset();
                }
                Ok(Reply::status(err.rc()).into_bytes())
            }
        }
    }

    fn gate_allows(&self, action: Command) -> bool {
        if !self.session.uid_set && action != Command::SetUid {
            return false;
        }
        if self.session.boot.state() != BootState::Success && !allowed_before_boot(action) {
            return false;
        }
        true
    }

    // ── Session commands ──────────────────────────────────────────────

    fn set_uid(&mut self, req: SetUidReq) -> SheResult<Reply> {
        if self.session.uid_set {
            return Err(SheError::Sequence);
        }
        self.session.uid = Uid::new(req.uid);
        self.session.uid_set = true;
        Ok(Reply::ok())
    }

    fn get_status(&self) -> SheResult<Reply> {
        let mut status = 0u8;
        if self.session.boot.key_found() {
            status |= sreg::SECURE_BOOT;
        }
        if matches!(
            self.session.boot.state(),
            BootState::Success | BootState::Failure
        ) {
            status |= sreg::BOOT_FINISHED;
        }
        if self.session.boot.state() == BootState::Success {
            status |= sreg::BOOT_OK;
        }
        if self.session.prng.inited() {
            status |= sreg::RND_INIT;
        }
        Ok(Reply::ok().field(&[status]))
    }

    // ── Secure boot ───────────────────────────────────────────────────

    fn secure_boot_init(&mut self, req: SecureBootInitReq) -> SheResult<Reply> {
        if self.session.boot.state() != BootState::Init {
            return Err(SheError::Sequence);
        }
        match self.store.read_key(self.client, SlotId::BOOT_MAC_KEY) {
            Ok((key, _)) => {
                let key = Zeroizing::new(key);
                self.session.boot.begin(req.size, &key)?;
                Ok(Reply::ok())
            }
            Err(StoreError::NotFound) => {
                // No measurement key provisioned: skip straight to usable.
                self.session.boot.skip();
                Err(SheError::NoSecureBoot)
            }
            Err(e) => Err(store_err(e)),
        }
    }

    fn secure_boot_update(&mut self, chunk: &[u8]) -> SheResult<Reply> {
        self.session.boot.absorb(chunk)?;
        Ok(Reply::ok())
    }

    fn secure_boot_finish(&mut self) -> SheResult<Reply> {
        if self.session.boot.state() != BootState::Finish {
            return Err(SheError::Sequence);
        }
        let (mac, _) = match self.store.read_key(self.client, SlotId::BOOT_MAC) {
            Ok(found) => found,
            Err(StoreError::NotFound) => return Err(SheError::KeyNotAvailable),
            Err(e) => return Err(store_err(e)),
        };
        if self.session.boot.verify(&mac)? {
            Ok(Reply::ok())
        } else {
            Err(SheError::Measurement)
        }
    }

    // ── Key management ────────────────────────────────────────────────

    fn load_key(&mut self, req: LoadKeyReq) -> SheResult<Reply> {
        let (m1_uid, id_nibble, auth_nibble) = update::unpack_m1(&req.m1);
        let auth_slot = SlotId::new(auth_nibble).ok_or(SheError::KeyNotAvailable)?;
        let target_slot = SlotId::new(id_nibble).ok_or(SheError::KeyUpdate)?;

        let auth_key = match self.store.read_key(self.client, auth_slot) {
            Ok((key, _)) => Zeroizing::new(key),
            Err(StoreError::NotFound) => return Err(SheError::KeyNotAvailable),
            Err(e) => return Err(store_err(e)),
        };

        update::authenticate(&auth_key, &req.m1, &req.m2, &req.m3)?;
        let payload = update::decrypt_m2(&auth_key, &req.m2)?;

        let existing = match self.store.read_key(self.client, target_slot) {
            Ok((_, meta)) => {
                if meta.flags.contains(KeyFlags::WRITE_PROTECT) {
                    return Err(SheError::WriteProtected);
                }
                Some(meta)
            }
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(store_err(e)),
        };

        // An all-zero UID is only honored on wildcard slots; otherwise the
        // update must name this device. An absent slot has no wildcard.
        let stored_flags = existing.map(|m| m.flags).unwrap_or_default();
        if Uid::new(m1_uid).is_zero() {
            if !stored_flags.contains(KeyFlags::WILDCARD) {
                return Err(SheError::KeyUpdate);
            }
        } else if m1_uid != *self.session.uid.as_bytes() {
            return Err(SheError::KeyUpdate);
        }

        if existing.is_some_and(|meta| payload.counter <= meta.counter()) {
            return Err(SheError::KeyUpdate);
        }

        let new_meta = KeyMetadata::new(payload.flags, payload.counter);
        let stored_counter = if target_slot.is_ram() {
            self.store
                .cache_ram_key(self.client, target_slot, new_meta, payload.new_key)
                .map_err(|_| SheError::KeyUpdate)?;
            payload.counter
        } else {
            self.store
                .add_object(self.client, target_slot, new_meta, payload.new_key)
                .map_err(|_| SheError::KeyUpdate)?;
            // Confirm with the counter as persisted, not as presented.
            let (_, meta) = self
                .store
                .read_key(self.client, target_slot)
                .map_err(|_| SheError::KeyUpdate)?;
            meta.counter()
        };

        let (m4, m5) = update::confirm(
            &self.session.uid,
            target_slot,
            auth_slot,
            stored_counter,
            &payload.new_key,
        )?;
        if target_slot.is_ram() {
            self.session.ram_key_plain = true;
        }
        Ok(Reply::ok().field(&m4).field(&m5))
    }

    fn load_plain_key(&mut self, req: LoadPlainKeyReq) -> SheResult<Reply> {
        self.store
            .cache_ram_key(
                self.client,
                SlotId::RAM_KEY,
                KeyMetadata::default(),
                req.key,
            )
            .map_err(store_err)?;
        self.session.ram_key_plain = true;
        Ok(Reply::ok())
    }

    fn export_ram_key(&mut self) -> SheResult<Reply> {
        if !self.session.ram_key_plain {
            return Err(SheError::KeyInvalid);
        }
        let secret = Zeroizing::new(self.read_key(SlotId::SECRET_KEY)?.0);
        let ram_key = Zeroizing::new(self.read_key(SlotId::RAM_KEY)?.0);
        let bundle = update::export_bundle(&self.session.uid, &secret, &ram_key)?;
        Ok(Reply::ok()
            .field(&bundle.m1)
            .field(&bundle.m2)
            .field(&bundle.m3)
            .field(&bundle.m4)
            .field(&bundle.m5))
    }

    // ── PRNG ──────────────────────────────────────────────────────────

    fn init_rnd(&mut self) -> SheResult<Reply> {
        if self.session.prng.inited() {
            return Err(SheError::Sequence);
        }
        let secret = Zeroizing::new(self.read_key(SlotId::SECRET_KEY)?.0);
        let seed_key = update::derive_key(&secret, &PRNG_SEED_KEY_C)?;

        let (seed, seed_meta) = self.read_key(SlotId::PRNG_SEED)?;
        let seed = Zeroizing::new(seed);

        // Rotate the persisted seed before any output depends on it.
        let rotated = crypto::cbc_encrypt(&seed_key, &ZERO_IV, seed.as_slice())?;
        let rotated: [u8; 16] = rotated
            .as_slice()
            .try_into()
            .map_err(|_| SheError::Crypto("seed length mismatch".into()))?;
        self.store
            .add_object(self.client, SlotId::PRNG_SEED, seed_meta, rotated)
            .map_err(|_| SheError::KeyUpdate)?;

        let prng_key = update::derive_key(&secret, &PRNG_KEY_C)?;
        self.session.prng.install(*prng_key, rotated);
        Ok(Reply::ok())
    }

    fn rnd(&mut self) -> SheResult<Reply> {
        let out = self.session.prng.next()?;
        Ok(Reply::ok().field(&out))
    }

    fn extend_seed(&mut self, req: ExtendSeedReq) -> SheResult<Reply> {
        self.session.prng.stir(&req.entropy)?;

        let (seed, seed_meta) = self.read_key(SlotId::PRNG_SEED)?;
        let mut input = Zeroizing::new([0u8; 32]);
        input[..16].copy_from_slice(&seed);
        input[16..].copy_from_slice(&req.entropy);
        let extended = crypto::aes_mp16(input.as_slice())?;
        self.store
            .add_object(self.client, SlotId::PRNG_SEED, seed_meta, extended)
            .map_err(|_| SheError::KeyUpdate)?;
        Ok(Reply::ok())
    }

    // ── Cipher services ───────────────────────────────────────────────

    fn enc_ecb(&mut self, req: CipherReq<'_>) -> SheResult<Reply> {
        let key = self.cipher_key(req.key_id)?;
        let out = crypto::ecb_encrypt(&key, whole_blocks(req.data))?;
        Ok(Reply::ok().field(&out))
    }

    fn dec_ecb(&mut self, req: CipherReq<'_>) -> SheResult<Reply> {
        let key = self.cipher_key(req.key_id)?;
        let out = crypto::ecb_decrypt(&key, whole_blocks(req.data))?;
        Ok(Reply::ok().field(&out))
    }

    fn enc_cbc(&mut self, req: CipherIvReq<'_>) -> SheResult<Reply> {
        let key = self.cipher_key(req.key_id)?;
        let out = crypto::cbc_encrypt(&key, &req.iv, whole_blocks(req.data))?;
        Ok(Reply::ok().field(&out))
    }

    fn dec_cbc(&mut self, req: CipherIvReq<'_>) -> SheResult<Reply> {
        let key = self.cipher_key(req.key_id)?;
        let out = crypto::cbc_decrypt(&key, &req.iv, whole_blocks(req.data))?;
        Ok(Reply::ok().field(&out))
    }

    fn generate_mac(&mut self, req: CipherReq<'_>) -> SheResult<Reply> {
        let key = self.cipher_key(req.key_id)?;
        let mac = cmac_tag(&key, req.data);
        Ok(Reply::ok().field(&mac))
    }

    fn verify_mac(&mut self, req: VerifyMacReq<'_>) -> SheResult<Reply> {
        let key = self.cipher_key(req.key_id)?;
        let computed = cmac_tag(&key, req.message);
        let valid = (1..=16).contains(&req.mac.len()) && computed[..req.mac.len()] == *req.mac;
        Ok(Reply::ok().field(&[if valid { 0 } else { 1 }]))
    }

    // ── Store helpers ─────────────────────────────────────────────────

    fn read_key(&self, slot: SlotId) -> SheResult<([u8; 16], KeyMetadata)> {
        self.store.read_key(self.client, slot).map_err(store_err)
    }

    /// Resolve a host-selected cipher key slot. The PRNG seed lives in the
    /// store but is not a cipher key.
    fn cipher_key(&self, key_id: u8) -> SheResult<Zeroizing<[u8; 16]>> {
        let slot = SlotId::new(key_id)
            .filter(|&s| s != SlotId::PRNG_SEED)
            .ok_or(SheError::KeyNotAvailable)?;
        Ok(Zeroizing::new(self.read_key(slot)?.0))
    }
}

fn allowed_before_boot(action: Command) -> bool {
    matches!(
        action,
        Command::SetUid
            | Command::SecureBootInit
            | Command::SecureBootUpdate
            | Command::SecureBootFinish
            | Command::GetStatus
    )
}

fn is_secure_boot(action: Command) -> bool {
    matches!(
        action,
        Command::SecureBootInit | Command::SecureBootUpdate | Command::SecureBootFinish
    )
}

fn store_err(e: StoreError) -> SheError {
    match e {
        StoreError::NotFound => SheError::KeyNotAvailable,
        StoreError::Storage(msg) => SheError::Store(msg),
    }
}

/// Silently drop a trailing partial block, the ENC_/DEC_ length contract.
fn whole_blocks(data: &[u8]) -> &[u8] {
    &data[..data.len() - data.len() % 16]
}
