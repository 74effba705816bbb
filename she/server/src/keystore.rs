use std::collections::HashMap;

use thiserror::Error;

use she_core::{KeyMetadata, SlotId};

/**
    Errors surfaced by the key-store facade.
*/
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no object in slot")]
    NotFound,
    #[error("store rejected the object: {0}")]
    Storage(String),
}

/**
    Facade over the NVM key objects and the volatile RAM-key cache.

    Keys are addressed by (client, slot). Reads consult the cache before
    NVM, so a cached RAM key shadows whatever an authenticated update may
    have persisted earlier. `add_object` overwrites in NVM; `cache_ram_key`
    never touches NVM.
*/
pub trait KeyStore {
    fn read_key(&self, client: u8, slot: SlotId) -> Result<([u8; 16], KeyMetadata), StoreError>;

    fn add_object(
        &mut self,
        client: u8,
        slot: SlotId,
        meta: KeyMetadata,
        key: [u8; 16],
    ) -> Result<(), StoreError>;

    fn cache_ram_key(
        &mut self,
        client: u8,
        slot: SlotId,
        meta: KeyMetadata,
        key: [u8; 16],
    ) -> Result<(), StoreError>;
}

/**
    In-memory key store: a map standing in for NVM plus the RAM-key cache.
*/
#[derive(Default)]
pub struct MemStore {
    nvm: HashMap<(u8, SlotId), (KeyMetadata, [u8; 16])>,
    cache: HashMap<(u8, SlotId), (KeyMetadata, [u8; 16])>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /**
        Seed an NVM slot directly, bypassing the update protocol. This is
        the provisioning path a factory tool would use.
    */
    pub fn preload(&mut self, client: u8, slot: SlotId, meta: KeyMetadata, key: [u8; 16]) {
        self.nvm.insert((client, slot), (meta, key));
    }
}

impl KeyStore for MemStore {
    fn read_key(&self, client: u8, slot: SlotId) -> Result<([u8; 16], KeyMetadata), StoreError> {
        self.cache
            .get(&(client, slot))
            .or_else(|| self.nvm.get(&(client, slot)))
            .map(|&(meta, key)| (key, meta))
            .ok_or(StoreError::NotFound)
    }

    fn add_object(
        &mut self,
        client: u8,
        slot: SlotId,
        meta: KeyMetadata,
        key: [u8; 16],
    ) -> Result<(), StoreError> {
        self.nvm.insert((client, slot), (meta, key));
        Ok(())
    }

    fn cache_ram_key(
        &mut self,
        client: u8,
        slot: SlotId,
        meta: KeyMetadata,
        key: [u8; 16],
    ) -> Result<(), StoreError> {
        self.cache.insert((client, slot), (meta, key));
        Ok(())
    }
}
