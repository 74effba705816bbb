use zeroize::Zeroizing;

use she_core::{SheError, SheResult};

use crate::crypto::{self, ZERO_IV, aes_mp16};

/**
    Deterministic PRNG state.

    INIT_RND installs a derived key and the rotated seed; every RND output
    is one CBC step of the state under that key, and EXTEND_SEED folds host
    entropy into the state through the AES-MP compression. The seed
    rotation itself touches NVM and lives in the dispatcher.
*/
pub struct Prng {
    inited: bool,
    key: Zeroizing<[u8; 16]>,
    state: Zeroizing<[u8; 16]>,
}

impl Prng {
    pub fn new() -> Prng {
        Prng {
            inited: false,
            key: Zeroizing::new([0u8; 16]),
            state: Zeroizing::new([0u8; 16]),
        }
    }

    pub fn inited(&self) -> bool {
        self.inited
    }

    /// Key and state become meaningful from here on.
    pub fn install(&mut self, key: [u8; 16], state: [u8; 16]) {
        *self.key = key;
        *self.state = state;
        self.inited = true;
    }

    /**
        Advance the state by one block-cipher step and return it.
    */
    pub fn next(&mut self) -> SheResult<[u8; 16]> {
        if !self.inited {
            return Err(SheError::RngSeed);
        }
        let out = crypto::cbc_encrypt(&self.key, &ZERO_IV, self.state.as_slice())?;
        self.state.copy_from_slice(&out);
        Ok(*self.state)
    }

    /**
        Fold host entropy into the state.
    */
    pub fn stir(&mut self, entropy: &[u8; 16]) -> SheResult<()> {
        if !self.inited {
            return Err(SheError::RngSeed);
        }
        let mut input = Zeroizing::new([0u8; 32]);
        input[..16].copy_from_slice(self.state.as_slice());
        input[16..].copy_from_slice(entropy);
        *self.state = aes_mp16(input.as_slice())?;
        Ok(())
    }
}

impl Default for Prng {
    fn default() -> Self {
        Prng::new()
    }
}
