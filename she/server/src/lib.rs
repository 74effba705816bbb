/*!
    Server side of the SHE command set.

    [`SheServer`] dispatches decoded commands against one client session
    and a [`KeyStore`]: secure-boot measurement, the authenticated
    key-update protocol, the deterministic PRNG, and the AES/CMAC services.
    The [`update`] module exposes the M1..M5 message construction so a
    provisioning host can build updates for a remote module; [`crypto`]
    holds the shared AES-MP/CMAC helpers.
*/

mod boot;
mod keystore;
mod prng;
mod server;
mod session;

pub mod crypto;
pub mod update;

pub use self::boot::BootState;
pub use self::keystore::{KeyStore, MemStore, StoreError};
pub use self::server::SheServer;
