//! Walks a provisioning session across two modules sharing one SECRET_KEY:
//! module A derives a fresh session key from its PRNG, loads it into the
//! RAM slot and exports it; module B replays the exported bundle as an
//! authenticated LOAD_KEY. Both then produce the same CMAC.
//!
//! Run with: cargo run -p she-server --example provision

use anyhow::{Result, bail};

use she_core::{Command, ErrorCode, KeyMetadata, SlotId};
use she_server::{MemStore, SheServer};

const CLIENT: u8 = 1;
const SECRET_KEY: [u8; 16] = [0x13; 16];
const PRNG_SEED: [u8; 16] = [0x77; 16];

fn module() -> SheServer<MemStore> {
    let mut store = MemStore::new();
    store.preload(CLIENT, SlotId::SECRET_KEY, KeyMetadata::default(), SECRET_KEY);
    store.preload(CLIENT, SlotId::PRNG_SEED, KeyMetadata::default(), PRNG_SEED);
    SheServer::new(store, CLIENT)
}

fn run(server: &mut SheServer<MemStore>, action: Command, payload: &[u8]) -> Result<Vec<u8>> {
    let reply = server.handle(action, payload)?;
    match ErrorCode::from_u8(reply[0]) {
        Some(ErrorCode::NoError) | Some(ErrorCode::NoSecureBoot) => Ok(reply),
        Some(code) => bail!("{action:?} failed with rc {code:?}"),
        None => bail!("{action:?} returned an unknown rc {:#04x}", reply[0]),
    }
}

fn main() -> Result<()> {
    let uid: [u8; 15] = core::array::from_fn(|i| i as u8);

    let mut module_a = module();
    let mut module_b = module();

    // Bring both modules up: bind the UID, let secure boot skip (no boot
    // MAC key is provisioned here).
    for module in [&mut module_a, &mut module_b] {
        run(module, Command::SetUid, &uid)?;
        run(module, Command::SecureBootInit, &0u32.to_be_bytes())?;
    }

    // Module A draws a session key from its PRNG.
    run(&mut module_a, Command::InitRnd, &[])?;
    let session_key = run(&mut module_a, Command::Rnd, &[])?[1..].to_vec();
    println!("session key        {}", hex::encode(&session_key));

    // Load it into A's RAM slot and export the authenticated bundle.
    run(&mut module_a, Command::LoadPlainKey, &session_key)?;
    let export = run(&mut module_a, Command::ExportRamKey, &[])?;
    let bundle = &export[1..];
    println!("export M1          {}", hex::encode(&bundle[..16]));
    println!("export M2          {}", hex::encode(&bundle[16..48]));
    println!("export M3          {}", hex::encode(&bundle[48..64]));

    // Module B accepts the bundle as a LOAD_KEY and must confirm with the
    // exact M4/M5 the exporter predicted.
    let confirm = run(&mut module_b, Command::LoadKey, &bundle[..64])?;
    if confirm[1..] != bundle[64..] {
        bail!("confirmation mismatch between exporter and importer");
    }
    println!("confirmation       {}", hex::encode(&confirm[1..]));

    // Both modules now hold the session key: same CMAC on both sides.
    let message = b"attest this payload";
    let mut frame = vec![SlotId::RAM_KEY.to_u8()];
    frame.extend_from_slice(message);
    let mac_a = run(&mut module_a, Command::GenMac, &frame)?;
    let mac_b = run(&mut module_b, Command::GenMac, &frame)?;
    if mac_a != mac_b {
        bail!("modules disagree on the MAC");
    }
    println!("shared CMAC        {}", hex::encode(&mac_a[1..]));

    Ok(())
}
