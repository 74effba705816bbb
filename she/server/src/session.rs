use she_core::Uid;

use crate::boot::BootMeasure;
use crate::prng::Prng;

/**
    Per-client session state, living from startup to reset.

    The UID binds once, the boot measurement gates the command set, and
    `ram_key_plain` records whether the RAM slot currently holds a key the
    host is allowed to export.
*/
pub struct Session {
    pub(crate) uid: Uid,
    pub(crate) uid_set: bool,
    pub(crate) boot: BootMeasure,
    pub(crate) prng: Prng,
    pub(crate) ram_key_plain: bool,
}

impl Session {
    pub fn new() -> Session {
        Session {
            uid: Uid::default(),
            uid_set: false,
            boot: BootMeasure::new(),
            prng: Prng::new(),
            ram_key_plain: false,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}
