#![no_main]

use frankenengine_realm::{Realm, RealmConfig};
use libfuzzer_sys::fuzz_target;

const MAX_SOURCE_BYTES: usize = 4096;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_SOURCE_BYTES {
        return;
    }
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(realm) = Realm::from_config(&RealmConfig::default()) else {
        return;
    };

    // Whatever the program does, it must not panic and must not be able to
    // plant own properties on the host global.
    let host = realm.host().borrow();
    let before = host.heap().own_property_names(host.global()).ok();
    drop(host);
    let _ = realm.safe_eval(source);
    let host = realm.host().borrow();
    assert_eq!(host.heap().own_property_names(host.global()).ok(), before);
});
