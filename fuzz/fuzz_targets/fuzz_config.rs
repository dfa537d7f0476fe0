#![no_main]

use libfuzzer_sys::fuzz_target;
use local_router::Config;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(config) = Config::parse(input) {
        // A config that parsed must also have usable listener addresses
        assert!(config.http_addr().is_ok());
        assert!(config.https_addr().is_ok());
    }
});
