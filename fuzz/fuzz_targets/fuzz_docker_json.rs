#![no_main]

use libfuzzer_sys::fuzz_target;
use local_router::discovery::{parse_containers, routes_from_containers};

fuzz_target!(|data: &[u8]| {
    let Ok(containers) = parse_containers(data) else {
        return;
    };

    let routes = routes_from_containers(&containers, "local-router.host");
    assert!(routes.len() <= containers.len());
    for (host, ip) in &routes {
        assert!(!host.is_empty());
        assert!(!ip.is_empty());
        assert_eq!(host, &host.to_lowercase());
    }
});
