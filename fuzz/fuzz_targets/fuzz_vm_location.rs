//! Fuzz target: `VmLocation` validation.

#![no_main]

use autohalt_core::VmLocation;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    match VmLocation::parse(data) {
        Ok(location) => {
            assert_eq!(location.as_str(), data.trim());
            assert!(!location.as_str().is_empty());
        }
        Err(_) => assert!(data.trim().is_empty()),
    }
});
