//! Fuzz target: parsing of `vmrun list` output.
//!
//! Arbitrary output must never panic the parser, and every listed
//! location must be a usable VM location.

#![no_main]

use autohalt_core::VmLocation;
use autohalt_executor::parse_running_list;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let output = String::from_utf8_lossy(data);
    let running = parse_running_list(&output);
    for location in running.locations {
        assert!(!location.trim().is_empty(), "listed locations are never blank");
        assert!(VmLocation::parse(location).is_ok());
    }
});
