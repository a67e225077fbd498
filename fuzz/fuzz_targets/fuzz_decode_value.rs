#![no_main]

use graphwire::protocol::decode_value;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic or overrun, only return Err.
    let _ = decode_value(data);
});
