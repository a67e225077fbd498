#![no_main]

use bytes::{Buf, BytesMut};
use graphwire::protocol::{decode_client_message, decode_message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed the buffer in a loop to simulate multiple messages arriving
    // in a single TCP segment.
    let mut buf = BytesMut::from(data);
    loop {
        match decode_message(&mut buf) {
            Ok(Some((_, consumed))) if consumed > 0 => buf.advance(consumed),
            _ => break,
        }
    }

    let mut buf = BytesMut::from(data);
    loop {
        match decode_client_message(&mut buf) {
            Ok(Some((_, consumed))) if consumed > 0 => buf.advance(consumed),
            _ => break,
        }
    }
});
