#![no_main]

use gattlink_core::{decode, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = decode(data) {
        let framed = encode(packet.id, &packet.payload).expect("decoded packet re-encodes");
        assert_eq!(framed, data);
    }
});
