#![no_main]

use gattlink_core::{BleUuid, UuidByteOrder};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for order in [UuidByteOrder::LittleEndian, UuidByteOrder::BigEndian] {
        if let Ok(uuid) = BleUuid::parse(text, order) {
            assert_eq!(uuid.to_bytes().len(), uuid.byte_len());
        }
        let _ = BleUuid::parse_lenient(text, order);
    }
});
