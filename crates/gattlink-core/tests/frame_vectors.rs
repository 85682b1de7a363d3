use gattlink_core::adv::build_legacy_payload;
use gattlink_core::config::{resolve, Preset};
use gattlink_core::{decode, encode, FrameError, MAX_PAYLOAD};

fn read_vector(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/vectors/{name}", env!("CARGO_MANIFEST_DIR"));
    let text = std::fs::read_to_string(path).expect("vector file must exist");
    hex::decode(text.trim()).expect("vector must be valid hex")
}

fn max_payload() -> Vec<u8> {
    (0..MAX_PAYLOAD).map(|i| (i % 256) as u8).collect()
}

#[test]
fn golden_frame_vectors_match() {
    let cases: [(&str, u8, Vec<u8>); 3] = [
        ("frame_hello.hex", 0x42, b"hello".to_vec()),
        ("frame_empty.hex", 0x00, Vec::new()),
        ("frame_max.hex", 0x07, max_payload()),
    ];
    for (file, id, payload) in cases {
        let expected = read_vector(file);
        let encoded = encode(id, &payload).expect("vector payload should encode");
        assert_eq!(
            encoded,
            expected,
            "update tests/vectors/{file} to: {}",
            hex::encode(&encoded)
        );

        let packet = decode(&expected).expect("vector should decode");
        assert_eq!(packet.id, id);
        assert_eq!(packet.payload, payload);
    }
}

#[test]
fn truncated_golden_vector_is_rejected() {
    let mut bytes = read_vector("frame_hello.hex");
    bytes.pop();
    assert_eq!(
        decode(&bytes),
        Err(FrameError::LengthMismatch {
            declared: 5,
            available: 4
        })
    );
}

#[test]
fn golden_legacy_advertising_payload_matches() {
    let config = resolve(Preset::Ble4Default);
    let payload = build_legacy_payload(config.adv_flags, "gattlink", config.gatt.service_uuid());
    let expected = read_vector("adv_legacy_nus.hex");
    assert_eq!(
        payload,
        expected,
        "update tests/vectors/adv_legacy_nus.hex to: {}",
        hex::encode(&payload)
    );
}
