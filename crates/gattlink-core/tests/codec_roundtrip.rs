use gattlink_core::{decode, encode, frame::frame_len, FrameError, MAX_FRAME_LEN, MAX_PAYLOAD};
use proptest::prelude::*;

proptest! {
    #[test]
    fn decode_inverts_encode(id in any::<u8>(), payload in prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD)) {
        let frame = encode(id, &payload).expect("bounded payload encodes");
        prop_assert_eq!(frame.len(), frame_len(payload.len()));
        prop_assert!(frame.len() <= MAX_FRAME_LEN);

        let packet = decode(&frame).expect("encoded frame decodes");
        prop_assert_eq!(packet.id, id);
        prop_assert_eq!(packet.size() as usize, payload.len());
        prop_assert_eq!(packet.payload, payload);
    }

    #[test]
    fn oversized_payloads_never_encode(extra in 1_usize..64) {
        let payload = vec![0_u8; MAX_PAYLOAD + extra];
        let is_too_large = matches!(encode(0, &payload), Err(FrameError::PayloadTooLarge { .. }));
        prop_assert!(is_too_large);
    }

    #[test]
    fn decode_never_accepts_a_wrong_length(id in any::<u8>(), payload in prop::collection::vec(any::<u8>(), 1..64)) {
        let mut frame = encode(id, &payload).expect("encode");
        frame.pop();
        prop_assert!(decode(&frame).is_err());
    }
}
