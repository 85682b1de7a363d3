//! Characteristic wire frame.
//!
//! Every characteristic write and notification carries exactly one frame:
//!
//! ```text
//! +--------+----------------+----------------------+
//! | id: u8 | len: u16 (LE)  | payload: len bytes   |
//! +--------+----------------+----------------------+
//! ```

use crate::error::FrameError;

/// Header bytes preceding the payload.
pub const FRAME_HEADER_LEN: usize = 1 + 2;
/// Largest characteristic value accepted or produced, header included.
pub const MAX_FRAME_LEN: usize = 512;
/// Largest application payload carried by one frame.
pub const MAX_PAYLOAD: usize = MAX_FRAME_LEN - FRAME_HEADER_LEN;

/// One decoded application packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Builds a packet after checking the payload bound.
    pub fn new(id: u8, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Self { id, payload })
    }

    /// Payload length as carried in the header, saturating for payloads
    /// assigned past the frame bound.
    pub fn size(&self) -> u16 {
        u16::try_from(self.payload.len()).unwrap_or(u16::MAX)
    }

    /// Copies at most `dst.len()` payload bytes into `dst` and returns the
    /// number of bytes copied.
    pub fn copy_payload_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.payload.len());
        dst[..n].copy_from_slice(&self.payload[..n]);
        n
    }

    /// Encodes this packet into a characteristic value.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode(self.id, &self.payload)
    }
}

/// Frames `payload` under identifier `id`.
pub fn encode(id: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.push(id);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parses a raw characteristic value into a packet.
pub fn decode(bytes: &[u8]) -> Result<Packet, FrameError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FrameError::FrameTooShort {
            len: bytes.len(),
            min: FRAME_HEADER_LEN,
        });
    }
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let declared = u16::from_le_bytes([bytes[1], bytes[2]]) as usize;
    let body = &bytes[FRAME_HEADER_LEN..];
    if declared != body.len() {
        return Err(FrameError::LengthMismatch {
            declared,
            available: body.len(),
        });
    }
    Ok(Packet {
        id: bytes[0],
        payload: body.to_vec(),
    })
}

/// Encoded length of a frame carrying `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> usize {
    FRAME_HEADER_LEN + payload_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_id_then_le_length() {
        let frame = encode(0x42, &[0xAA, 0xBB]).expect("encode");
        assert_eq!(frame, vec![0x42, 0x02, 0x00, 0xAA, 0xBB]);
    }

    #[test]
    fn max_payload_boundary() {
        let ok = vec![7_u8; MAX_PAYLOAD];
        let frame = encode(1, &ok).expect("max payload must encode");
        assert_eq!(frame.len(), MAX_FRAME_LEN);

        let too_big = vec![7_u8; MAX_PAYLOAD + 1];
        assert_eq!(
            encode(1, &too_big),
            Err(FrameError::PayloadTooLarge {
                len: MAX_PAYLOAD + 1,
                max: MAX_PAYLOAD
            })
        );
    }

    #[test]
    fn decode_rejects_short_and_oversized_values() {
        assert!(matches!(
            decode(&[1, 0]),
            Err(FrameError::FrameTooShort { len: 2, .. })
        ));
        let oversized = vec![0_u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            decode(&oversized),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn decode_rejects_length_mismatch() {
        assert_eq!(
            decode(&[9, 5, 0, 1, 2]),
            Err(FrameError::LengthMismatch {
                declared: 5,
                available: 2
            })
        );
    }

    #[test]
    fn empty_payload_frame_is_header_only() {
        let frame = encode(3, &[]).expect("encode");
        let packet = decode(&frame).expect("decode");
        assert_eq!(packet.id, 3);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn copy_payload_truncates_to_destination() {
        let packet = Packet::new(1, vec![1, 2, 3, 4, 5]).expect("packet");
        let mut small = [0_u8; 3];
        assert_eq!(packet.copy_payload_into(&mut small), 3);
        assert_eq!(small, [1, 2, 3]);

        let mut large = [0_u8; 8];
        assert_eq!(packet.copy_payload_into(&mut large), 5);
        assert_eq!(&large[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn size_saturates_for_oversized_payload_field() {
        let mut packet = Packet::new(1, vec![0_u8; 4]).expect("packet");
        assert_eq!(packet.size(), 4);
        packet.payload = vec![0_u8; usize::from(u16::MAX) + 10];
        assert_eq!(packet.size(), u16::MAX);
        assert!(packet.encode().is_err());
    }
}
