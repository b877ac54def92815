//! Length-prefixed wrapper framing
//!
//! Each frame on the wire is `[length:2 BE][payload: length bytes]`. The
//! frames handed out by [`FrameAssembler`] include the 2-byte prefix.

use bytes::{BufMut, Bytes, BytesMut};
use dlms_core::{DlmsError, DlmsResult};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Reassembles frames from a stream of arbitrarily split chunks
///
/// Bytes of a partially received frame stay buffered until the rest
/// arrives; complete frames are split off and returned as owned [`Bytes`],
/// so the buffer only ever holds the unconsumed tail.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every frame it completes, in wire order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(frame_len) = self.complete_frame_len() {
            frames.push(self.buffer.split_to(frame_len).freeze());
        }
        frames
    }

    /// Length of the frame at the head of the buffer, if it is complete
    fn complete_frame_len(&self) -> Option<usize> {
        if self.buffer.len() < LENGTH_PREFIX_LEN {
            return None;
        }
        let declared = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
        let frame_len = declared + LENGTH_PREFIX_LEN;
        (self.buffer.len() >= frame_len).then_some(frame_len)
    }

    /// Number of bytes waiting for the rest of their frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially received frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Payload of a frame returned by [`FrameAssembler::push`]
    pub fn payload(frame: &[u8]) -> &[u8] {
        frame.get(LENGTH_PREFIX_LEN..).unwrap_or_default()
    }
}

/// Wrap `payload` in a length-prefixed frame
///
/// # Errors
/// Returns a validation error if the payload does not fit a 16-bit length
pub fn encode_frame(payload: &[u8]) -> DlmsResult<Bytes> {
    let length = u16::try_from(payload.len()).map_err(|_| {
        DlmsError::validation(
            "payload",
            format!("{} bytes exceed the maximum frame payload of {}", payload.len(), u16::MAX),
        )
    })?;

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.put_u16(length);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&[0x00, 0x03, b'a', b'b', b'c', 0x00, 0x02, b'x', b'y']);

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], &[0x00, 0x03, b'a', b'b', b'c']);
        assert_eq!(FrameAssembler::payload(&frames[0]), b"abc");
        assert_eq!(FrameAssembler::payload(&frames[1]), b"xy");
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_partial_frame_waits_for_rest() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[0x00, 0x05, b'a', b'b']).is_empty());
        assert_eq!(assembler.buffered_len(), 4);

        let frames = assembler.push(b"cde");
        assert_eq!(frames.len(), 1);
        assert_eq!(FrameAssembler::payload(&frames[0]), b"abcde");
        assert_eq!(assembler.buffered_len(), 0);
    }

    #[test]
    fn test_split_length_prefix() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[0x00]).is_empty());
        assert!(assembler.push(&[0x01]).is_empty());
        let frames = assembler.push(&[0x7F, 0x00]);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0x00, 0x01, 0x7F]);
        // Start of the next frame stays buffered
        assert_eq!(assembler.buffered_len(), 1);
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(frames.len(), 2);
        assert!(FrameAssembler::payload(&frames[0]).is_empty());
    }

    #[test]
    fn test_frames_survive_later_pushes() {
        let mut assembler = FrameAssembler::new();
        let first = assembler.push(&[0x00, 0x01, 0xAA, 0x00]);
        let second = assembler.push(&[0x01, 0xBB]);
        assert_eq!(&first[0][..], &[0x00, 0x01, 0xAA]);
        assert_eq!(&second[0][..], &[0x00, 0x01, 0xBB]);
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x00, 0x09, 0x01]);
        assembler.clear();
        let frames = assembler.push(&[0x00, 0x01, 0x02]);
        assert_eq!(FrameAssembler::payload(&frames[0]), &[0x02]);
    }

    #[test]
    fn test_encode_frame() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..], &[0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);

        let too_long = vec![0u8; u16::MAX as usize + 1];
        assert!(encode_frame(&too_long).unwrap_err().is_validation());
    }
}
