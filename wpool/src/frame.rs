//! Length-prefixed command framing
//!
//! Every frame is a fixed 10-byte header - command (u16) and payload length
//! (u64), both little-endian - followed by exactly that many payload bytes.
//! Commands and payloads are opaque at this layer. The decoder is
//! incremental: input is buffered until a whole frame is available, so
//! partial reads never lose header bytes.

use crate::error::{PoolError, Result};

/// Fixed frame header size in bytes
pub const HEADER_SIZE: usize = 10;

/// Upper bound on a single payload; anything larger is a protocol error
pub const MAX_PAYLOAD: u64 = 64 * 1024 * 1024;

/// One decoded frame: a command code with its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireTask {
    pub cmd: u16,
    pub payload: Vec<u8>,
}

impl WireTask {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Encode one frame into a fresh buffer
pub fn encode(cmd: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&cmd.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incremental frame decoder with back-buffering.
///
/// Single producer, single consumer: push bytes as they arrive, pop frames
/// as they complete. No internal locking.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer freshly received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is fully buffered.
    ///
    /// An incomplete frame consumes nothing; the header stays in the buffer
    /// until its payload arrives.
    pub fn next_frame(&mut self) -> Result<Option<WireTask>> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let cmd = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        let len = u64::from_le_bytes(self.buf[2..HEADER_SIZE].try_into().expect("8 header bytes"));
        if len > MAX_PAYLOAD {
            return Err(PoolError::FrameTooLarge(len));
        }

        let frame_end = HEADER_SIZE + len as usize;
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        let payload = self.buf[HEADER_SIZE..frame_end].to_vec();
        self.buf.drain(..frame_end);
        Ok(Some(WireTask { cmd, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_is_exactly_ten_bytes() {
        let frame = encode(7, b"");
        assert_eq!(frame.len(), HEADER_SIZE);
    }

    #[test]
    fn test_encode_layout_is_little_endian() {
        let frame = encode(0x0102, b"ab");
        assert_eq!(&frame[..2], &[0x02, 0x01]);
        assert_eq!(&frame[2..10], &[2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&frame[10..], b"ab");
    }

    #[test]
    fn test_roundtrip_single_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&encode(102, b"payload"));

        let task = decoder.next_frame().unwrap().unwrap();
        assert_eq!(task.cmd, 102);
        assert_eq!(task.payload, b"payload");
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_header_consumes_nothing() {
        let mut decoder = FrameDecoder::new();
        let frame = encode(5, b"xyz");

        decoder.push(&frame[..4]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), 4);

        decoder.push(&frame[4..]);
        let task = decoder.next_frame().unwrap().unwrap();
        assert_eq!(task.cmd, 5);
        assert_eq!(task.payload, b"xyz");
    }

    #[test]
    fn test_partial_payload_keeps_header_buffered() {
        let mut decoder = FrameDecoder::new();
        let frame = encode(1, &[9u8; 100]);

        decoder.push(&frame[..HEADER_SIZE + 50]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.buffered(), HEADER_SIZE + 50);

        decoder.push(&frame[HEADER_SIZE + 50..]);
        let task = decoder.next_frame().unwrap().unwrap();
        assert_eq!(task.payload.len(), 100);
    }

    #[test]
    fn test_concatenated_frames_decode_in_order() {
        let mut bytes = Vec::new();
        for i in 0..10u16 {
            bytes.extend_from_slice(&encode(i, format!("p{i}").as_bytes()));
        }

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        for i in 0..10u16 {
            let task = decoder.next_frame().unwrap().unwrap();
            assert_eq!(task.cmd, i);
            assert_eq!(task.payload, format!("p{i}").as_bytes());
        }
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut decoder = FrameDecoder::new();
        let mut header = Vec::new();
        header.extend_from_slice(&1u16.to_le_bytes());
        header.extend_from_slice(&(MAX_PAYLOAD + 1).to_le_bytes());
        decoder.push(&header);

        assert!(matches!(decoder.next_frame(), Err(PoolError::FrameTooLarge(_))));
    }

    proptest! {
        /// decode(encode(c, p)) == (c, p), byte-for-byte
        #[test]
        fn prop_roundtrip(cmd in any::<u16>(), payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let mut decoder = FrameDecoder::new();
            decoder.push(&encode(cmd, &payload));
            let task = decoder.next_frame().unwrap().unwrap();
            prop_assert_eq!(task.cmd, cmd);
            prop_assert_eq!(task.payload, payload);
        }

        /// A concatenated stream decodes to the same in-order sequence, no
        /// matter how it is split into reads
        #[test]
        fn prop_stream_roundtrip_arbitrary_splits(
            frames in proptest::collection::vec(
                (any::<u16>(), proptest::collection::vec(any::<u8>(), 0..256)),
                1..8,
            ),
            split in 1usize..64,
        ) {
            let mut bytes = Vec::new();
            for (cmd, payload) in &frames {
                bytes.extend_from_slice(&encode(*cmd, payload));
            }

            let mut decoder = FrameDecoder::new();
            let mut decoded = Vec::new();
            for chunk in bytes.chunks(split) {
                decoder.push(chunk);
                while let Some(task) = decoder.next_frame().unwrap() {
                    decoded.push((task.cmd, task.payload));
                }
            }
            prop_assert_eq!(decoded, frames);
        }
    }
}
