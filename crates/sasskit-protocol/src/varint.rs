//! Base-128 varint framing.
//!
//! A frame is an unsigned LEB128 length followed by exactly that many
//! payload bytes. Reads block until the full payload is available.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Upper bound on a single frame's payload, checked before allocating.
pub const MAX_FRAME_LEN: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended cleanly before the first byte of a frame.
    #[error("stream ended at a frame boundary")]
    Eof,
    /// The stream ended mid-varint or mid-payload.
    #[error("stream ended inside a frame")]
    TransportClosed,
    /// More than ten varint bytes without a terminator.
    #[error("varint length prefix does not terminate within ten bytes")]
    Overflow,
    /// Declared payload length exceeds [`MAX_FRAME_LEN`].
    #[error("frame length {0} exceeds the {MAX_FRAME_LEN}-byte cap")]
    FrameTooLarge(u64),
    #[error("frame i/o: {0}")]
    Io(#[from] io::Error),
}

/// Reads one unsigned varint.
///
/// Accumulates 7 low bits per byte, least significant group first, and
/// stops at the first byte with its high bit clear.
pub fn read_varint(reader: &mut impl Read) -> Result<u64, FrameError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for index in 0..10 {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(if index == 0 {
                    FrameError::Eof
                } else {
                    FrameError::TransportClosed
                });
            }
            Err(err) => return Err(FrameError::Io(err)),
        }
        let low = u64::from(byte[0] & 0x7f);
        if shift == 63 && low > 1 {
            return Err(FrameError::Overflow);
        }
        value |= low << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(FrameError::Overflow)
}

/// Appends the varint encoding of `value` to `buf`.
pub fn push_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let low = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(low);
            return;
        }
        buf.push(low | 0x80);
    }
}

/// Writes one unsigned varint.
pub fn write_varint(writer: &mut impl Write, value: u64) -> io::Result<()> {
    let mut buf = Vec::with_capacity(10);
    push_varint(&mut buf, value);
    writer.write_all(&buf)
}

/// Reads one length-prefixed frame, blocking until the payload is complete.
pub fn read_frame(reader: &mut impl Read) -> Result<Vec<u8>, FrameError> {
    let len = read_varint(reader)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload) {
        Ok(()) => Ok(payload),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::TransportClosed),
        Err(err) => Err(FrameError::Io(err)),
    }
}

/// Writes one frame as a single `write_all` so concurrent writers holding
/// an external lock never interleave frame bytes.
pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(payload.len() + 5);
    push_varint(&mut buf, payload.len() as u64);
    buf.extend_from_slice(payload);
    writer.write_all(&buf)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        push_varint(&mut buf, value);
        buf
    }

    #[test]
    fn round_trips_boundary_values() {
        for value in [
            0u64,
            1,
            127,
            128,
            16_383,
            16_384,
            2_097_151,
            u64::from(u32::MAX),
            u64::MAX,
        ] {
            let buf = encode(value);
            let decoded = read_varint(&mut Cursor::new(&buf)).expect("decode");
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn emits_minimal_byte_count() {
        let cases: [(u64, usize); 6] = [
            (0, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (u64::MAX, 10),
        ];
        for (value, expected_len) in cases {
            let buf = encode(value);
            assert_eq!(buf.len(), expected_len, "value {value}");
            let (last, rest) = buf.split_last().expect("non-empty");
            assert_eq!(last & 0x80, 0, "final byte must clear the high bit");
            for byte in rest {
                assert_ne!(byte & 0x80, 0, "non-final bytes must set the high bit");
            }
        }
    }

    #[test]
    fn rejects_unterminated_varint() {
        let err = read_varint(&mut Cursor::new(&[0xffu8; 10])).unwrap_err();
        assert!(matches!(err, FrameError::Overflow));
    }

    #[test]
    fn rejects_sixty_five_bit_value() {
        let mut buf = vec![0x80u8; 9];
        buf.push(0x02);
        let err = read_varint(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, FrameError::Overflow));
    }

    #[test]
    fn distinguishes_clean_eof_from_truncation() {
        let err = read_varint(&mut Cursor::new(&[])).unwrap_err();
        assert!(matches!(err, FrameError::Eof));

        let err = read_varint(&mut Cursor::new(&[0x80])).unwrap_err();
        assert!(matches!(err, FrameError::TransportClosed));
    }

    #[test]
    fn frame_round_trip() {
        let payload = b"embedded protocol payload".to_vec();
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).expect("write");
        let read = read_frame(&mut Cursor::new(&wire)).expect("read");
        assert_eq!(read, payload);
    }

    #[test]
    fn truncated_payload_is_transport_closed() {
        let mut wire = Vec::new();
        push_varint(&mut wire, 8);
        wire.extend_from_slice(b"abc");
        let err = read_frame(&mut Cursor::new(&wire)).unwrap_err();
        assert!(matches!(err, FrameError::TransportClosed));
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocation() {
        let mut wire = Vec::new();
        push_varint(&mut wire, MAX_FRAME_LEN + 1);
        let err = read_frame(&mut Cursor::new(&wire)).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge(_)));
    }

    #[test]
    fn concurrent_writers_produce_whole_frames() {
        use std::sync::{Arc, Mutex};

        let sink: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for n in 0u8..8 {
            let sink = Arc::clone(&sink);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let payload = vec![n; usize::from(n) * 37 + 1];
                    let mut guard = sink.lock().expect("sink lock");
                    write_frame(&mut *guard, &payload).expect("write");
                }
            }));
        }
        for handle in handles {
            handle.join().expect("writer thread");
        }

        let bytes = sink.lock().expect("sink lock").clone();
        let mut cursor = Cursor::new(&bytes);
        let mut frames = 0;
        loop {
            match read_frame(&mut cursor) {
                Ok(frame) => {
                    let (first, rest) = frame.split_first().expect("payload non-empty");
                    assert!(rest.iter().all(|b| b == first), "interleaved frame bytes");
                    frames += 1;
                }
                Err(FrameError::Eof) => break,
                Err(err) => panic!("malformed stream: {err}"),
            }
        }
        assert_eq!(frames, 8 * 50);
    }
}
