//! Length-prefix framing.
//!
//! Every payload on the wire is preceded by a 4-byte big-endian length. A
//! reply carries several frames back to back, so decoding walks the buffer
//! with [`Frames`].

use bytes::{BufMut, BytesMut};

use crate::Error;

/// Maximum size of a single frame payload (4 MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Append a length-prefixed frame to `buf`.
pub fn put_frame(buf: &mut BytesMut, payload: &[u8]) -> Result<(), Error> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(())
}

/// Encode a single payload as a standalone frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, Error> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    put_frame(&mut buf, payload)?;
    Ok(buf.to_vec())
}

/// Read the declared payload length from the start of `data`.
pub fn read_length_prefix(data: &[u8]) -> Result<usize, Error> {
    let header: [u8; LENGTH_PREFIX_SIZE] = data
        .get(..LENGTH_PREFIX_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| {
            Error::InvalidFrame(format!(
                "buffer too short for length prefix: {} < {}",
                data.len(),
                LENGTH_PREFIX_SIZE
            ))
        })?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

/// Extract the payload of the single frame at the start of `frame`.
pub fn extract_payload(frame: &[u8]) -> Result<&[u8], Error> {
    let len = read_length_prefix(frame)?;
    frame
        .get(LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + len)
        .ok_or_else(|| {
            Error::InvalidFrame(format!(
                "frame incomplete: have {}, need {}",
                frame.len(),
                LENGTH_PREFIX_SIZE + len
            ))
        })
}

/// Iterator over the payloads of consecutive frames in a buffer.
pub struct Frames<'a> {
    rest: &'a [u8],
}

impl<'a> Frames<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<&'a [u8], Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match extract_payload(self.rest) {
            Ok(payload) => {
                self.rest = &self.rest[LENGTH_PREFIX_SIZE + payload.len()..];
                Some(Ok(payload))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_prefix() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_encode_frame_too_large() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            encode_frame(&payload),
            Err(Error::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_read_length_prefix_rejects_oversized_header() {
        let header = ((MAX_FRAME_SIZE as u32) + 1).to_be_bytes();
        assert!(read_length_prefix(&header).is_err());
        assert!(read_length_prefix(&[0, 0]).is_err());
    }

    #[test]
    fn test_extract_payload_ignores_trailing_bytes() {
        let frame = [0, 0, 0, 2, 1, 2, 3, 4, 5];
        assert_eq!(extract_payload(&frame).unwrap(), &[1, 2]);
        assert!(extract_payload(&[0, 0, 0, 5, 1]).is_err());
    }

    #[test]
    fn test_frames_walks_concatenated_buffer() {
        let mut buf = BytesMut::new();
        put_frame(&mut buf, b"a").unwrap();
        put_frame(&mut buf, b"").unwrap();
        put_frame(&mut buf, b"xyz").unwrap();

        let payloads: Vec<&[u8]> = Frames::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(payloads, vec![&b"a"[..], &b""[..], &b"xyz"[..]]);
    }

    #[test]
    fn test_frames_reports_truncation_once() {
        let data = [0, 0, 0, 1, 7, 0, 0, 0, 9, 1];
        let mut frames = Frames::new(&data);
        assert_eq!(frames.next().unwrap().unwrap(), &[7]);
        assert!(frames.next().unwrap().is_err());
        assert!(frames.next().is_none());
    }
}
