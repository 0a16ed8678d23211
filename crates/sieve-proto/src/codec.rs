//! rkyv encoding of requests and response streams.
//!
//! A request is one frame. A response is a sequence of [`StreamFrame`]s
//! concatenated into a single buffer: a schema-carrying record, zero or more
//! field-only records, then exactly one `End` trailer.

use bytes::BytesMut;
use rkyv::util::AlignedVec;

use crate::framing::{self, Frames};
use crate::{Error, QueryRequest, Record, Status, StreamFrame};

fn aligned(payload: &[u8]) -> AlignedVec<16> {
    let mut buf: AlignedVec<16> = AlignedVec::with_capacity(payload.len());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a request as a single frame.
pub fn encode_request(request: &QueryRequest) -> Result<Vec<u8>, Error> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(request)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    framing::encode_frame(&payload)
}

/// Decode a request frame.
pub fn decode_request(data: &[u8]) -> Result<QueryRequest, Error> {
    let payload = framing::extract_payload(data)?;
    rkyv::from_bytes::<QueryRequest, rkyv::rancor::Error>(&aligned(payload))
        .map_err(|e| Error::Deserialization(e.to_string()))
}

/// Append one stream frame to `buf`.
pub fn put_stream_frame(buf: &mut BytesMut, frame: &StreamFrame) -> Result<(), Error> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(frame)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    framing::put_frame(buf, &payload)
}

/// Decode a single stream frame payload.
pub fn decode_stream_frame(payload: &[u8]) -> Result<StreamFrame, Error> {
    rkyv::from_bytes::<StreamFrame, rkyv::rancor::Error>(&aligned(payload))
        .map_err(|e| Error::Deserialization(e.to_string()))
}

/// A fully received response stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedStream {
    pub records: Vec<Record>,
    pub status: Status,
}

/// Decode a concatenated response and check it against the stream grammar.
pub fn decode_stream(data: &[u8]) -> Result<DecodedStream, Error> {
    let mut records = Vec::new();
    let mut status = None;

    for payload in Frames::new(data) {
        if status.is_some() {
            return Err(Error::InvalidStream("frame after trailer".to_string()));
        }
        match decode_stream_frame(payload?)? {
            StreamFrame::Record(record) => {
                if records.is_empty() && record.schema.is_none() {
                    return Err(Error::InvalidStream(
                        "first record does not carry a schema".to_string(),
                    ));
                }
                if !records.is_empty() && record.schema.is_some() {
                    return Err(Error::InvalidStream(
                        "schema repeated after first record".to_string(),
                    ));
                }
                records.push(record);
            }
            StreamFrame::End(s) => status = Some(s),
        }
    }

    let status = status.ok_or_else(|| Error::InvalidStream("missing trailer".to_string()))?;
    Ok(DecodedStream { records, status })
}
