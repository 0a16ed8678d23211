//! Reply buffer for one request.

use async_trait::async_trait;
use bytes::BytesMut;
use sieve_core::{Error, RecordSink, Result};
use sieve_proto::{put_stream_frame, Record, Status, StreamFrame};

/// Space kept free for the trailer frame.
const TRAILER_RESERVE: usize = 4096;

/// Encodes stream frames back to back into a single reply message.
///
/// A record that would push the reply past the maximum message size is
/// refused, leaving room for the trailer.
#[derive(Debug)]
pub struct FrameSink {
    buf: BytesMut,
    max_size: usize,
    records: usize,
}

impl FrameSink {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_size,
            records: 0,
        }
    }

    /// Encoded size so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Record frames written, the schema frame included.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Append the trailer and return the reply bytes.
    pub fn finish(mut self, status: Status) -> std::result::Result<Vec<u8>, sieve_proto::Error> {
        put_stream_frame(&mut self.buf, &StreamFrame::End(status))?;
        Ok(self.buf.to_vec())
    }
}

#[async_trait]
impl RecordSink for FrameSink {
    async fn send(&mut self, record: Record) -> Result<()> {
        let start = self.buf.len();
        put_stream_frame(&mut self.buf, &StreamFrame::Record(record))?;
        if self.buf.len() + TRAILER_RESERVE > self.max_size {
            self.buf.truncate(start);
            return Err(Error::InvalidQuery(format!(
                "response exceeds the maximum message size of {} bytes; narrow the query or set a limit",
                self.max_size
            )));
        }
        self.records += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_proto::{decode_stream, FieldInfo, FieldType, Schema, Value};

    fn schema() -> Schema {
        Schema::new("payments-db", "transactions")
            .with_field(FieldInfo::new("vendor", FieldType::Text))
    }

    #[tokio::test]
    async fn test_frames_decode_as_stream() {
        let mut sink = FrameSink::new(1024 * 1024);
        sink.send(Record::schema_frame(schema())).await.unwrap();
        sink.send(Record::new(vec![Value::from("acme")])).await.unwrap();
        assert_eq!(sink.records(), 2);

        let decoded = decode_stream(&sink.finish(Status::Ok).unwrap()).unwrap();
        assert_eq!(decoded.records.len(), 2);
        assert!(decoded.status.is_ok());
    }

    #[tokio::test]
    async fn test_oversized_reply_refused() {
        let mut sink = FrameSink::new(TRAILER_RESERVE + 512);
        sink.send(Record::schema_frame(schema())).await.unwrap();
        let before = sink.len();

        let big = Record::new(vec![Value::String("x".repeat(2048))]);
        let err = sink.send(big).await.unwrap_err();
        assert_eq!(err.code(), "invalid_query");
        assert_eq!(sink.len(), before);

        let decoded = decode_stream(&sink.finish(Status::Ok).unwrap()).unwrap();
        assert_eq!(decoded.records.len(), 1);
    }
}
