use log::{debug, error, info, trace};
use serde::{Deserialize, Serialize};

use crate::iwrf::{decode, encode, packet_id_name, ByteOrder, EventNotice, Message};
use crate::IngestError;

pub mod fmq;

/// Where assembled batches go.
pub trait MessageSink: Send {
    fn write_msg(&mut self, bytes: &[u8]) -> Result<(), IngestError>;

    fn close(&mut self) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Directory entry for one part of a batch. Offsets count from the start of
/// the batch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
struct PartEntry {
    part_type: i32,
    offset: u32,
    len: u32,
}

const COUNT_LEN: usize = 4;
const ENTRY_LEN: usize = 12;

/// One part of a decoded batch, borrowing from the batch bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchPart<'a> {
    pub part_type: i32,
    pub bytes: &'a [u8],
}

/// Pack messages into one blob: a part count, a directory of
/// `{type, offset, len}` entries and then the message bytes, all little endian.
pub fn assemble_batch(messages: &[Message]) -> Result<Vec<u8>, IngestError> {
    let header_len = COUNT_LEN + ENTRY_LEN * messages.len();
    let data_len: usize = messages.iter().map(|m| m.len()).sum();
    let total = header_len + data_len;
    if total > u32::MAX as usize {
        return Err(IngestError::Decode(format!(
            "batch of {} bytes is too large",
            total
        )));
    }

    let mut blob = Vec::with_capacity(total);
    blob.extend_from_slice(&encode(&(messages.len() as u32), ByteOrder::Little)?);
    let mut offset = header_len;
    for message in messages {
        let entry = PartEntry {
            part_type: message.id,
            offset: offset as u32,
            len: message.len() as u32,
        };
        blob.extend_from_slice(&encode(&entry, ByteOrder::Little)?);
        offset += message.len();
    }
    for message in messages {
        blob.extend_from_slice(&message.bytes);
    }
    Ok(blob)
}

pub fn decode_batch(blob: &[u8]) -> Result<Vec<BatchPart<'_>>, IngestError> {
    if blob.len() < COUNT_LEN {
        return Err(IngestError::Decode("batch is too short".to_string()));
    }
    let n_parts: u32 = decode(&blob[..COUNT_LEN], ByteOrder::Little)?;
    let n_parts = n_parts as usize;
    let header_len = n_parts
        .checked_mul(ENTRY_LEN)
        .and_then(|n| n.checked_add(COUNT_LEN))
        .filter(|&n| n <= blob.len())
        .ok_or_else(|| {
            IngestError::Decode(format!("batch of {} bytes cannot hold {} parts", blob.len(), n_parts))
        })?;

    let mut parts = Vec::with_capacity(n_parts);
    for entry in blob[COUNT_LEN..header_len].chunks_exact(ENTRY_LEN) {
        let entry: PartEntry = decode(entry, ByteOrder::Little)?;
        let start = entry.offset as usize;
        let end = start + entry.len as usize;
        if start < header_len || end > blob.len() {
            return Err(IngestError::Decode(format!(
                "part {} at {}..{} lies outside the batch",
                packet_id_name(entry.part_type),
                start,
                end
            )));
        }
        parts.push(BatchPart {
            part_type: entry.part_type,
            bytes: &blob[start..end],
        });
    }
    Ok(parts)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct WriteStatistics {
    pub batches: u64,
    pub messages: u64,
    pub failed_batches: u64,
}

/// Collects dispatched messages and writes them to the sink in batches.
pub struct BatchWriter<S: MessageSink> {
    sink: S,
    batch: Vec<Message>,
    n_per_batch: usize,
    pub statistics: WriteStatistics,
}

impl<S: MessageSink> BatchWriter<S> {
    pub fn new(sink: S, n_per_batch: usize) -> Self {
        BatchWriter {
            sink,
            batch: Vec::with_capacity(n_per_batch),
            n_per_batch: n_per_batch.max(1),
            statistics: WriteStatistics::default(),
        }
    }

    pub fn add(&mut self, message: Message) {
        self.batch.push(message);
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Write the batch if it is full. Returns true if a batch was written.
    pub fn maybe_flush(&mut self) -> bool {
        if self.batch.len() >= self.n_per_batch {
            self.flush()
        } else {
            false
        }
    }

    pub fn force_flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return false;
        }
        self.flush()
    }

    /// Mark the end of the volume for downstream consumers.
    pub fn write_end_of_volume(&mut self, volume_num: i32, sweep_num: i32) -> bool {
        match EventNotice::end_of_volume(volume_num, sweep_num).to_message(ByteOrder::Little) {
            Ok(notice) => {
                info!(
                    "Writing end of volume event, volume {} sweep {}",
                    volume_num, sweep_num
                );
                self.add(notice);
            }
            Err(e) => error!("Cannot encode end of volume event: {}", e),
        }
        self.force_flush()
    }

    pub fn close(&mut self) -> Result<(), IngestError> {
        self.force_flush();
        self.sink.close()
    }

    // The batch is gone after this, whether or not the write worked
    fn flush(&mut self) -> bool {
        let n = self.batch.len();
        let r = assemble_batch(&self.batch).and_then(|blob| {
            trace!("Writing batch of {} messages, {} bytes", n, blob.len());
            self.sink.write_msg(&blob)
        });
        self.batch.clear();

        match r {
            Ok(()) => {
                self.statistics.batches += 1;
                self.statistics.messages += n as u64;
                debug!("Wrote batch of {} messages", n);
                true
            }
            Err(e) => {
                self.statistics.failed_batches += 1;
                error!("Cannot write batch of {} messages, dropped: {}", n, e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::iwrf::tests::packet_bytes;
    use crate::iwrf::{PacketId, PacketInfo};
    use std::sync::{Arc, Mutex};

    /// Keeps written batches where a test can see them after the writer is gone.
    #[derive(Clone, Default)]
    pub(crate) struct MemorySink {
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
        pub fail: bool,
    }

    impl MessageSink for MemorySink {
        fn write_msg(&mut self, bytes: &[u8]) -> Result<(), IngestError> {
            if self.fail {
                return Err(IngestError::Fmq("memory".into(), "write refused".into()));
            }
            self.written.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn message(i: usize) -> Message {
        let mut bytes = packet_bytes(PacketId::RadarInfo, 60 + i, ByteOrder::Little);
        bytes[56..].fill(i as u8);
        Message::new(PacketId::RadarInfo as i32, ByteOrder::Little, bytes)
    }

    #[test]
    fn batch_threshold() {
        let sink = MemorySink::default();
        let mut writer = BatchWriter::new(sink.clone(), 5);
        let mut flushes = 0;
        for i in 0..12 {
            writer.add(message(i));
            if writer.maybe_flush() {
                flushes += 1;
            }
        }
        assert_eq!(flushes, 2);
        assert_eq!(writer.pending(), 2);

        let written = sink.written.lock().unwrap();
        assert_eq!(written.len(), 2);
        for (b, blob) in written.iter().enumerate() {
            let parts = decode_batch(blob).unwrap();
            assert_eq!(parts.len(), 5);
            for (k, part) in parts.iter().enumerate() {
                assert_eq!(part.part_type, PacketId::RadarInfo as i32);
                assert_eq!(part.bytes, &message(b * 5 + k).bytes[..]);
            }
        }
    }

    #[test]
    fn force_flush_writes_partial_batch() {
        let sink = MemorySink::default();
        let mut writer = BatchWriter::new(sink.clone(), 200);
        assert!(!writer.force_flush());
        writer.add(message(1));
        assert!(writer.force_flush());
        assert_eq!(writer.pending(), 0);
        assert_eq!(sink.written.lock().unwrap().len(), 1);
    }

    #[test]
    fn failed_write_drops_the_batch() {
        let sink = MemorySink {
            fail: true,
            ..Default::default()
        };
        let mut writer = BatchWriter::new(sink, 2);
        writer.add(message(1));
        writer.add(message(2));
        assert!(!writer.maybe_flush());
        assert_eq!(writer.pending(), 0);
        assert_eq!(writer.statistics.failed_batches, 1);
        assert_eq!(writer.statistics.batches, 0);
    }

    #[test]
    fn end_of_volume_is_flushed_with_the_batch() {
        let sink = MemorySink::default();
        let mut writer = BatchWriter::new(sink.clone(), 200);
        writer.add(message(1));
        assert!(writer.write_end_of_volume(3, 7));

        let written = sink.written.lock().unwrap();
        let parts = decode_batch(&written[0]).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].part_type, PacketId::EventNotice as i32);
        let notice: EventNotice = decode(parts[1].bytes, ByteOrder::Little).unwrap();
        assert_eq!(notice.end_of_volume, 1);
        assert_eq!(notice.volume_num, 3);
        assert_eq!(notice.sweep_num, 7);
        let (info, _) = PacketInfo::peek(parts[1].bytes).unwrap();
        assert_eq!(info.id, PacketId::EventNotice as i32);
    }

    #[test]
    fn truncated_batch_is_refused() {
        let blob = assemble_batch(&[message(1), message(2)]).unwrap();
        assert!(decode_batch(&blob[..blob.len() - 1]).is_err());
        assert!(decode_batch(&blob[..10]).is_err());
        assert!(decode_batch(&[]).is_err());
        assert!(decode_batch(&0u32.to_le_bytes()).unwrap().is_empty());
    }
}
