//! A file-backed message queue with a bounded number of slots and bytes.
//!
//! Messages are appended to `fmq.buf` as `{u32 slot, u32 len, bytes}`, little
//! endian. When either bound would be exceeded the buffer starts over at slot
//! 0. The current position is published in `fmq.stat` as JSON so that readers
//! can tell where the newest message is.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::MessageSink;
use crate::IngestError;

const SLOT_HEADER_LEN: usize = 8;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FmqStatus {
    pub nslots: usize,
    pub size: usize,
    /// Slot the next message goes to
    pub slot: usize,
    pub bytes: usize,
    pub wraps: u64,
    pub messages: u64,
    pub updated: String,
}

pub struct Fmq {
    dir: PathBuf,
    file: File,
    nslots: usize,
    size: usize,
    slot: usize,
    bytes: usize,
    wraps: u64,
    messages: u64,
}

impl Fmq {
    pub fn buf_path(dir: &Path) -> PathBuf {
        dir.join("fmq.buf")
    }

    pub fn stat_path(dir: &Path) -> PathBuf {
        dir.join("fmq.stat")
    }

    /// Create the queue, discarding anything an earlier run left behind.
    pub fn init_read_write(dir: &Path, nslots: usize, size: usize) -> Result<Fmq, IngestError> {
        let fmq_err = |e: std::io::Error| IngestError::Fmq(dir.display().to_string(), e.to_string());

        if nslots == 0 || size <= SLOT_HEADER_LEN {
            return Err(IngestError::Fmq(
                dir.display().to_string(),
                format!("invalid geometry: {} slots of {} bytes", nslots, size),
            ));
        }
        fs::create_dir_all(dir).map_err(fmq_err)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(Self::buf_path(dir))
            .map_err(fmq_err)?;

        let fmq = Fmq {
            dir: dir.to_owned(),
            file,
            nslots,
            size,
            slot: 0,
            bytes: 0,
            wraps: 0,
            messages: 0,
        };
        fmq.write_status()?;
        info!(
            "Output FMQ '{}' opened, {} slots, {} bytes",
            dir.display(),
            nslots,
            size
        );
        Ok(fmq)
    }

    pub fn status(&self) -> FmqStatus {
        FmqStatus {
            nslots: self.nslots,
            size: self.size,
            slot: self.slot,
            bytes: self.bytes,
            wraps: self.wraps,
            messages: self.messages,
            updated: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn error(&self, e: impl ToString) -> IngestError {
        IngestError::Fmq(self.dir.display().to_string(), e.to_string())
    }

    fn write_status(&self) -> Result<(), IngestError> {
        let json = serde_json::to_vec_pretty(&self.status()).map_err(|e| self.error(e))?;
        fs::write(Self::stat_path(&self.dir), json).map_err(|e| self.error(e))
    }

    fn wrap(&mut self) -> Result<(), IngestError> {
        self.file.set_len(0).map_err(|e| self.error(e))?;
        self.file.seek(SeekFrom::Start(0)).map_err(|e| self.error(e))?;
        self.slot = 0;
        self.bytes = 0;
        self.wraps += 1;
        debug!("FMQ '{}' wrapped ({} times)", self.dir.display(), self.wraps);
        Ok(())
    }
}

impl MessageSink for Fmq {
    fn write_msg(&mut self, bytes: &[u8]) -> Result<(), IngestError> {
        let len = SLOT_HEADER_LEN + bytes.len();
        if len > self.size || bytes.len() > u32::MAX as usize {
            return Err(self.error(format!(
                "message of {} bytes does not fit in a buffer of {}",
                bytes.len(),
                self.size
            )));
        }
        if self.slot >= self.nslots || self.bytes + len > self.size {
            self.wrap()?;
        }

        let mut record = Vec::with_capacity(len);
        record.extend_from_slice(&(self.slot as u32).to_le_bytes());
        record.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        record.extend_from_slice(bytes);
        self.file.write_all(&record).map_err(|e| self.error(e))?;

        self.slot += 1;
        self.bytes += len;
        self.messages += 1;
        self.write_status()
    }

    fn close(&mut self) -> Result<(), IngestError> {
        self.file.sync_all().map_err(|e| self.error(e))?;
        self.write_status()
    }
}
