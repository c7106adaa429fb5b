use csv::{ByteRecord, ReaderBuilder};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;

/// Records drained per poll. Bounds memory while a large backlog is replayed.
const POLL_BATCH: usize = 100;

/// Streams csv records from a log file that is still being written to.
///
/// The handle stays open for the life of the reader. Each poll re-seeks to
/// the byte offset just past the last complete record, so appends made after
/// a previous end-of-file are picked up on the next call.
pub struct LogReader {
    path: PathBuf,
    file: File,
    offset: u64,
}

impl LogReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next batch of complete records. An empty batch means the
    /// file is exhausted at the current offset; polling again after the
    /// writer appends more data resumes where this call left off.
    pub fn poll(&mut self) -> Result<Vec<ByteRecord>> {
        self.file.seek(SeekFrom::Start(self.offset))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(&mut self.file);

        let mut records = Vec::new();
        let mut record = ByteRecord::new();
        while records.len() < POLL_BATCH && reader.read_byte_record(&mut record)? {
            records.push(record.clone());
        }

        let consumed = reader.position().byte();
        if consumed > 0 {
            self.offset += consumed;
            debug!(
                file = %self.path.display(),
                records = records.len(),
                offset = self.offset,
                "read batch"
            );
        }

        Ok(records)
    }
}
