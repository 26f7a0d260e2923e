use super::key_value_storage::serialize_id;
use crate::CoreError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

const DEFAULT_BUFFER_SIZE: usize = 1_000_000;

/// Appends KV lines to a shared file from many threads: each thread owns one
/// writer instance, batches lines into a ~1 MiB buffer and hands the whole
/// buffer to a single `write` on an `O_APPEND` descriptor, so records from
/// different writers interleave only at line-batch granularity.
pub struct KeyValueConcurrentWriter {
    file: File,
    buffer: Vec<u8>,
    buffer_size: usize,
}

impl KeyValueConcurrentWriter {
    pub fn open(path: &Path) -> Result<KeyValueConcurrentWriter, CoreError> {
        Self::with_buffer_size(path, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(
        path: &Path,
        buffer_size: usize,
    ) -> Result<KeyValueConcurrentWriter, CoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(CoreError::io(path.display().to_string()))?;
        Ok(KeyValueConcurrentWriter {
            file,
            buffer: Vec::with_capacity(buffer_size + 4096),
            buffer_size,
        })
    }

    pub fn write(&mut self, id: u64, value: &serde_json::Value) -> Result<(), CoreError> {
        self.buffer.extend_from_slice(serialize_id(id).as_bytes());
        self.buffer.push(b' ');
        serde_json::to_writer(&mut self.buffer, value)
            .map_err(|e| CoreError::BadFormat(format!("kv json: {e}")))?;
        self.buffer.push(b'\n');

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CoreError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file
            .write_all(&self.buffer)
            .map_err(CoreError::io("kv append"))?;
        self.buffer.clear();
        Ok(())
    }
}

impl Drop for KeyValueConcurrentWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("kv writer flush on drop failed: {e}");
        }
    }
}
