//! fMP4 recording sink
//!
//! Each camera's init segment and media segments are concatenated into
//! `<dir>/<source>-<timestamp>.mp4`, which is a playable fragmented MP4.
//! A new init starts a new file. Writes are synchronous, so every append
//! completes before `append` returns.

use chrono::Local;
use kodama_client_core::protocol::event::VideoInitEvent;
use kodama_client_core::{MediaSink, SinkError, SinkFactory, SinkId};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Codec families the recorder accepts in an MP4 container
const SUPPORTED_CODECS: &[&str] = &["avc1", "avc3", "hvc1", "hev1", "av01", "vp09"];

/// Writes one fMP4 file per source
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl FileSink {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl MediaSink for FileSink {
    fn append(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::AppendRejected("sink released".to_string()))?;
        writer
            .write_all(data)
            .map_err(|e| SinkError::AppendRejected(e.to_string()))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to flush recording");
            }
            tracing::info!(
                path = %self.path.display(),
                bytes = self.bytes_written,
                "Recording closed"
            );
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates a [`FileSink`] per source under one directory
pub struct FileSinkFactory {
    dir: PathBuf,
}

impl FileSinkFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Recording path for a source starting now
    pub fn path_for(&self, source_id: &str) -> PathBuf {
        let name: String = source_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let stamp = Local::now().format("%Y%m%d-%H%M%S%.3f");
        self.dir.join(format!("{name}-{stamp}.mp4"))
    }
}

impl SinkFactory for FileSinkFactory {
    type Sink = FileSink;

    fn is_type_supported(&self, mime: &str) -> bool {
        let Some(codecs) = mime
            .strip_prefix("video/mp4; codecs=\"")
            .and_then(|rest| rest.strip_suffix('"'))
        else {
            return false;
        };
        SUPPORTED_CODECS
            .iter()
            .any(|family| codecs.split('.').next() == Some(*family))
    }

    fn create(&mut self, _id: SinkId, init: &VideoInitEvent) -> Result<FileSink, SinkError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SinkError::CreateFailed(e.to_string()))?;
        let path = self.path_for(&init.source_id);
        let file = File::create(&path).map_err(|e| SinkError::CreateFailed(e.to_string()))?;
        tracing::info!(path = %path.display(), codec = %init.codec, "Recording started");
        Ok(FileSink {
            path,
            writer: Some(BufWriter::new(file)),
            bytes_written: 0,
        })
    }
}
