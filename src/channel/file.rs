//! # File Channel
//!
//! JSON-lines channel with size/time based rotation, gzip compression of
//! rotated files and bounded retention. Writes happen on a dedicated
//! background thread; `post` only enqueues.

use super::{ChannelProperties, TelemetryChannel};
use crate::error::{Result, TelemetryError};
use crate::event::TelemetryEvent;
use crate::manifest::RouteArgument;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

const CURRENT_FILE: &str = "events.jsonl";
const ROTATED_PREFIX: &str = "events.jsonl.";

/// File channel configuration
#[derive(Debug, Clone)]
pub struct FileChannelConfig {
    /// Directory holding the current and rotated files
    pub base_dir: PathBuf,

    /// Rotation policy
    pub rotation: RotationPolicy,

    /// Gzip rotated files
    pub compress_rotated: bool,

    /// Maximum number of rotated files to keep
    pub max_rotated_files: usize,

    /// Buffer size for writes (bytes)
    pub buffer_size: usize,

    /// Flush after every line
    pub immediate_flush: bool,
}

/// File rotation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationPolicy {
    /// Rotate when file exceeds size (bytes)
    BySize(u64),

    /// Rotate every N seconds
    ByTime(u64),

    /// Rotate when the UTC day changes
    Daily,

    /// Rotate when the UTC hour changes
    Hourly,

    /// No rotation
    Never,
}

impl Default for FileChannelConfig {
    fn default() -> Self {
        FileChannelConfig {
            base_dir: PathBuf::from("telemetry-logs"),
            rotation: RotationPolicy::BySize(16 * 1024 * 1024), // 16 MB
            compress_rotated: true,
            max_rotated_files: 10,
            buffer_size: 8192,
            immediate_flush: false,
        }
    }
}

/// Counters of the background writer.
#[derive(Debug, Default)]
struct WriterCounters {
    lines_written: AtomicU64,
    bytes_written: AtomicU64,
    rotations: AtomicU64,
    write_errors: AtomicU64,
}

/// Snapshot of file channel statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChannelStats {
    pub lines_written: u64,
    pub bytes_written: u64,
    pub rotations: u64,
    pub write_errors: u64,
}

enum Command {
    Line(String),
    Flush(oneshot::Sender<Result<()>>),
}

/// Channel writing transmitted events as JSON lines.
pub struct FileChannel {
    id: String,
    properties: ChannelProperties,
    path: PathBuf,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<WriterCounters>,
}

impl FileChannel {
    /// Creates the base directory, opens the current file and starts the
    /// writer thread.
    pub fn new(
        id: impl Into<String>,
        properties: ChannelProperties,
        config: FileChannelConfig,
    ) -> Result<Self> {
        fs::create_dir_all(&config.base_dir)?;

        let counters = Arc::new(WriterCounters::default());
        let mut writer = LogWriter {
            base_path: config.base_dir.clone(),
            config,
            current: None,
            rotation_seq: 0,
            counters: counters.clone(),
        };
        writer.open_current()?;
        let path = writer.current_path();

        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("telemetry-file-channel".to_string())
            .spawn(move || writer.run(receiver))?;

        Ok(Self {
            id: id.into(),
            properties,
            path,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Path of the file currently written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> FileChannelStats {
        FileChannelStats {
            lines_written: self.counters.lines_written.load(Ordering::Relaxed),
            bytes_written: self.counters.bytes_written.load(Ordering::Relaxed),
            rotations: self.counters.rotations.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::Relaxed),
        }
    }

    /// Stops the writer thread after it has drained and flushed its queue.
    pub fn close(&self) {
        // Dropping the sender ends the writer loop.
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("File channel {} writer thread panicked", self.id);
            }
        }
    }

    fn send(&self, command: Command) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        }
    }
}

fn line_for(event: &TelemetryEvent, routes: &[RouteArgument]) -> String {
    let mut record = event.to_transmitted_json();
    if !routes.is_empty() {
        if let Value::Object(map) = &mut record {
            map.insert(
                "routes".to_string(),
                Value::Array(routes.iter().map(RouteArgument::to_json).collect()),
            );
        }
    }
    record.to_string()
}

#[async_trait]
impl TelemetryChannel for FileChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn properties(&self) -> ChannelProperties {
        self.properties
    }

    fn post(&self, event: &TelemetryEvent, routes: &[RouteArgument]) {
        if !self.send(Command::Line(line_for(event, routes))) {
            debug!("File channel {} is closed; event {} not written", self.id, event.name());
        }
    }

    async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if !self.send(Command::Flush(tx)) {
            return Err(TelemetryError::Disposed);
        }
        rx.await.map_err(|_| TelemetryError::Disposed)?
    }
}

impl Drop for FileChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// ================================================================================================
// BACKGROUND WRITER
// ================================================================================================

struct LogFile {
    writer: BufWriter<File>,
    path: PathBuf,
    created_at: SystemTime,
    bytes_written: u64,
}

struct LogWriter {
    config: FileChannelConfig,
    base_path: PathBuf,
    current: Option<LogFile>,
    /// Disambiguates rotations within the same second.
    rotation_seq: u64,
    counters: Arc<WriterCounters>,
}

impl LogWriter {
    fn run(mut self, receiver: mpsc::Receiver<Command>) {
        for command in receiver {
            match command {
                Command::Line(line) => {
                    if let Err(e) = self.write_line(&line) {
                        self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Failed to write telemetry line: {}", e);
                    }
                }
                Command::Flush(reply) => {
                    let _ = reply.send(self.flush());
                }
            }
        }
        if let Err(e) = self.flush() {
            warn!("Failed to flush telemetry file on close: {}", e);
        }
    }

    fn current_path(&self) -> PathBuf {
        self.base_path.join(CURRENT_FILE)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        if self.current.is_none() {
            self.open_current()?;
        }

        let mut rotate = false;
        if let Some(file) = self.current.as_mut() {
            file.writer.write_all(line.as_bytes())?;
            file.writer.write_all(b"\n")?;
            if self.config.immediate_flush {
                file.writer.flush()?;
            }
            let written = line.len() as u64 + 1;
            file.bytes_written += written;
            self.counters.lines_written.fetch_add(1, Ordering::Relaxed);
            self.counters.bytes_written.fetch_add(written, Ordering::Relaxed);
            rotate = should_rotate(&self.config.rotation, file);
        }

        if rotate {
            self.rotate()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.current.as_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }

    fn open_current(&mut self) -> Result<()> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current = Some(LogFile {
            writer: BufWriter::with_capacity(self.config.buffer_size, file),
            path,
            created_at: SystemTime::now(),
            bytes_written,
        });
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut old) = self.current.take() {
            old.writer.flush()?;
            let rotated = self.rotated_path();
            fs::rename(&old.path, &rotated)?;
            if self.config.compress_rotated {
                compress_file(&rotated)?;
            }
            self.cleanup_old_files()?;
            self.counters.rotations.fetch_add(1, Ordering::Relaxed);
        }
        self.open_current()
    }

    fn rotated_path(&mut self) -> PathBuf {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.rotation_seq += 1;
        self.base_path
            .join(format!("{}{}-{}", ROTATED_PREFIX, timestamp, self.rotation_seq))
    }

    fn cleanup_old_files(&self) -> Result<()> {
        let mut rotated_files: Vec<PathBuf> = fs::read_dir(&self.base_path)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with(ROTATED_PREFIX))
                    .unwrap_or(false)
            })
            .collect();

        // Newest first
        rotated_files.sort_by_key(|path| {
            fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        });
        rotated_files.reverse();

        if rotated_files.len() > self.config.max_rotated_files {
            for path in &rotated_files[self.config.max_rotated_files..] {
                fs::remove_file(path).ok();
            }
        }
        Ok(())
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn should_rotate(policy: &RotationPolicy, file: &LogFile) -> bool {
    match policy {
        RotationPolicy::BySize(max_bytes) => file.bytes_written >= *max_bytes,
        RotationPolicy::ByTime(seconds) => {
            let elapsed = SystemTime::now()
                .duration_since(file.created_at)
                .unwrap_or_default()
                .as_secs();
            elapsed >= *seconds
        }
        RotationPolicy::Daily => unix_secs(SystemTime::now()) / 86400 > unix_secs(file.created_at) / 86400,
        RotationPolicy::Hourly => unix_secs(SystemTime::now()) / 3600 > unix_secs(file.created_at) / 3600,
        RotationPolicy::Never => false,
    }
}

/// Gzips a rotated file next to itself and removes the original.
fn compress_file(path: &Path) -> Result<()> {
    let input = fs::read(path)?;
    let mut output_path = path.as_os_str().to_owned();
    output_path.push(".gz");

    let mut encoder = GzEncoder::new(File::create(&output_path)?, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;

    fs::remove_file(path).ok();
    Ok(())
}
