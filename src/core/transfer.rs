//! Local file transfer driven by the event loop
//!
//! A [`LocalTransfer`] is a handler that owns a read pipeline over the source
//! and a write pipeline over the destination. It copies bytes slot to slot
//! whenever either side has a buffer ready and goes idle on would-block until
//! the pipeline's completion event arrives.

use super::pool::WorkerPool;
use crate::config::PipelineConfig;
use crate::error::{EngineError, IoResultExt, Result};
use crate::event::{Event, EventLoop, Handler, HandlerRef, TimerId};
use crate::io::{create_preallocated, Direction, Pipeline, ReadStatus, WriteStatus};
use crate::progress::TransferProgress;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Application events understood by a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Begin pumping
    Start,
    /// Abort; the destination is truncated to what was written
    Cancel,
}

/// How to run a transfer
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Convert line endings on both sides
    pub text_mode: bool,
    /// Reserve the source size in the destination before writing
    pub preallocate: bool,
    /// Refresh period of the progress bar
    pub progress_interval: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            text_mode: false,
            preallocate: false,
            progress_interval: Duration::from_millis(100),
        }
    }
}

/// Outcome of a finished transfer
#[derive(Debug, Clone)]
pub struct TransferSummary {
    /// Source path
    pub source: PathBuf,
    /// Destination path
    pub destination: PathBuf,
    /// Bytes read from the source file
    pub bytes_read: u64,
    /// Bytes written to the destination file
    pub bytes_written: u64,
    /// Wall time from start to finalize
    pub elapsed: Duration,
}

impl TransferSummary {
    /// Average write throughput in bytes/second
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_written as f64 / secs
        } else {
            0.0
        }
    }
}

/// Position inside the slot a side currently holds
#[derive(Debug, Clone, Copy)]
struct SlotCursor {
    slot: usize,
    len: usize,
    pos: usize,
}

impl SlotCursor {
    fn remaining(&self) -> usize {
        self.len - self.pos
    }
}

/// A running transfer, registered as a loop handler
pub struct LocalTransfer {
    me: HandlerRef<TransferEvent>,
    source_path: PathBuf,
    destination_path: PathBuf,
    reader: Pipeline,
    writer: Pipeline,
    src: Option<SlotCursor>,
    dst: Option<SlotCursor>,
    progress: Option<TransferProgress>,
    progress_timer: Option<TimerId>,
    progress_interval: Duration,
    done: Option<Sender<Result<TransferSummary>>>,
    started: Instant,
}

impl LocalTransfer {
    /// Open both files, register the transfer with `event_loop` and start it.
    ///
    /// The receiver yields exactly one result when the transfer ends. Dropping
    /// the returned handler earlier cancels the transfer.
    pub fn start(
        event_loop: &EventLoop<TransferEvent>,
        pool: &WorkerPool,
        source: &Path,
        destination: &Path,
        options: &TransferOptions,
        pipeline: &PipelineConfig,
        progress: Option<TransferProgress>,
    ) -> Result<(Handler<TransferEvent>, Receiver<Result<TransferSummary>>)> {
        let source_file = File::open(source).with_path(source)?;
        let size = source_file.metadata().with_path(source)?.len();
        let destination_file = if options.preallocate {
            create_preallocated(destination, size)
        } else {
            File::create(destination)
        }
        .with_path(destination)?;

        let reader = Pipeline::create(pool, source_file, Direction::Read, options.text_mode, pipeline)?;
        let writer = Pipeline::create(
            pool,
            destination_file,
            Direction::Write,
            options.text_mode,
            pipeline,
        )?;

        if let Some(progress) = &progress {
            progress.set_total_bytes(size);
        }
        Self::register(event_loop, reader, writer, source, destination, options, progress)
    }

    /// Register a transfer over ready-made pipelines and send it `Start`
    fn register(
        event_loop: &EventLoop<TransferEvent>,
        reader: Pipeline,
        writer: Pipeline,
        source: &Path,
        destination: &Path,
        options: &TransferOptions,
        progress: Option<TransferProgress>,
    ) -> Result<(Handler<TransferEvent>, Receiver<Result<TransferSummary>>)> {
        let (done_tx, done_rx) = bounded(1);
        let handler = event_loop.add_handler(|me: HandlerRef<TransferEvent>| {
            reader.set_completion_handler(&me);
            writer.set_completion_handler(&me);
            LocalTransfer {
                me,
                source_path: source.to_path_buf(),
                destination_path: destination.to_path_buf(),
                reader,
                writer,
                src: None,
                dst: None,
                progress,
                progress_timer: None,
                progress_interval: options.progress_interval,
                done: Some(done_tx),
                started: Instant::now(),
            }
        });

        tracing::debug!(
            "Transfer {} -> {} registered as {}",
            source.display(),
            destination.display(),
            handler.id()
        );
        if !handler.send(TransferEvent::Start) {
            return Err(EngineError::LoopStopped);
        }
        Ok((handler, done_rx))
    }

    /// Move as many bytes as the pipelines allow without blocking
    fn pump(&mut self) {
        while self.done.is_some() {
            let mut src = match self.src {
                Some(cursor) => cursor,
                None => match self.reader.next_read_buffer() {
                    ReadStatus::Ready { slot, len } => SlotCursor { slot, len, pos: 0 },
                    ReadStatus::WouldBlock => return,
                    ReadStatus::Eof => return self.complete(),
                    ReadStatus::Error => return self.fail(self.reader.last_error()),
                },
            };
            let mut dst = match self.dst.filter(|cursor| cursor.remaining() > 0) {
                Some(cursor) => cursor,
                // Also hands a full held slot over to the worker
                None => match self.writer.next_write_buffer() {
                    WriteStatus::Ready { slot } => SlotCursor {
                        slot,
                        len: self.writer.slot_size(),
                        pos: 0,
                    },
                    WriteStatus::WouldBlock => {
                        self.dst = None;
                        self.src = Some(src);
                        return;
                    }
                    WriteStatus::Error => {
                        self.dst = None;
                        return self.fail(self.writer.last_error());
                    }
                },
            };

            let n = src.remaining().min(dst.remaining());
            {
                let input = self.reader.buffer(src.slot);
                let mut output = self.writer.buffer(dst.slot);
                output[dst.pos..dst.pos + n].copy_from_slice(&input[src.pos..src.pos + n]);
            }
            src.pos += n;
            dst.pos += n;

            // An exhausted read cursor is released by the next buffer call.
            // The write cursor is kept even when full: that slot is still
            // held and finalize must flush it.
            self.src = (src.remaining() > 0).then_some(src);
            self.dst = Some(dst);
        }
    }

    fn complete(&mut self) {
        let len = self.dst.take().map_or(0, |cursor| cursor.pos);
        match self.writer.finalize(len) {
            Ok(bytes_written) => {
                let summary = TransferSummary {
                    source: self.source_path.clone(),
                    destination: self.destination_path.clone(),
                    bytes_read: self.reader.bytes_transferred(),
                    bytes_written,
                    elapsed: self.started.elapsed(),
                };
                tracing::debug!(
                    "{} finished: {} bytes in {:?}",
                    self.me.id(),
                    bytes_written,
                    summary.elapsed
                );
                if let Some(progress) = &self.progress {
                    progress.set_bytes_done(summary.bytes_read);
                    progress.finish_success(&format!(
                        "{} copied",
                        humansize::format_size(bytes_written, humansize::BINARY)
                    ));
                }
                self.finish(Ok(summary));
            }
            Err(e) => self.finish(Err(e)),
        }
    }

    fn fail(&mut self, description: Option<String>) {
        let description = description.unwrap_or_else(|| "unknown pipeline failure".to_string());
        self.finish(Err(EngineError::Pipeline(description)));
    }

    fn finish(&mut self, result: Result<TransferSummary>) {
        if let Some(timer) = self.progress_timer.take() {
            self.me.stop_timer(timer);
        }
        if let (Err(e), Some(progress)) = (&result, &self.progress) {
            progress.finish_error(&e.to_string());
        }
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }

    fn cancel(&mut self) {
        if self.done.is_none() {
            return;
        }
        // Completions queued before the cancel have nothing left to drive
        let stale = self
            .me
            .filter_events(|event| matches!(event, Event::IoReady(_)));
        tracing::debug!("{} cancelled ({} stale completions dropped)", self.me.id(), stale);

        self.reader.stop();
        // Slots already handed over are written; the held one is discarded
        self.dst = None;
        match self.writer.finalize(0) {
            Ok(written) => tracing::debug!(
                "{} destination cut at {} bytes",
                self.me.id(),
                written
            ),
            Err(e) => tracing::warn!("{} cancelled with a failed writer: {}", self.me.id(), e),
        }
        self.finish(Err(EngineError::Cancelled));
    }
}

impl crate::event::EventHandler<TransferEvent> for LocalTransfer {
    fn on_event(&mut self, event: Event<TransferEvent>) {
        match event {
            Event::User(TransferEvent::Start) => {
                if self.progress.is_some() {
                    self.progress_timer = self.me.add_timer(self.progress_interval, false);
                }
                self.pump();
            }
            Event::User(TransferEvent::Cancel) => self.cancel(),
            Event::IoReady(_) => self.pump(),
            Event::Timer(id) if Some(id) == self.progress_timer => {
                if let Some(progress) = &self.progress {
                    progress.set_bytes_done(self.reader.bytes_transferred());
                    let snapshot = progress.summary();
                    tracing::trace!(
                        "{} at {:.1}% ({:.0} bytes/s)",
                        self.me.id(),
                        snapshot.percentage(),
                        snapshot.throughput
                    );
                }
            }
            Event::Timer(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::io::TransferFile;
    use crossbeam::channel::unbounded;
    use std::io;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(10);

    fn setup() -> (EventLoop<TransferEvent>, WorkerPool) {
        (
            EventLoop::new().unwrap(),
            WorkerPool::new(&PoolConfig { max_threads: 4 }).unwrap(),
        )
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    #[test]
    fn test_copy_binary() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let destination = dir.path().join("dst.bin");
        let data = pattern(300_007);
        std::fs::write(&source, &data).unwrap();

        let (event_loop, pool) = setup();
        let (handler, done) = LocalTransfer::start(
            &event_loop,
            &pool,
            &source,
            &destination,
            &TransferOptions::default(),
            &PipelineConfig::new(4, 16 * 1024),
            Some(TransferProgress::hidden()),
        )
        .unwrap();

        let summary = done.recv_timeout(WAIT).unwrap().unwrap();
        handler.remove();

        assert_eq!(summary.bytes_read, data.len() as u64);
        assert_eq!(summary.bytes_written, data.len() as u64);
        assert_eq!(std::fs::read(&destination).unwrap(), data);
    }

    #[test]
    fn test_copy_exact_multiple_of_slot_size() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let destination = dir.path().join("dst.bin");
        let data = pattern(8192);
        std::fs::write(&source, &data).unwrap();

        let (event_loop, pool) = setup();
        let (handler, done) = LocalTransfer::start(
            &event_loop,
            &pool,
            &source,
            &destination,
            &TransferOptions::default(),
            &PipelineConfig::new(4, 4096),
            None,
        )
        .unwrap();

        let summary = done.recv_timeout(WAIT).unwrap().unwrap();
        handler.remove();

        assert_eq!(summary.bytes_written, 8192);
        assert_eq!(std::fs::read(&destination).unwrap(), data);
    }

    /// Destination whose writes wait for the test to open the gate
    struct StalledFile {
        inner: File,
        entered: Sender<()>,
        gate: Receiver<()>,
    }

    impl TransferFile for StalledFile {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            TransferFile::read(&mut self.inner, buf)
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            let _ = self.entered.send(());
            let _ = self.gate.recv_timeout(WAIT);
            TransferFile::write_all(&mut self.inner, buf)
        }

        fn truncate(&mut self) -> io::Result<()> {
            TransferFile::truncate(&mut self.inner)
        }
    }

    #[test]
    fn test_cancel_mid_stream_cuts_preallocated_destination() {
        const SLOT: usize = 1024;

        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let destination = dir.path().join("dst.bin");
        let data = pattern(64 * SLOT);
        std::fs::write(&source, &data).unwrap();

        let (event_loop, pool) = setup();
        let (entered_tx, entered_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        let file = StalledFile {
            inner: create_preallocated(&destination, data.len() as u64).unwrap(),
            entered: entered_tx,
            gate: gate_rx,
        };

        let config = PipelineConfig::new(2, SLOT);
        let reader =
            Pipeline::create(&pool, File::open(&source).unwrap(), Direction::Read, false, &config)
                .unwrap();
        let writer = Pipeline::create(&pool, file, Direction::Write, false, &config).unwrap();
        let (handler, done) = LocalTransfer::register(
            &event_loop,
            reader,
            writer,
            &source,
            &destination,
            &TransferOptions::default(),
            None,
        )
        .unwrap();

        // The first slot is stuck in the writer, so the copy cannot finish
        entered_rx.recv_timeout(WAIT).unwrap();
        assert!(handler.send(TransferEvent::Cancel));
        // Let the loop pick up the cancel before the writer moves again
        std::thread::sleep(Duration::from_millis(50));
        drop(gate_tx);

        match done.recv_timeout(WAIT).unwrap() {
            Err(EngineError::Cancelled) => {}
            other => panic!("expected cancellation, got {:?}", other.map(|s| s.bytes_written)),
        }

        let written = std::fs::read(&destination).unwrap();
        assert!(!written.is_empty());
        assert!(written.len() < data.len());
        assert_eq!(written.len() % SLOT, 0);
        assert_eq!(written, &data[..written.len()]);

        // Completions that arrive after the cancel are ignored
        assert!(!handler.is_removed());
        handler.remove();
    }

    #[test]
    fn test_copy_with_mismatched_slots_and_preallocation() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("src.bin");
        let destination = dir.path().join("dst.bin");
        let data = pattern(10_000);
        std::fs::write(&source, &data).unwrap();
        // Leftovers from an older, longer destination must not survive
        std::fs::write(&destination, pattern(50_000)).unwrap();

        let (event_loop, pool) = setup();
        let options = TransferOptions {
            preallocate: true,
            ..Default::default()
        };
        let (_handler, done) = LocalTransfer::start(
            &event_loop,
            &pool,
            &source,
            &destination,
            &options,
            &PipelineConfig::new(2, 999),
            None,
        )
        .unwrap();

        done.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), data);
    }

    #[test]
    fn test_copy_empty_file() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("empty");
        let destination = dir.path().join("copy");
        std::fs::write(&source, b"").unwrap();

        let (event_loop, pool) = setup();
        let (_handler, done) = LocalTransfer::start(
            &event_loop,
            &pool,
            &source,
            &destination,
            &TransferOptions::default(),
            &PipelineConfig::new(2, 64),
            None,
        )
        .unwrap();

        let summary = done.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(summary.bytes_written, 0);
        assert!(std::fs::read(&destination).unwrap().is_empty());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_text_copy_normalizes_crlf() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("dos.txt");
        let destination = dir.path().join("unix.txt");
        std::fs::write(&source, b"one\r\ntwo\nthree\r\n".repeat(100)).unwrap();

        let (event_loop, pool) = setup();
        let options = TransferOptions {
            text_mode: true,
            ..Default::default()
        };
        let (_handler, done) = LocalTransfer::start(
            &event_loop,
            &pool,
            &source,
            &destination,
            &options,
            &PipelineConfig::new(3, 10),
            None,
        )
        .unwrap();

        done.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(
            std::fs::read(&destination).unwrap(),
            b"one\ntwo\nthree\n".repeat(100)
        );
    }

    #[test]
    fn test_missing_source() {
        let dir = tempdir().unwrap();
        let (event_loop, pool) = setup();

        let result = LocalTransfer::start(
            &event_loop,
            &pool,
            &dir.path().join("nope"),
            &dir.path().join("out"),
            &TransferOptions::default(),
            &PipelineConfig::default(),
            None,
        );
        match result {
            Err(e) => assert!(e.path().is_some()),
            Ok(_) => panic!("missing source must fail"),
        }
    }
}
