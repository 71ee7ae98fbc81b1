//! Double-buffered asynchronous file I/O
//!
//! A [`Pipeline`] moves file data through a ring of fixed-size slots. One
//! pooled worker does the blocking file I/O while the owner (normally a
//! handler on the loop thread) exchanges one slot at a time and never blocks.
//!
//! Slot ownership is tracked by index under the pipeline lock: a slot is
//! either free, owned by the caller (`held`), or occupied and waiting for the
//! other side. The worker and the caller never touch the same slot at once,
//! and neither side ever overwrites a slot the other has not released.

use super::file::TransferFile;
use super::newline::{conversion_needed, LineEndings};
use crate::config::PipelineConfig;
use crate::core::{TaskHandle, WorkerPool};
use crate::error::{EngineError, Result};
use crate::event::{Event, HandlerRef, PipelineId};
use crate::sync::{Condition, Mutex, MutexGuard};
use parking_lot::MappedMutexGuard;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Which way data flows through a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// File to caller: the worker reads ahead
    Read,
    /// Caller to file: the worker writes behind
    Write,
}

/// Result of [`Pipeline::next_read_buffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `slot` holds `len` bytes of file data and belongs to the caller
    Ready { slot: usize, len: usize },
    /// Nothing buffered yet; a completion notification follows
    WouldBlock,
    /// The whole file has been handed out
    Eof,
    /// The worker failed; see [`Pipeline::last_error`]
    Error,
}

/// Result of [`Pipeline::next_write_buffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// `slot` is empty and belongs to the caller until the next call
    Ready { slot: usize },
    /// Every slot is waiting for the worker; a completion notification follows
    WouldBlock,
    /// The worker failed; see [`Pipeline::last_error`]
    Error,
}

type Notifier = Arc<dyn Fn() + Send + Sync>;

struct RingState {
    occupied: Vec<bool>,
    lens: Vec<usize>,
    /// Next slot the caller takes
    app_index: usize,
    /// Next slot the worker takes
    worker_index: usize,
    /// Slot currently owned by the caller
    held: Option<usize>,
    worker_waiting: bool,
    caller_waiting: bool,
    eof: bool,
    quit: bool,
    running: bool,
    error: Option<String>,
    notifier: Option<Notifier>,
}

impl RingState {
    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.occupied.len()
    }

    /// Consume the caller's wait flag, returning whom to notify
    fn take_caller_notification(&mut self) -> Option<Notifier> {
        if std::mem::take(&mut self.caller_waiting) {
            self.notifier.clone()
        } else {
            None
        }
    }
}

struct PipelineShared {
    state: Mutex<RingState>,
    slots: Box<[Mutex<Box<[u8]>>]>,
    worker_wakeup: Condition,
    slot_size: usize,
    bytes: AtomicU64,
}

impl PipelineShared {
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock()
    }

    /// Record a worker failure and end the worker's run
    fn fail(&self, state: &mut RingState, context: &str, error: &io::Error) -> Option<Notifier> {
        let description = format!("{}: {}", context, error);
        tracing::warn!("I/O pipeline failed: {}", description);
        state.error.get_or_insert(description);
        state.running = false;
        state.take_caller_notification()
    }

    /// Block the worker until `ready` holds or the pipeline quits
    fn wait_for_slot<'a>(
        &'a self,
        mut state: MutexGuard<'a, RingState>,
        ready: impl Fn(&RingState) -> bool,
        quit_first: bool,
    ) -> Option<(MutexGuard<'a, RingState>, usize)> {
        loop {
            if quit_first && state.quit {
                return None;
            }
            if ready(&state) {
                let index = state.worker_index;
                return Some((state, index));
            }
            if state.quit {
                return None;
            }
            state.worker_waiting = true;
            self.worker_wakeup.wait(&mut state);
            state.worker_waiting = false;
        }
    }
}

/// What the worker hands back when it exits
struct WorkerOutput {
    file: Box<dyn TransferFile>,
    endings: LineEndings,
}

/// A ring of slots between a file and the caller
pub struct Pipeline {
    id: PipelineId,
    direction: Direction,
    convert: bool,
    shared: Arc<PipelineShared>,
    worker: Option<TaskHandle<WorkerOutput>>,
    output: Option<WorkerOutput>,
    finalized: bool,
    /// Keeps the worker's thread alive until this pipeline is gone
    _pool: WorkerPool,
}

impl Pipeline {
    /// Start a pipeline over `file`, running its worker on `pool`.
    ///
    /// In text mode line endings are converted between the host convention
    /// and CRLF, if they differ.
    pub fn create(
        pool: &WorkerPool,
        file: impl TransferFile + 'static,
        direction: Direction,
        text_mode: bool,
        config: &PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let slots: Box<[Mutex<Box<[u8]>>]> = (0..config.slot_count)
            .map(|_| Mutex::new(vec![0u8; config.slot_size].into_boxed_slice()))
            .collect();

        let shared = Arc::new(PipelineShared {
            state: Mutex::new(RingState {
                occupied: vec![false; config.slot_count],
                lens: vec![0; config.slot_count],
                app_index: 0,
                worker_index: 0,
                held: None,
                worker_waiting: false,
                caller_waiting: false,
                eof: false,
                quit: false,
                running: true,
                error: None,
                notifier: None,
            }),
            slots,
            worker_wakeup: Condition::new(),
            slot_size: config.slot_size,
            bytes: AtomicU64::new(0),
        });

        let id = PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed));
        let convert = conversion_needed(text_mode);
        let output = WorkerOutput {
            file: Box::new(file),
            endings: LineEndings::new(),
        };

        let worker = {
            let shared = Arc::clone(&shared);
            match direction {
                Direction::Read => pool.spawn(move || read_worker(&shared, output, convert)),
                Direction::Write => pool.spawn(move || write_worker(&shared, output, convert)),
            }
        }?;

        tracing::debug!(
            "Started {} ({:?}, {} x {} bytes, convert line endings: {})",
            id,
            direction,
            config.slot_count,
            config.slot_size,
            convert
        );

        Ok(Self {
            id,
            direction,
            convert,
            shared,
            worker: Some(worker),
            output: None,
            finalized: false,
            _pool: pool.clone(),
        })
    }

    /// The id carried by this pipeline's completion events
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// Data flow direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Size of each slot in bytes
    pub fn slot_size(&self) -> usize {
        self.shared.slot_size
    }

    /// Post [`Event::IoReady`] to `handler` whenever a would-block clears
    pub fn set_completion_handler<E: Send + 'static>(&self, handler: &HandlerRef<E>) {
        let handler = handler.clone();
        let id = self.id;
        self.set_notifier(move || {
            handler.post(Event::IoReady(id));
        });
    }

    /// Call `notify` (from the worker thread) whenever a would-block clears
    pub fn set_notifier(&self, notify: impl Fn() + Send + Sync + 'static) {
        self.shared.lock().notifier = Some(Arc::new(notify));
    }

    /// Access a slot's bytes. Only the slot last handed out may be touched.
    pub fn buffer(&self, slot: usize) -> MappedMutexGuard<'_, [u8]> {
        debug_assert_eq!(self.shared.lock().held, Some(slot), "slot not owned by caller");
        MutexGuard::map(self.shared.slots[slot].lock(), |data| &mut **data)
    }

    /// Release the slot held by the caller and take the next filled one
    pub fn next_read_buffer(&mut self) -> ReadStatus {
        debug_assert_eq!(self.direction, Direction::Read);
        let shared = &self.shared;
        let mut state = shared.lock();

        if let Some(held) = state.held.take() {
            state.occupied[held] = false;
            state.lens[held] = 0;
            state.app_index = state.advance(held);
            if state.worker_waiting {
                shared.worker_wakeup.signal(&state);
            }
        }

        if state.error.is_some() {
            return ReadStatus::Error;
        }

        let slot = state.app_index;
        if state.occupied[slot] {
            state.held = Some(slot);
            ReadStatus::Ready {
                slot,
                len: state.lens[slot],
            }
        } else if state.eof {
            ReadStatus::Eof
        } else {
            state.caller_waiting = true;
            ReadStatus::WouldBlock
        }
    }

    /// Hand the held slot (completely filled) to the worker and take the next free one
    pub fn next_write_buffer(&mut self) -> WriteStatus {
        debug_assert_eq!(self.direction, Direction::Write);
        let shared = &self.shared;
        let mut state = shared.lock();

        if let Some(held) = state.held.take() {
            state.occupied[held] = true;
            state.lens[held] = shared.slot_size;
            state.app_index = state.advance(held);
            if state.worker_waiting {
                shared.worker_wakeup.signal(&state);
            }
        }

        if state.error.is_some() {
            return WriteStatus::Error;
        }

        let slot = state.app_index;
        if state.occupied[slot] {
            state.caller_waiting = true;
            WriteStatus::WouldBlock
        } else {
            state.held = Some(slot);
            WriteStatus::Ready { slot }
        }
    }

    /// Flush everything, write the first `len` bytes of the held slot and cut
    /// the file there.
    ///
    /// Blocks until the worker has drained the ring. Returns the number of
    /// bytes written to the file.
    pub fn finalize(&mut self, len: usize) -> Result<u64> {
        if self.direction != Direction::Write {
            return Err(EngineError::pipeline("finalize called on a read pipeline"));
        }
        if self.finalized {
            return Ok(self.bytes_transferred());
        }

        let held = {
            let mut state = self.shared.lock();
            if len > self.shared.slot_size {
                return Err(EngineError::pipeline(format!(
                    "finalize length {} exceeds slot size {}",
                    len, self.shared.slot_size
                )));
            }
            if len > 0 && state.held.is_none() {
                return Err(EngineError::pipeline(
                    "finalize length given but no slot is held",
                ));
            }
            state.held.take()
        };
        self.stop();

        if let Some(error) = self.last_error() {
            return Err(EngineError::Pipeline(error));
        }
        let Some(mut output) = self.output.take() else {
            return Err(EngineError::pipeline("worker exited without returning the file"));
        };

        let mut tail = Vec::new();
        if let Some(slot) = held {
            let data = self.shared.slots[slot].lock();
            let data = &data[..len];
            if self.convert {
                output.endings.collapse(data, &mut tail);
            } else {
                tail.extend_from_slice(data);
            }
        }
        if self.convert {
            output.endings.finish(&mut tail);
        }

        let result = output
            .file
            .write_all(&tail)
            .and_then(|_| output.file.truncate());
        self.finalized = true;

        match result {
            Ok(()) => {
                let total = self
                    .shared
                    .bytes
                    .fetch_add(tail.len() as u64, Ordering::Relaxed)
                    + tail.len() as u64;
                tracing::debug!("Finalized {} after {} bytes", self.id, total);
                Ok(total)
            }
            Err(e) => {
                let mut state = self.shared.lock();
                let description = format!("finalize failed: {}", e);
                state.error.get_or_insert(description.clone());
                Err(EngineError::Pipeline(description))
            }
        }
    }

    /// Stop the worker and wait for it.
    ///
    /// A write-mode worker first drains the slots already handed to it. Safe
    /// to call more than once and from a handler's removal path.
    pub fn stop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.quit = true;
            self.shared.worker_wakeup.signal(&state);
        }

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(output) => self.output = Some(output),
                Err(e) => {
                    let mut state = self.shared.lock();
                    state.error.get_or_insert(e.to_string());
                    state.running = false;
                }
            }
        }
    }

    /// The sticky error description, if the pipeline failed
    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    /// Whether the worker is still moving data
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Bytes moved between the file and the ring so far
    pub fn bytes_transferred(&self) -> u64 {
        self.shared.bytes.load(Ordering::Relaxed)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        self.stop();

        // An abandoned download still must not leave preallocated garbage
        if self.direction == Direction::Write {
            if let Some(output) = self.output.as_mut() {
                if let Err(e) = output.file.truncate() {
                    tracing::warn!("Failed to truncate after dropping {}: {}", self.id, e);
                }
            }
        }
    }
}

/// Read until `target` is full or the file ends. Returns the byte count and
/// whether the end was reached.
fn fill(file: &mut dyn TransferFile, target: &mut [u8]) -> io::Result<(usize, bool)> {
    let mut filled = 0;
    while filled < target.len() {
        match file.read(&mut target[filled..]) {
            Ok(0) => return Ok((filled, true)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok((filled, false))
}

fn read_worker(shared: &PipelineShared, mut output: WorkerOutput, convert: bool) -> WorkerOutput {
    let mut raw = vec![0u8; if convert { shared.slot_size / 2 } else { 0 }];

    loop {
        let state = shared.lock();
        let Some((state, index)) =
            shared.wait_for_slot(state, |s| !s.occupied[s.worker_index], true)
        else {
            break;
        };
        drop(state);

        // (slot length, bytes read from the file, end reached)
        let result = {
            let mut slot = shared.slots[index].lock();
            if convert {
                // Half a slot of raw text always fits once expanded
                fill(output.file.as_mut(), &mut raw).map(|(read, eof)| {
                    let len = output.endings.expand(&raw[..read], &mut slot);
                    (len, read, eof)
                })
            } else {
                fill(output.file.as_mut(), &mut slot).map(|(read, eof)| (read, read, eof))
            }
        };

        let mut state = shared.lock();
        let (notify, done) = match result {
            Ok((len, read, eof)) => {
                shared.bytes.fetch_add(read as u64, Ordering::Relaxed);
                if len > 0 {
                    state.occupied[index] = true;
                    state.lens[index] = len;
                    state.worker_index = state.advance(index);
                }
                if eof {
                    state.eof = true;
                }
                (state.take_caller_notification(), eof)
            }
            Err(e) => (shared.fail(&mut state, "read failed", &e), true),
        };
        drop(state);

        if let Some(notify) = notify {
            notify();
        }
        if done {
            break;
        }
    }

    shared.lock().running = false;
    output
}

fn write_worker(shared: &PipelineShared, mut output: WorkerOutput, convert: bool) -> WorkerOutput {
    let mut converted = Vec::new();

    loop {
        let state = shared.lock();
        // Quit only once every slot handed over has been written
        let Some((state, index)) =
            shared.wait_for_slot(state, |s| s.occupied[s.worker_index], false)
        else {
            break;
        };
        let len = state.lens[index];
        drop(state);

        let result = {
            let slot = shared.slots[index].lock();
            let data = &slot[..len];
            if convert {
                converted.clear();
                output.endings.collapse(data, &mut converted);
                output.file.write_all(&converted).map(|_| converted.len())
            } else {
                output.file.write_all(data).map(|_| data.len())
            }
        };

        let mut state = shared.lock();
        let (notify, failed) = match result {
            Ok(written) => {
                shared.bytes.fetch_add(written as u64, Ordering::Relaxed);
                state.occupied[index] = false;
                state.lens[index] = 0;
                state.worker_index = state.advance(index);
                (state.take_caller_notification(), false)
            }
            Err(e) => (shared.fail(&mut state, "write failed", &e), true),
        };
        drop(state);

        if let Some(notify) = notify {
            notify();
        }
        if failed {
            break;
        }
    }

    shared.lock().running = false;
    output
}
