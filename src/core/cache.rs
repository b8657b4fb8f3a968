//! Entry cache
//!
//! Buffers the content of one archive entry in pooled scratch files:
//!
//! - the input socket is read at most once while a buffer is current, and
//!   every reader shares that buffer
//! - writes go to a fresh dirty buffer which becomes current when its writer
//!   closes, so later reads see the new content without touching the input
//! - the output socket receives a committed buffer right away
//!   (`WRITE_THROUGH`) or on the next [`flush`](EntryCache::flush)
//!   (`WRITE_BACK`)
//!
//! Streams opened with a peer socket bypass the buffers. Reads flush and
//! writes clear the cache first, so a raw copy never mixes with buffered
//! content.
//!
//! All buffer bookkeeping happens under one mutex per cache. Handles only
//! carry a buffer id and a reference to the cache.

use crate::core::config::CacheStrategy;
use crate::core::pool::{EntryPool, PoolEntry};
use crate::core::socket::{InputSocket, OutputSocket, OutputStream};
use crate::error::{ArchiveFsError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Cached scratch copy of the entry content
#[derive(Debug)]
struct Buffer {
    entry: PoolEntry,
    readers: usize,
    dirty: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    buffers: HashMap<u64, Buffer>,
    current: Option<u64>,
    next_id: u64,
    fetches: u64,
}

impl CacheState {
    fn insert(&mut self, entry: PoolEntry, dirty: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(
            id,
            Buffer {
                entry,
                readers: 0,
                dirty,
            },
        );
        id
    }

    fn buffer(&mut self, id: u64) -> &mut Buffer {
        match self.buffers.get_mut(&id) {
            Some(buffer) => buffer,
            None => panic!("entry cache lost track of buffer {id}"),
        }
    }

    /// Stop caching a buffer; its scratch entry goes once nobody reads it
    fn retire(&mut self, id: u64) -> io::Result<()> {
        if self.current == Some(id) {
            self.current = None;
        }
        let buffer = self.buffer(id);
        buffer.dirty = false;
        if buffer.readers > 0 {
            return Ok(());
        }
        self.release(id)
    }

    fn release(&mut self, id: u64) -> io::Result<()> {
        match self.buffers.remove(&id) {
            Some(buffer) => buffer.entry.release(),
            None => Ok(()),
        }
    }
}

struct CacheInner {
    target: String,
    strategy: CacheStrategy,
    pool: Arc<EntryPool>,
    input: Option<Arc<dyn InputSocket>>,
    output: Option<Arc<dyn OutputSocket>>,
    state: Mutex<CacheState>,
}

impl CacheInner {
    /// Copy the whole input into a new scratch entry
    fn fetch(&self, input: &dyn InputSocket) -> Result<PoolEntry> {
        let entry = self.pool.allocate()?;
        let copied = entry.writer().and_then(|mut sink| {
            let mut source = input.stream(None)?;
            let bytes = io::copy(&mut source, &mut sink)?;
            sink.flush()?;
            Ok(bytes)
        });

        match copied {
            Ok(bytes) => {
                debug!(entry = %self.target, bytes, "Fetched entry into cache");
                Ok(entry)
            }
            Err(err) => {
                let cleanup = entry.release().err();
                Err(ArchiveFsError::with_suppressed(err.into(), cleanup))
            }
        }
    }

    /// Write the current buffer to the output if it is dirty
    ///
    /// A failed write retires the buffer: its content is lost, but its
    /// scratch entry is not.
    fn write_current(&self, state: &mut CacheState) -> Result<()> {
        let Some(id) = state.current else {
            return Ok(());
        };
        let buffer = state.buffer(id);
        if !buffer.dirty {
            return Ok(());
        }
        let output = self.output.as_deref().ok_or(ArchiveFsError::NoOutput)?;

        match write_out(output, &buffer.entry) {
            Ok(bytes) => {
                buffer.dirty = false;
                debug!(entry = %self.target, bytes, "Wrote cached entry");
                Ok(())
            }
            Err(err) => {
                warn!(entry = %self.target, error = %err, "Failed to write cached entry");
                let cleanup = state.retire(id).err();
                Err(ArchiveFsError::with_suppressed(err.into(), cleanup))
            }
        }
    }

    /// Make a closed writer's buffer current, applying the strategy
    fn commit(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(previous) = state.current.replace(id) {
            if previous != id {
                trace!(entry = %self.target, previous, "Superseding cache buffer");
                state.retire(previous)?;
            }
        }

        match self.strategy {
            CacheStrategy::WriteThrough => self.write_current(&mut state),
            CacheStrategy::WriteBack => Ok(()),
            CacheStrategy::ReadOnly => unreachable!("read-only caches never open writers"),
        }
    }

    fn abandon(&self, id: u64) -> io::Result<()> {
        debug!(entry = %self.target, "Discarding uncommitted cache buffer");
        self.state.lock().retire(id)
    }

    fn close_reader(&self, id: u64) -> io::Result<()> {
        let mut state = self.state.lock();
        let current = state.current;
        let buffer = state.buffer(id);
        assert!(buffer.readers > 0, "reader count of buffer {id} underflowed");
        buffer.readers -= 1;

        if buffer.readers == 0 && !buffer.dirty && current != Some(id) {
            return state.release(id);
        }
        Ok(())
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (_, buffer) in state.buffers.drain() {
            if buffer.dirty {
                warn!(entry = %self.target, "Dropping entry cache with unflushed content");
            }
            if let Err(err) = buffer.entry.release() {
                warn!(entry = %self.target, error = %err, "Failed to release cache buffer");
            }
        }
    }
}

fn write_out(output: &dyn OutputSocket, entry: &PoolEntry) -> io::Result<u64> {
    let mut source = entry.reader()?;
    let mut sink = output.stream(None)?;
    let bytes = io::copy(&mut source, &mut sink)?;
    sink.close()?;
    Ok(bytes)
}

/// Buffered access to the content of one archive entry
///
/// Cloning yields another handle on the same cache.
#[derive(Clone)]
pub struct EntryCache {
    inner: Arc<CacheInner>,
}

impl EntryCache {
    /// Create a cache over the given sockets
    ///
    /// Either socket may be absent; opening a stream that needs it fails
    /// with `NoInput` or `NoOutput`.
    pub fn new(
        strategy: CacheStrategy,
        pool: Arc<EntryPool>,
        input: Option<Arc<dyn InputSocket>>,
        output: Option<Arc<dyn OutputSocket>>,
    ) -> Self {
        let target = input
            .as_ref()
            .map(|socket| socket.target().to_string())
            .or_else(|| output.as_ref().map(|socket| socket.target().to_string()))
            .unwrap_or_default();

        EntryCache {
            inner: Arc::new(CacheInner {
                target,
                strategy,
                pool,
                input,
                output,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    /// Path of the cached entry
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.inner.strategy
    }

    /// Number of times the input socket has been read into a buffer
    pub fn fetches(&self) -> u64 {
        self.inner.state.lock().fetches
    }

    /// Number of buffers holding a scratch entry
    pub fn buffers(&self) -> usize {
        self.inner.state.lock().buffers.len()
    }

    /// Whether the current buffer has not reached the output yet
    pub fn is_dirty(&self) -> bool {
        let mut state = self.inner.state.lock();
        match state.current {
            Some(id) => state.buffer(id).dirty,
            None => false,
        }
    }

    /// Open the content for reading
    ///
    /// Without a peer the first read copies the input into a buffer, which
    /// then serves every reader until it is cleared or superseded. The copy
    /// happens under the cache lock, so concurrent first reads fetch once.
    ///
    /// # Errors
    ///
    /// `NoInput` without an input socket; I/O errors of the input or the
    /// scratch storage.
    pub fn open_input(&self, peer: Option<&dyn OutputSocket>) -> Result<CacheInput> {
        let input = self.inner.input.as_ref().ok_or(ArchiveFsError::NoInput)?;

        if peer.is_some() {
            self.flush()?;
            trace!(entry = %self.inner.target, "Raw read bypasses the cache");
            return Ok(CacheInput::Direct(input.stream(peer)?));
        }

        let mut state = self.inner.state.lock();
        let id = match state.current {
            Some(id) => id,
            None => {
                let entry = self.inner.fetch(input.as_ref())?;
                state.fetches += 1;
                let id = state.insert(entry, false);
                state.current = Some(id);
                id
            }
        };

        let buffer = state.buffer(id);
        let file = buffer.entry.reader()?;
        buffer.readers += 1;

        Ok(CacheInput::Buffered(BufferReader {
            cache: Arc::clone(&self.inner),
            id,
            file: Some(file),
        }))
    }

    /// Open the content for writing
    ///
    /// Without a peer the content goes to a fresh dirty buffer; closing the
    /// returned stream commits it according to the strategy.
    ///
    /// # Errors
    ///
    /// `ReadOnlyCache` for a `READ_ONLY` cache, `NoOutput` without an output
    /// socket, I/O errors of the scratch storage or the output.
    pub fn open_output(&self, peer: Option<&dyn InputSocket>) -> Result<CacheOutput> {
        if !self.inner.strategy.is_writable() {
            return Err(ArchiveFsError::ReadOnlyCache);
        }
        let output = self.inner.output.as_ref().ok_or(ArchiveFsError::NoOutput)?;

        if peer.is_some() {
            self.clear()?;
            trace!(entry = %self.inner.target, "Raw write bypasses the cache");
            return Ok(CacheOutput::Direct(output.stream(peer)?));
        }

        let entry = self.inner.pool.allocate()?;
        let file = match entry.writer() {
            Ok(file) => file,
            Err(err) => {
                let cleanup = entry.release().err();
                return Err(ArchiveFsError::with_suppressed(err.into(), cleanup));
            }
        };
        let id = self.inner.state.lock().insert(entry, true);

        Ok(CacheOutput::Buffered(BufferWriter {
            cache: Arc::clone(&self.inner),
            id,
            file: Some(file),
        }))
    }

    /// Write a pending `WRITE_BACK` buffer to the output
    pub fn flush(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.write_current(&mut state)
    }

    /// Discard the current buffer without writing it
    pub fn clear(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if let Some(id) = state.current {
            trace!(entry = %self.inner.target, "Clearing entry cache");
            state.retire(id)?;
        }
        Ok(())
    }
}

/// Reader over a cache buffer
pub struct BufferReader {
    cache: Arc<CacheInner>,
    id: u64,
    file: Option<File>,
}

impl BufferReader {
    /// Stop reading, releasing the buffer if the cache no longer needs it
    pub fn close(mut self) -> Result<()> {
        self.file = None;
        self.cache.close_reader(self.id)?;
        Ok(())
    }
}

impl Read for BufferReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl Seek for BufferReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.file.as_mut() {
            Some(file) => file.seek(pos),
            None => Err(io::Error::new(io::ErrorKind::Other, "reader is closed")),
        }
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            if let Err(err) = self.cache.close_reader(self.id) {
                warn!(entry = %self.cache.target, error = %err, "Failed to release cache buffer");
            }
        }
    }
}

/// Writer into a fresh cache buffer
///
/// Dropping the writer without closing it discards the content.
pub struct BufferWriter {
    cache: Arc<CacheInner>,
    id: u64,
    file: Option<File>,
}

impl BufferWriter {
    /// Commit the content
    ///
    /// # Errors
    ///
    /// For `WRITE_THROUGH`, the failure to write the output. The buffer is
    /// released in that case.
    pub fn close(mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        self.file = None;
        self.cache.commit(self.id)
    }
}

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "writer is closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for BufferWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            if let Err(err) = self.cache.abandon(self.id) {
                warn!(entry = %self.cache.target, error = %err, "Failed to release cache buffer");
            }
        }
    }
}

/// Input stream opened through a cache
pub enum CacheInput {
    /// Shared cache buffer
    Buffered(BufferReader),
    /// Raw stream of the input socket
    Direct(Box<dyn Read + Send>),
}

impl CacheInput {
    pub fn close(self) -> Result<()> {
        match self {
            CacheInput::Buffered(reader) => reader.close(),
            CacheInput::Direct(_) => Ok(()),
        }
    }

    /// Read the remaining content and close the stream
    pub fn read_all(mut self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.read_to_end(&mut content)?;
        self.close()?;
        Ok(content)
    }
}

impl Read for CacheInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CacheInput::Buffered(reader) => reader.read(buf),
            CacheInput::Direct(stream) => stream.read(buf),
        }
    }
}

/// Output stream opened through a cache
pub enum CacheOutput {
    /// Fresh cache buffer
    Buffered(BufferWriter),
    /// Raw stream of the output socket
    Direct(Box<dyn OutputStream>),
}

impl CacheOutput {
    /// Complete the content
    pub fn close(self) -> Result<()> {
        match self {
            CacheOutput::Buffered(writer) => writer.close(),
            CacheOutput::Direct(stream) => Ok(stream.close()?),
        }
    }
}

impl Write for CacheOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CacheOutput::Buffered(writer) => writer.write(buf),
            CacheOutput::Direct(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CacheOutput::Buffered(writer) => writer.flush(),
            CacheOutput::Direct(stream) => stream.flush(),
        }
    }
}
