use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tracing::{debug, trace};

use super::cache::GroupCache;
use super::compression;
use super::container::{self, ContainerIndex};
use super::metadata::{self, ImageMetadata};
use super::source::{read_exact_at, ByteSource};
use super::HibrError;

/// Reference point for `ImageReader::seek`, mirroring `std::io::SeekFrom`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

enum State<S> {
    Unopened,
    Open(OpenState<S>),
    Closed,
}

struct OpenState<S> {
    source: S,
    meta: ImageMetadata,
    index: ContainerIndex,
    cache: GroupCache,
    position: u64,
}

/// A cloneable handle that can set a reader's abort flag from any thread
/// without needing to acquire whatever lock guards the reader's other state.
#[derive(Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The public façade over a hibernation file: opens a `ByteSource`, builds
/// the `ContainerIndex`, and serves reads as though the file were a
/// contiguous memory image.
///
/// Lifecycle: `Unopened -> Open -> Closed`. `seek`/`read`/`read_at`/`abort`
/// are `Open -> Open` transitions. Operations on a `Closed` or `Unopened`
/// reader fail with `NotOpen`; `open` on an already-`Open` reader fails with
/// `AlreadyOpen`.
pub struct ImageReader<S> {
    state: State<S>,
    aborted: Arc<AtomicBool>,
}

impl<S: ByteSource> ImageReader<S> {
    pub fn new() -> Self {
        ImageReader {
            state: State::Unopened,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Probes the header, builds the container index, and transitions to
    /// `Open` with the logical cursor at 0.
    pub fn open(&mut self, source: S) -> Result<()> {
        match &self.state {
            State::Unopened => {}
            State::Open(_) => return Err(anyhow!(HibrError::AlreadyOpen)),
            State::Closed => return Err(anyhow!(HibrError::AlreadyClosed)),
        }
        let meta = metadata::probe(&source)?;
        debug!(variant = ?meta.variant, page_size = meta.page_size, "probed hibernation file header");
        let index = container::build(&source, &meta)?;
        debug!(groups = index.groups.len(), media_size = index.media_size, "built container index");

        self.aborted.store(false, Ordering::SeqCst);
        self.state = State::Open(OpenState {
            source,
            meta,
            index,
            cache: GroupCache::new(),
            position: 0,
        });
        Ok(())
    }

    fn open_state(&self) -> Result<&OpenState<S>> {
        match &self.state {
            State::Open(open) => Ok(open),
            _ => Err(anyhow!(HibrError::NotOpen)),
        }
    }

    fn open_state_mut(&mut self) -> Result<&mut OpenState<S>> {
        match &mut self.state {
            State::Open(open) => Ok(open),
            _ => Err(anyhow!(HibrError::NotOpen)),
        }
    }

    pub fn metadata(&self) -> Result<&ImageMetadata> {
        Ok(&self.open_state()?.meta)
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.open_state()?.index.media_size)
    }

    pub fn position(&self) -> Result<u64> {
        Ok(self.open_state()?.position)
    }

    /// Returns a handle that can call `abort` on this reader from another
    /// thread, independent of any external mutex wrapping the reader.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.aborted.clone())
    }

    /// Sets the one-shot abort flag; polled at the next group boundary
    /// inside an in-flight `read`. Does not interrupt a decode in progress.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let size = self.size()? as i64;
        let open = self.open_state_mut()?;
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Cur => open.position as i64,
            Whence::End => size,
        };
        let resolved = base
            .checked_add(offset)
            .ok_or_else(|| anyhow!(HibrError::InvalidArgument))?;
        if resolved < 0 {
            return Err(anyhow!(HibrError::InvalidArgument));
        }
        open.position = resolved as u64;
        Ok(open.position)
    }

    /// Fills up to `buf.len()` bytes starting at the current position,
    /// returning the number of bytes written. Returns 0 iff the position is
    /// already at or past `size()`. A read that straddles a group boundary
    /// resolves bytes from both groups within the same call.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let aborted = self.aborted.clone();
        let open = self.open_state_mut()?;
        let media_size = open.index.media_size;
        if open.position >= media_size {
            return Ok(0);
        }

        let mut written = 0usize;
        while written < buf.len() && open.position < media_size {
            if aborted.load(Ordering::SeqCst) {
                return Err(anyhow!(HibrError::Aborted));
            }

            let group_idx = open
                .index
                .group_containing(open.position)
                .expect("position < media_size must fall inside an indexed group");
            let group = open.index.groups[group_idx];

            let source = &open.source;
            let data = open.cache.get_or_fill(group_idx, || {
                trace!(group_idx, payload_offset = group.payload_offset, "decoding page group");
                let mut compressed = vec![0u8; group.payload_len as usize];
                read_exact_at(source, group.payload_offset, &mut compressed)?;
                let mut uncompressed = vec![0u8; group.uncompressed_len as usize];
                compression::decompress(&compressed, &mut uncompressed)?;
                Ok(uncompressed)
            })?;

            let intra = (open.position - group.logical_offset) as usize;
            let remaining_in_group = data.len() - intra;
            let remaining_in_buf = buf.len() - written;
            let remaining_in_media = (media_size - open.position) as usize;
            let chunk = remaining_in_group.min(remaining_in_buf).min(remaining_in_media);

            buf[written..written + chunk].copy_from_slice(&data[intra..intra + chunk]);
            written += chunk;
            open.position += chunk as u64;
        }

        Ok(written)
    }

    /// Atomic `seek(Set, offset)` followed by `read(buf)`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.seek(offset as i64, Whence::Set)?;
        self.read(buf)
    }

    /// Releases the `ByteSource` and drops the index and cache.
    pub fn close(&mut self) {
        self.state = State::Closed;
    }
}

impl<S: ByteSource> Default for ImageReader<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// `ImageReader` wrapped in a mutex so `read`/`seek` can be driven from one
/// thread while a second thread calls `abort`. This is the only supported
/// concurrency pattern over a single reader; `GroupCache` and `ContainerIndex`
/// are never shared across reader instances.
pub struct SharedImageReader<S> {
    inner: Mutex<ImageReader<S>>,
    abort_handle: AbortHandle,
}

impl<S: ByteSource> SharedImageReader<S> {
    pub fn open(source: S) -> Result<Self> {
        let mut reader = ImageReader::new();
        reader.open(source)?;
        let abort_handle = reader.abort_handle();
        Ok(SharedImageReader {
            inner: Mutex::new(reader),
            abort_handle,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ImageReader<S>> {
        self.inner.lock().expect("image reader mutex poisoned")
    }

    pub fn metadata(&self) -> Result<ImageMetadata> {
        self.lock().metadata().map(|m| m.clone())
    }

    pub fn size(&self) -> Result<u64> {
        self.lock().size()
    }

    pub fn position(&self) -> Result<u64> {
        self.lock().position()
    }

    pub fn seek(&self, offset: i64, whence: Whence) -> Result<u64> {
        self.lock().seek(offset, whence)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.lock().read(buf)
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.lock().read_at(offset, buf)
    }

    /// Sets the abort flag without acquiring the reader's mutex, so it can
    /// interrupt a `read` already in progress on another thread.
    pub fn abort(&self) {
        self.abort_handle.abort();
    }

    pub fn close(&self) {
        self.lock().close();
    }
}
