use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use super::HibrError;

/// Abstract random-access, read-only source of bytes with a known total size.
///
/// Implementations never rely on their own seek state: every read specifies
/// an absolute offset. A short read (fewer bytes returned than requested) is
/// only valid at end-of-source; anything else that prevents filling the
/// buffer is an `Io` error.
pub trait ByteSource {
    /// Total size of the source in bytes.
    fn size(&self) -> u64;

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read. Returns fewer bytes than `buf.len()`
    /// only when `offset + buf.len() > size()`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// Reads exactly `buf.len()` bytes, or fails with `HibrError::Io` if the
/// source is exhausted first. Used by parsing code that has already
/// validated the requested range stays in bounds.
pub fn read_exact_at<S: ByteSource + ?Sized>(source: &S, offset: u64, buf: &mut [u8]) -> Result<()> {
    let read = source.read_at(offset, buf)?;
    if read != buf.len() {
        return Err(anyhow!(HibrError::Io {
            offset,
            message: format!("short read: got {read} of {} requested bytes", buf.len()),
        }));
    }
    Ok(())
}

/// A `ByteSource` backed by an open file, read through positioned reads so no
/// shared seek cursor is mutated between calls.
pub struct FileByteSource {
    file: PositionedFile,
    size: u64,
}

impl FileByteSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        let size = file.metadata()?.len();
        Ok(FileByteSource {
            file: PositionedFile::new(file),
            size,
        })
    }
}

impl ByteSource for FileByteSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let available = (self.size - offset).min(buf.len() as u64) as usize;
        self.file
            .read_at(offset, &mut buf[..available])
            .map_err(|e| {
                anyhow!(HibrError::Io {
                    offset,
                    message: e.to_string(),
                })
            })?;
        Ok(available)
    }
}

#[cfg(unix)]
struct PositionedFile(File);

#[cfg(unix)]
impl PositionedFile {
    fn new(file: File) -> Self {
        PositionedFile(file)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.0.read_exact_at(buf, offset)
    }
}

#[cfg(not(unix))]
struct PositionedFile(std::sync::Mutex<File>);

#[cfg(not(unix))]
impl PositionedFile {
    fn new(file: File) -> Self {
        PositionedFile(std::sync::Mutex::new(file))
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.0.lock().expect("file mutex poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// A `ByteSource` backed by a read-only memory mapping of a whole file.
pub struct MmapByteSource {
    mmap: memmap2::Mmap,
}

impl MmapByteSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        // Safety: the mapping is read-only and this type owns the file handle
        // for as long as the mapping is alive; no other writer is assumed.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(MmapByteSource { mmap })
    }
}

impl ByteSource for MmapByteSource {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if offset >= size {
            return Ok(0);
        }
        let available = (size - offset).min(buf.len() as u64) as usize;
        let start = offset as usize;
        buf[..available].copy_from_slice(&self.mmap[start..start + available]);
        Ok(available)
    }
}

/// An in-memory `ByteSource`, used by tests to synthesize hibernation-file
/// layouts without shipping binary fixtures.
pub struct SliceByteSource {
    data: Vec<u8>,
}

impl SliceByteSource {
    pub fn new(data: Vec<u8>) -> Self {
        SliceByteSource { data }
    }
}

impl ByteSource for SliceByteSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.size();
        if offset >= size {
            return Ok(0);
        }
        let available = (size - offset).min(buf.len() as u64) as usize;
        let start = offset as usize;
        buf[..available].copy_from_slice(&self.data[start..start + available]);
        Ok(available)
    }
}
