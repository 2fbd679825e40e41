//! Request body storage.
//!
//! A body lives in exactly one place: inside the connection's header buffer,
//! in a heap buffer, or in a memory-mapped scratch file. Whatever owns it is
//! released when the storage is dropped, so every teardown path (dispatch,
//! read error, idle eviction) cleans up the same way.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::BytesMut;
use memmap2::MmapMut;

pub enum BodyStorage {
    /// Body bytes sit in the header buffer right after the head.
    Inline,
    /// Separately allocated buffer of exactly the declared length.
    Heap(BytesMut),
    /// File-backed mapping of exactly the declared length.
    Mapped(MappedBody),
}

impl BodyStorage {
    pub fn kind(&self) -> &'static str {
        match self {
            BodyStorage::Inline => "inline",
            BodyStorage::Heap(_) => "heap",
            BodyStorage::Mapped(_) => "mapped",
        }
    }

    /// Heap storage of `len` bytes starting with `prefix`.
    pub fn heap(len: usize, prefix: &[u8]) -> Self {
        let mut buf = BytesMut::zeroed(len);
        buf[..prefix.len()].copy_from_slice(prefix);
        BodyStorage::Heap(buf)
    }
}

/// A scratch file mapped read/write for the duration of one request.
pub struct MappedBody {
    map: Option<MmapMut>,
    file: File,
    path: PathBuf,
    persisted: bool,
}

impl MappedBody {
    /// Creates `path`, extends it to `len` bytes and maps it.
    ///
    /// `len` must be non-zero; empty files cannot be mapped.
    pub fn create(path: PathBuf, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let mapped = file.set_len(len as u64).and_then(|_| {
            // SAFETY: the file was just created by this process with
            // `create_new` and is only accessed through this mapping until
            // it is unmapped in `persist` or `drop`.
            unsafe { MmapMut::map_mut(&file) }
        });

        match mapped {
            Ok(map) => Ok(Self {
                map: Some(map),
                file,
                path,
                persisted: false,
            }),
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.map.as_deref_mut().unwrap_or(&mut [])
    }

    /// Keeps `range` of the body as the file `dest`.
    ///
    /// The selected bytes are moved to the start of the file, the mapping is
    /// released, the file truncated and renamed. After this the scratch file
    /// is no longer removed on drop and the body reads as empty.
    pub fn persist(&mut self, range: Range<usize>, dest: &Path) -> io::Result<()> {
        let len = range.len();
        if let Some(mut map) = self.map.take() {
            map.copy_within(range, 0);
            map.flush_range(0, len)?;
        }
        self.file.set_len(len as u64)?;
        fs::rename(&self.path, dest)?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for MappedBody {
    fn drop(&mut self) {
        self.map.take();
        if !self.persisted {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove body file");
            }
        }
    }
}
