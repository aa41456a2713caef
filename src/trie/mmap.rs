use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use memmap2::MmapRaw;

use crate::config::PAGE_SIZE;
use crate::errcorrupt;
use crate::error::{Error, Result};

/// The memory-mapped data file and its append cursor.
///
/// The map handle is behind an `RwLock` only so it can be swapped on growth;
/// a reader takes the lock just long enough to clone the `Arc`, and the clone
/// stays valid for the whole transaction even if the writer remaps underneath
/// it. The single writer appends strictly above the high watermark readers can
/// reach, so the two sides never touch the same bytes.
#[derive(Debug)]
pub struct MmapFile {
    file: File,
    path: PathBuf,
    map: RwLock<Arc<MmapRaw>>,
    cursor: AtomicU64,
}

impl MmapFile {
    /// Opens the data file, creating and sizing it on first use. Returns the
    /// handle and whether the file was freshly created.
    pub fn open_or_create(path: &Path, initial_size: u64) -> Result<(Self, bool)> {
        let file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let created = len == 0;
        if created {
            file.set_len(initial_size.max(PAGE_SIZE))?;
        }

        let map = MmapRaw::map_raw(&file)?;
        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                map: RwLock::new(Arc::new(map)),
                cursor: AtomicU64::new(0),
            },
            created,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clones the current map handle. This is the snapshot a read transaction
    /// keeps for its lifetime.
    pub fn load(&self) -> Result<Arc<MmapRaw>> {
        Ok(self.map.read()?.clone())
    }

    pub fn mapped_len(&self) -> Result<u64> {
        Ok(self.map.read()?.len() as u64)
    }

    /// Next append offset. Only meaningful to the holder of the writer mutex.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn set_cursor(&self, offset: u64) {
        self.cursor.store(offset, Ordering::Release);
    }

    /// Grows the file and remaps when `required` bytes would overrun the map.
    /// Growth at least doubles, in page granularity; `max_size` of 0 is
    /// unbounded. Readers holding the old handle are unaffected.
    pub fn ensure_capacity(&self, required: u64, max_size: u64) -> Result<()> {
        let current = self.mapped_len()?;
        if required <= current {
            return Ok(());
        }
        if max_size > 0 && required > max_size {
            return Err(Error::OutOfSpace);
        }

        let mut new_len = current.max(PAGE_SIZE);
        while new_len < required {
            new_len *= 2;
        }
        if max_size > 0 {
            new_len = new_len.min(max_size.div_ceil(PAGE_SIZE) * PAGE_SIZE);
        }

        let mut guard = self.map.write()?;
        self.file.set_len(new_len)?;
        *guard = Arc::new(MmapRaw::map_raw(&self.file)?);
        tracing::debug!(old_len = current, new_len, "grew data file");
        Ok(())
    }

    /// Reserves the next contiguous region at the write cursor, copies
    /// `bytes` in, advances the cursor, and returns the region's start
    /// offset. Must only be called by the single active writer.
    pub fn append(&self, bytes: &[u8], max_size: u64) -> Result<u64> {
        let offset = self.cursor();
        self.ensure_capacity(offset + bytes.len() as u64, max_size)?;
        self.write_at(offset, bytes)?;
        self.set_cursor(offset + bytes.len() as u64);
        Ok(offset)
    }

    /// Copies `bytes` into the map at `offset`. Must only be called by the
    /// single active writer, on a region no published root can reach.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let map = self.load()?;
        let end = offset + bytes.len() as u64;
        if end > map.len() as u64 {
            return Err(Error::IO(format!(
                "write of {} bytes at {offset} overruns {} byte map",
                bytes.len(),
                map.len()
            )));
        }
        // Exclusive access to the region is the caller's contract above.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                map.as_mut_ptr().add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Syncs the byte range `[offset, offset + len)` to disk.
    pub fn flush_range(&self, offset: u64, len: u64) -> Result<()> {
        let map = self.load()?;
        map.flush_range(offset as usize, len as usize)?;
        Ok(())
    }
}

/// Bounds-checked view into a map snapshot. Offsets handed to this function
/// come from published roots, whose nodes are immutable, so an overrun always
/// means corruption rather than a race.
pub fn read(map: &MmapRaw, offset: u64, len: u64) -> Result<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| Error::Corrupt(format!("node region at {offset} overflows")))?;
    if end > map.len() as u64 {
        return errcorrupt!(
            "node region {offset}..{end} beyond {} byte map",
            map.len()
        );
    }
    Ok(unsafe { std::slice::from_raw_parts(map.as_ptr().add(offset as usize), len as usize) })
}

/// Reads the u16 at `offset`, used to size a node before slicing it whole.
pub fn read_u16(map: &MmapRaw, offset: u64) -> Result<u16> {
    use byteorder::{ByteOrder, LittleEndian};
    let bytes = read(map, offset, 2)?;
    Ok(LittleEndian::read_u16(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_reopen() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("data");

        let (mmap, created) = MmapFile::open_or_create(&path, 8192).expect("open failed");
        assert!(created);
        assert_eq!(mmap.mapped_len().expect("len"), 8192);
        drop(mmap);

        let (mmap, created) = MmapFile::open_or_create(&path, 8192).expect("reopen failed");
        assert!(!created);
        assert_eq!(mmap.mapped_len().expect("len"), 8192);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().expect("temp dir");
        let (mmap, _) =
            MmapFile::open_or_create(&dir.path().join("data"), 4096).expect("open failed");

        mmap.write_at(100, b"hello trie").expect("write failed");
        mmap.flush_range(100, 10).expect("flush failed");

        let map = mmap.load().expect("load failed");
        assert_eq!(read(&map, 100, 10).expect("read failed"), b"hello trie");
    }

    #[test]
    fn test_read_bounds() {
        let dir = tempdir().expect("temp dir");
        let (mmap, _) =
            MmapFile::open_or_create(&dir.path().join("data"), 4096).expect("open failed");
        let map = mmap.load().expect("load failed");

        assert!(read(&map, 0, 4096).is_ok());
        assert!(matches!(
            read(&map, 4000, 200),
            Err(crate::Error::Corrupt(_))
        ));
        assert!(matches!(
            read(&map, u64::MAX, 2),
            Err(crate::Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_growth_doubles_and_respects_max() {
        let dir = tempdir().expect("temp dir");
        let (mmap, _) =
            MmapFile::open_or_create(&dir.path().join("data"), 4096).expect("open failed");

        // Old handles stay usable across a remap.
        let old_map = mmap.load().expect("load failed");
        mmap.write_at(0, b"before growth").expect("write failed");

        mmap.ensure_capacity(4097, 0).expect("grow failed");
        assert_eq!(mmap.mapped_len().expect("len"), 8192);
        mmap.ensure_capacity(40960, 0).expect("grow failed");
        assert_eq!(mmap.mapped_len().expect("len"), 65536);

        assert_eq!(read(&old_map, 0, 13).expect("read failed"), b"before growth");

        assert!(matches!(
            mmap.ensure_capacity(1 << 20, 65536),
            Err(Error::OutOfSpace)
        ));
    }

    #[test]
    fn test_append_advances_cursor_and_grows() {
        let dir = tempdir().expect("temp dir");
        let (mmap, _) =
            MmapFile::open_or_create(&dir.path().join("data"), 4096).expect("open failed");
        mmap.set_cursor(64);

        let first = mmap.append(b"one", 0).expect("append failed");
        let second = mmap.append(b"two", 0).expect("append failed");
        assert_eq!(first, 64);
        assert_eq!(second, 67);
        assert_eq!(mmap.cursor(), 70);

        let map = mmap.load().expect("load failed");
        assert_eq!(read(&map, 64, 6).expect("read failed"), b"onetwo");

        // Appends past the mapped length trigger growth.
        let big = vec![0x42u8; 8192];
        let offset = mmap.append(&big, 0).expect("append failed");
        assert_eq!(offset, 70);
        assert!(mmap.mapped_len().expect("len") >= 70 + 8192);
    }

    #[test]
    fn test_write_beyond_map_fails() {
        let dir = tempdir().expect("temp dir");
        let (mmap, _) =
            MmapFile::open_or_create(&dir.path().join("data"), 4096).expect("open failed");
        assert!(mmap.write_at(4090, b"overrun").is_err());
    }
}
