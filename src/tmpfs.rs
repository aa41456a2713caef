use std::fs;
use std::path::{Path, PathBuf};

/// Scratch directory for tests, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new() -> std::io::Result<Self> {
        let base = std::env::temp_dir().join("emberdb_tests");
        fs::create_dir_all(&base)?;

        let unique_name = format!("test_{}_{}", std::process::id(), rand_suffix());
        let path = base.join(unique_name);

        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir(&path)?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn rand_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    // Nanosecond clock alone can collide when tests create directories
    // back to back on a coarse timer.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    nanos ^ (COUNTER.fetch_add(1, Ordering::Relaxed) << 48)
}
