use std::path::PathBuf;

/// Page granularity used when sizing and growing the data file.
pub const PAGE_SIZE: u64 = 4096;

/// Configuration for an EmberDB store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the data and lock files
    pub dir: PathBuf,

    /// Store name; the data file is `<name>` and the lock file `<name>.lock`
    pub name: String,

    /// Initial size of the data file and memory map (default: 16MB)
    pub initial_size: u64,

    /// Maximum size the data file may grow to; 0 means unbounded (default: 0)
    pub max_size: u64,

    /// When true, deleting an absent key returns `Error::NotFound` instead of
    /// succeeding silently (default: false)
    pub strict_delete: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            name: "ember".to_string(),
            initial_size: 16 * 1024 * 1024, // 16MB
            max_size: 0,
            strict_delete: false,
        }
    }
}

impl Config {
    /// Create a new config with the given directory and store name
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the initial data file size, rounded up to page granularity
    pub fn initial_size(mut self, size: u64) -> Self {
        self.initial_size = size.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        self
    }

    /// Set the maximum data file size; 0 disables the bound
    pub fn max_size(mut self, size: u64) -> Self {
        self.max_size = size;
        self
    }

    /// Make delete of an absent key an error
    pub fn strict_delete(mut self, strict: bool) -> Self {
        self.strict_delete = strict;
        self
    }

    /// Path of the data file
    pub fn data_path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }

    /// Path of the lock file
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dir, PathBuf::from("./emberdb"));
        assert_eq!(config.initial_size, 16 * 1024 * 1024);
        assert_eq!(config.max_size, 0);
        assert!(!config.strict_delete);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/test", "store")
            .initial_size(1000)
            .max_size(1 << 30)
            .strict_delete(true);

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.initial_size, PAGE_SIZE); // rounded up
        assert_eq!(config.max_size, 1 << 30);
        assert!(config.strict_delete);
        assert_eq!(config.data_path(), PathBuf::from("/tmp/test/store"));
        assert_eq!(config.lock_path(), PathBuf::from("/tmp/test/store.lock"));
    }
}
