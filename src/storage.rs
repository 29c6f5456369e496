use std::path::{Path, PathBuf};

pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
}

/// Files under a single base directory. Writes go through a temp file and a rename.
#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(base_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(BackendLocal { base_dir })
    }

    fn path(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }
}

impl StorageManager for BackendLocal {
    fn exists(&self, ident: &str) -> bool {
        self.path(ident).is_file()
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(ident))
    }

    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.path(ident);
        let temp_path = self
            .base_dir
            .join(format!(".{}-{ident}", rusty_ulid::generate_ulid_string()));

        std::fs::write(&temp_path, data)?;

        std::fs::rename(&temp_path, &path).inspect_err(|_| {
            let _ = std::fs::remove_file(&temp_path);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(dir.path()).unwrap();

        assert!(!store.exists("config.yaml"));
        store.write("config.yaml", b"default_results: 3\n").unwrap();
        assert!(store.exists("config.yaml"));
        assert_eq!(store.read("config.yaml").unwrap(), b"default_results: 3\n");

        // overwrite replaces the whole file
        store.write("config.yaml", b"x").unwrap();
        assert_eq!(store.read("config.yaml").unwrap(), b"x");
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = BackendLocal::new(dir.path()).unwrap();
        store.write("a", b"1").unwrap();
        store.write("a", b"2").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a".to_string()]);
    }

    #[test]
    fn test_new_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested").join("base");
        BackendLocal::new(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
