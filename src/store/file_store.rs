use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{PreferenceStore, StoreError};

/// Directory-backed store: one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "opened preference store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl PreferenceStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Keys may embed opaque user ids. Bytes outside `[A-Za-z0-9_-]` are
/// written as `%XX`, so distinct keys always get distinct file names.
fn sanitize_key(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn values_survive_reopening() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.set("pomodoro_tasks", "[]").unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("pomodoro_tasks").unwrap().as_deref(), Some("[]"));
        assert_eq!(reopened.get("missing").unwrap(), None);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::open(&nested).unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn unsafe_key_characters_are_escaped() {
        assert_eq!(sanitize_key("tasks-user/../x"), "tasks-user%2F%2E%2E%2Fx");
        assert_eq!(sanitize_key("tasks-é"), "tasks-%C3%A9");

        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.set("../escape", "1").unwrap();
        assert!(dir.path().join("%2E%2E%2Fescape.json").exists());
    }

    #[test]
    fn distinct_user_keys_do_not_share_a_file() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        store.set("pomodoro_tasks-a/b", "[1]").unwrap();
        store.set("pomodoro_tasks-a_b", "[2]").unwrap();
        store.set("pomodoro_tasks-a%2Fb", "[3]").unwrap();

        assert_eq!(store.get("pomodoro_tasks-a/b").unwrap().as_deref(), Some("[1]"));
        assert_eq!(store.get("pomodoro_tasks-a_b").unwrap().as_deref(), Some("[2]"));
        assert_eq!(store.get("pomodoro_tasks-a%2Fb").unwrap().as_deref(), Some("[3]"));
    }
}
