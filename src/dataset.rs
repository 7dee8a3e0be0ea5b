use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use indexmap::IndexMap;
use ters::ters;

use crate::archive::{Archive, Config};
use crate::error::{Error, Result};
use crate::identifier;
use crate::value::Value;

const SENTINEL: &str = "_this_dir_is_a_DataSet";
const LOCK_FILE: &str = ".lock";
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Component H: a directory of per-key single-item archives plus a shared
/// metadata dict, guarded by an advisory lock (`spec.md` §4.H, §5).
///
/// The `_info_dict.json` sidecar is this crate's own bookkeeping, not part
/// of the external contract — the contract is `__init__.py`'s `_info_dict`
/// literal, which `commit` keeps in sync on every write (see DESIGN.md).
#[ters]
pub struct DataSet {
    #[get]
    dir: PathBuf,
    #[get]
    lock_timeout: Duration,
    info: IndexMap<String, serde_json::Value>,
}

impl DataSet {
    /// Creates a new, empty DataSet directory. Fails if one already exists
    /// there without the sentinel (refuses to adopt an unrelated directory).
    pub fn create(dir: &Path, lock_timeout: Duration) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let sentinel_path = dir.join(SENTINEL);
        if !sentinel_path.exists() {
            fs::write(&sentinel_path, b"")?;
        }
        let dataset = Self {
            dir: dir.to_path_buf(),
            lock_timeout,
            info: IndexMap::new(),
        };
        dataset.write_metadata()?;
        Ok(dataset)
    }

    /// Opens an existing DataSet, taking a shared lock only for the
    /// duration of reading the metadata dict (`spec.md` §5).
    pub fn open(dir: &Path, lock_timeout: Duration) -> Result<Self> {
        if !dir.join(SENTINEL).exists() {
            return Err(Error::CorruptArchive {
                detail: format!("{} is missing the DataSet sentinel", dir.display()),
            });
        }

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = open_lock_file(&lock_path)?;
        acquire_shared(&lock_file, lock_timeout, &dir.display().to_string())?;
        let info = read_metadata(dir)?;
        fs2::FileExt::unlock(&lock_file).ok();

        Ok(Self {
            dir: dir.to_path_buf(),
            lock_timeout,
            info,
        })
    }

    pub fn metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.info.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.info.keys()
    }

    /// `commit(key, value)` (`spec.md` §5): exclusive lock around render ->
    /// write archive module -> write sidecar -> fsync -> atomic rename.
    pub fn commit(&mut self, key: &str, value: Value, meta: serde_json::Value, config: &Config) -> Result<()> {
        let lock_path = self.dir.join(LOCK_FILE);
        let lock_file = open_lock_file(&lock_path)?;
        acquire_exclusive(&lock_file, self.lock_timeout, key)?;

        let result = self.commit_locked(key, value, meta, config);
        fs2::FileExt::unlock(&lock_file).ok();
        result
    }

    fn commit_locked(&mut self, key: &str, value: Value, meta: serde_json::Value, config: &Config) -> Result<()> {
        let module_name = identifier::sanitize_module_name(key);
        let mut archive = Archive::new(config.clone().with_single_item_mode(true));
        archive.insert_as(&module_name, value)?;
        let rendered = archive.render()?;

        let staging = self.dir.join(format!(".{module_name}.tmp"));
        fs::create_dir_all(&staging)?;
        crate::package::save_single_module(&staging, &module_name, &rendered, archive.config()).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            e
        })?;

        let final_module = self.dir.join(format!("{module_name}.py"));
        fs::rename(staging.join(format!("{module_name}.py")), &final_module)?;
        if !rendered.sidecar.is_empty() {
            let staged_arrays = staging.join(format!("{module_name}_arrays"));
            let final_arrays = self.dir.join(format!("{module_name}_arrays"));
            if final_arrays.exists() {
                fs::remove_dir_all(&final_arrays)?;
            }
            fs::rename(staged_arrays, final_arrays)?;
        }
        let _ = fs::remove_dir_all(&staging);

        self.info.insert(key.to_string(), meta);
        self.write_metadata()?;
        log::debug!("committed DataSet key {key} as module {module_name}");
        Ok(())
    }

    fn write_metadata(&self) -> Result<()> {
        let json_path = self.dir.join("_info_dict.json");
        let serialized = serde_json::to_string_pretty(&self.info)?;
        fs::write(&json_path, serialized)?;

        let init_path = self.dir.join("__init__.py");
        let mut body = String::from("_info_dict = {\n");
        for (key, value) in &self.info {
            body.push_str(&format!("    {}: {},\n", python_str_literal(key), python_json_literal(value)));
        }
        body.push_str("}\n");
        fs::write(&init_path, body)?;
        Ok(())
    }
}

fn read_metadata(dir: &Path) -> Result<IndexMap<String, serde_json::Value>> {
    let json_path = dir.join("_info_dict.json");
    if !json_path.exists() {
        return Ok(IndexMap::new());
    }
    let contents = fs::read_to_string(&json_path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn python_str_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn python_json_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "None".to_string(),
        serde_json::Value::Bool(b) => if *b { "True".to_string() } else { "False".to_string() },
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => python_str_literal(s),
        serde_json::Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(python_json_literal).collect();
            format!("[{}]", parts.join(", "))
        }
        serde_json::Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", python_str_literal(k), python_json_literal(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    Ok(fs::OpenOptions::new().create(true).write(true).truncate(false).open(path)?)
}

fn acquire_exclusive(file: &File, timeout: Duration, key: &str) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if file.try_lock_exclusive().is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Busy { key: key.to_string() });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn acquire_shared(file: &File, timeout: Duration, key: &str) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if file.try_lock_shared().is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::Busy { key: key.to_string() });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_commit_then_open_roundtrips_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = DataSet::create(dir.path(), Duration::from_secs(1)).unwrap();
        ds.commit(
            "a",
            Value::Int(42),
            serde_json::json!({"units": "none"}),
            &Config::default(),
        )
        .unwrap();

        assert!(dir.path().join("a.py").exists());

        let reopened = DataSet::open(dir.path(), Duration::from_secs(1)).unwrap();
        assert_eq!(
            reopened.metadata("a").unwrap(),
            &serde_json::json!({"units": "none"})
        );
    }

    #[test]
    fn commit_sanitizes_non_identifier_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut ds = DataSet::create(dir.path(), Duration::from_secs(1)).unwrap();
        ds.commit("my key", Value::Int(1), serde_json::json!(null), &Config::default())
            .unwrap();
        assert!(dir.path().join("my_key.py").exists());
    }

    #[test]
    fn open_rejects_directory_without_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let err = DataSet::open(dir.path(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::CorruptArchive { .. }));
    }
}
