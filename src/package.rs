use std::fs;
use std::path::Path;

use crate::archive::{Config, Rendered};
use crate::error::Result;
use crate::sidecar::Backend;

/// Component G: writes a rendered archive to disk in one of the two
/// layouts `spec.md` §4.G names. Directory and file names are part of the
/// external contract (`spec.md` §6), not an implementation detail.
pub fn save_single_module(dir: &Path, name: &str, rendered: &Rendered, config: &Config) -> Result<()> {
    fs::create_dir_all(dir)?;
    let arrays_dir_name = format!("{name}_arrays");
    let module_path = dir.join(format!("{name}.py"));
    let body = prelude(&rendered.sidecar, &arrays_dir_name, config) + &rendered.source;
    fs::write(&module_path, body)?;

    if !rendered.sidecar.is_empty() {
        rendered.sidecar.save(&dir.join(&arrays_dir_name), config.backend)?;
    }
    Ok(())
}

pub fn save_package(dir: &Path, name: &str, rendered: &Rendered, config: &Config) -> Result<()> {
    let package_dir = dir.join(name);
    fs::create_dir_all(&package_dir)?;
    let init_path = package_dir.join("__init__.py");
    let body = prelude(&rendered.sidecar, "_arrays", config) + &rendered.source;
    fs::write(&init_path, body)?;

    if !rendered.sidecar.is_empty() {
        rendered
            .sidecar
            .save(&package_dir.join("_arrays"), config.backend)?;
    }
    Ok(())
}

/// Loader boilerplate that materializes the ambient array-lookup variable
/// as a lazy mapping keyed off the sidecar directory's location relative
/// to the module file (`spec.md` §4.G). Omitted entirely when the archive
/// sidecarred nothing — nothing in `rendered.source` would reference it.
fn prelude(sidecar: &crate::sidecar::ArraySidecar, arrays_dir_name: &str, config: &Config) -> String {
    if sidecar.is_empty() {
        return String::new();
    }

    let backend_literal = match config.backend {
        Backend::Npy => "npy",
        Backend::Hdf5 => "hdf5",
    };

    format!(
        "import os as _os\n\n\
class _LazyArrays:\n\
\x20\x20\x20\x20def __init__(self, directory, backend):\n\
\x20\x20\x20\x20\x20\x20\x20\x20self._directory = directory\n\
\x20\x20\x20\x20\x20\x20\x20\x20self._backend = backend\n\
\x20\x20\x20\x20\x20\x20\x20\x20self._cache = {{}}\n\n\
\x20\x20\x20\x20def __getitem__(self, key):\n\
\x20\x20\x20\x20\x20\x20\x20\x20if key in self._cache:\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20return self._cache[key]\n\
\x20\x20\x20\x20\x20\x20\x20\x20import numpy as _np\n\
\x20\x20\x20\x20\x20\x20\x20\x20if self._backend == 'npy':\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20value = _np.load(_os.path.join(self._directory, key + '.npy'))\n\
\x20\x20\x20\x20\x20\x20\x20\x20else:\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20import json as _json\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20container = _os.path.join(self._directory, 'arrays.h5.d')\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20with open(_os.path.join(container, key + '.json')) as _f:\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20meta = _json.load(_f)\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20with open(_os.path.join(container, key + '.bin'), 'rb') as _f:\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20raw = _f.read()\n\
\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20\x20value = _np.frombuffer(raw, dtype=meta['dtype']).reshape(meta['shape'])\n\
\x20\x20\x20\x20\x20\x20\x20\x20self._cache[key] = value\n\
\x20\x20\x20\x20\x20\x20\x20\x20return value\n\n\
{data_name} = _LazyArrays(_os.path.join(_os.path.dirname(__file__), '{arrays_dir_name}'), '{backend_literal}')\n\n",
        data_name = config.data_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, Config};
    use crate::value::Value;

    #[test]
    fn single_module_without_arrays_has_no_loader() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = Archive::new(Config::default());
        archive.insert_as("a", Value::Int(1)).unwrap();
        let rendered = archive.render().unwrap();
        save_single_module(dir.path(), "mymod", &rendered, archive.config()).unwrap();

        let contents = fs::read_to_string(dir.path().join("mymod.py")).unwrap();
        assert!(!contents.contains("_LazyArrays"));
        assert!(contents.contains("a ="));
    }

    #[test]
    fn package_layout_writes_init_py() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = Archive::new(Config::default());
        archive.insert_as("a", Value::Int(1)).unwrap();
        let rendered = archive.render().unwrap();
        save_package(dir.path(), "mypkg", &rendered, archive.config()).unwrap();

        assert!(dir.path().join("mypkg").join("__init__.py").exists());
    }
}
