use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A formulas-root directory populated with cache fixtures.
pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir is available"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes the Kbuild formula cache at `<root>/kmax`.
    pub fn write_kbuild(&self, entries: &[(&str, &str)]) -> PathBuf {
        let map: Value = entries
            .iter()
            .map(|(key, smt)| ((*key).to_string(), json!(smt)))
            .collect::<serde_json::Map<String, Value>>()
            .into();

        let path = self.path("kmax");
        fs::write(&path, serde_json::to_string_pretty(&map).unwrap())
            .expect("kbuild cache is writable");
        path
    }

    /// Writes a Kconfig clause bundle at `<root>/kclause/<arch>/kclause`.
    pub fn write_bundle(&self, arch: &str, entries: &[(&str, &[&str])]) -> PathBuf {
        let map: Value = entries
            .iter()
            .map(|(option, clauses)| ((*option).to_string(), json!(clauses)))
            .collect::<serde_json::Map<String, Value>>()
            .into();

        let dir = self.path("kclause").join(arch);
        fs::create_dir_all(&dir).expect("bundle directory is writable");
        let path = dir.join("kclause");
        fs::write(&path, serde_json::to_string_pretty(&map).unwrap())
            .expect("bundle is writable");
        path
    }

    /// Writes a Kconfig extract at `<root>/kclause/<arch>/kconfig_extract`.
    pub fn write_extract(&self, arch: &str, content: &str) -> PathBuf {
        let dir = self.path("kclause").join(arch);
        fs::create_dir_all(&dir).expect("extract directory is writable");
        let path = dir.join("kconfig_extract");
        fs::write(&path, content).expect("extract is writable");
        path
    }
}
