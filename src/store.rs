use crate::arch;
use crate::engine::EngineError;
use crate::formula::{parse_script, Formula};
use crate::resolve::ancestor_keys;
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

//
// Public Interface
//

/// On-disk and in-memory store of Kbuild presence-condition formulas,
/// keyed by Kbuild key. Entries are regenerated on demand by invoking
/// the external extractor and written back before exit.
pub struct FormulaStore {
    path: Option<PathBuf>,
    kbuild: IndexMap<String, String>,
    parsed: HashMap<String, Vec<Formula>>,
    regenerated: HashSet<String>,
    dirty: bool,
}

/// Per-architecture Kconfig clause bundle: option name to the clauses
/// constraining it.
pub struct KconfigBundle {
    pub clauses: IndexMap<String, Vec<Formula>>,
}

impl FormulaStore {
    pub fn empty() -> Self {
        Self {
            path: None,
            kbuild: IndexMap::new(),
            parsed: HashMap::new(),
            regenerated: HashSet::new(),
            dirty: false,
        }
    }

    /// Loads a persisted `key -> smt2-string` mapping. An absent file
    /// yields an empty store bound to the same path.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let kbuild = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|err| {
                EngineError::Malformed(format!("formula cache {}: {}", path.display(), err))
            })?
        } else {
            debug!("no formula cache at {}, starting empty", path.display());
            IndexMap::new()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            kbuild,
            parsed: HashMap::new(),
            regenerated: HashSet::new(),
            dirty: false,
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.kbuild.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.kbuild.keys()
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.kbuild.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: String, smt: String) {
        self.kbuild.insert(key, smt);
        self.dirty = true;
    }

    /// The parsed formulas of one key, memoized for the process
    /// lifetime. Returns an empty slice for absent keys (semantically
    /// `true`).
    pub fn formulas(&mut self, key: &str) -> Result<Vec<Formula>, EngineError> {
        if let Some(parsed) = self.parsed.get(key) {
            return Ok(parsed.clone());
        }

        let formulas = match self.kbuild.get(key) {
            Some(raw) => parse_script(raw).map_err(|err| {
                EngineError::Malformed(format!("formula for key '{}': {}", key, err))
            })?,
            None => Vec::new(),
        };

        self.parsed.insert(key.to_string(), formulas.clone());
        Ok(formulas)
    }

    /// Guarantees a best-effort formula entry for a compilation unit
    /// and its ancestor-directory chain, regenerating missing entries
    /// with the external extractor.
    pub fn ensure_unit_chain(&mut self, unit: &str) -> Result<(), EngineError> {
        let ancestors = ancestor_keys(unit);

        for dir_key in &ancestors {
            if !self.contains(dir_key) {
                self.regenerate_dir(dir_key)?;
            }
        }

        if !self.contains(unit) {
            if let Some(parent) = ancestors.last() {
                self.regenerate_dir(parent)?;
            }
        }

        Ok(())
    }

    /// Writes the store back to its cache file if it was mutated,
    /// through a `.pending` rename so a crash never corrupts the
    /// cache.
    pub fn persist(&mut self) -> Result<(), EngineError> {
        if !self.dirty {
            return Ok(());
        }
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return Ok(()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let serialized =
            serde_json::to_string_pretty(&self.kbuild).expect("string map serializes");
        let pending = pending_path(&path);
        fs::write(&pending, serialized)?;
        fs::rename(&pending, &path)?;

        debug!("persisted {} formulas to {}", self.kbuild.len(), path.display());
        self.dirty = false;
        Ok(())
    }
}

/// Parses a per-architecture Kconfig bundle file: a JSON mapping from
/// option name to a list of SMT-LIB 2 clause strings.
pub fn load_kconfig_bundle(path: &Path) -> Result<KconfigBundle, EngineError> {
    if !path.exists() {
        return Err(EngineError::KconfigBundleMissing {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path)?;
    let raw: IndexMap<String, Vec<String>> = serde_json::from_str(&content).map_err(|err| {
        EngineError::Malformed(format!("Kconfig bundle {}: {}", path.display(), err))
    })?;

    let mut clauses = IndexMap::new();
    for (option, texts) in raw {
        let mut parsed = Vec::new();
        for text in &texts {
            parsed.extend(parse_script(text).map_err(|err| {
                EngineError::Malformed(format!("clause for {}: {}", option, err))
            })?);
        }
        clauses.insert(option, parsed);
    }

    Ok(KconfigBundle { clauses })
}

/// Default bundle file of an architecture under the formulas root.
pub fn kconfig_bundle_path(formulas_root: &Path, tag: &str) -> PathBuf {
    formulas_root
        .join("kclause")
        .join(arch::kclause_dir(tag))
        .join("kclause")
}

/// Default extract file of an architecture under the formulas root.
pub fn kconfig_extract_path(formulas_root: &Path, tag: &str) -> PathBuf {
    formulas_root
        .join("kclause")
        .join(arch::kclause_dir(tag))
        .join("kconfig_extract")
}

/// Guarantees the Kconfig bundle file of an architecture, regenerating
/// it with the external `kconfig_extract` and `kclause` tools when
/// missing. Stdout of each tool goes through a `.pending` file renamed
/// on success.
pub fn ensure_kconfig_bundle(formulas_root: &Path, tag: &str) -> Result<PathBuf, EngineError> {
    let bundle = kconfig_bundle_path(formulas_root, tag);
    if bundle.exists() {
        return Ok(bundle);
    }

    let extract = kconfig_extract_path(formulas_root, tag);
    if let Some(parent) = bundle.parent() {
        fs::create_dir_all(parent)?;
    }

    if !extract.exists() {
        info!("regenerating Kconfig extract for {}", tag);
        run_to_file("kconfig_extract", &["--arch".as_ref(), tag.as_ref()], &extract)?;
    }

    info!("regenerating Kconfig clauses for {}", tag);
    run_to_file("kclause", &[extract.as_os_str()], &bundle)?;

    Ok(bundle)
}

//
// Private Implementation
//

impl FormulaStore {
    /// Runs the external Kbuild extractor for one directory key and
    /// merges its output into the store. A directory without a Kbuild
    /// or Makefile is unconstrained.
    fn regenerate_dir(&mut self, dir_key: &str) -> Result<(), EngineError> {
        if !self.regenerated.insert(dir_key.to_string()) {
            return Ok(());
        }

        let dir = dir_key.trim_end_matches('/');
        let has_makefile =
            Path::new(dir).join("Kbuild").exists() || Path::new(dir).join("Makefile").exists();
        if !has_makefile {
            warn!(
                "no Kbuild or Makefile under '{}', treating '{}' as unconditional",
                dir, dir_key
            );
            return Ok(());
        }

        info!("running Kbuild extraction for '{}'", dir);
        let output = time_debug!(format!("extracted Kbuild conditions for '{}'", dir), {
            Command::new("kmax")
                .arg("--srctree")
                .arg("./")
                .arg(dir)
                .output()
                .map_err(|err| EngineError::Subprocess {
                    tool: "kmax".to_string(),
                    code: None,
                    message: err.to_string(),
                })?
        });

        if !output.status.success() {
            return Err(EngineError::Subprocess {
                tool: "kmax".to_string(),
                code: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let generated: IndexMap<String, String> = serde_json::from_slice(&output.stdout)
            .map_err(|err| {
                EngineError::Malformed(format!("kmax output for '{}': {}", dir, err))
            })?;

        for (key, smt) in generated {
            if !self.kbuild.contains_key(&key) {
                self.kbuild.insert(key, smt);
                self.dirty = true;
            }
        }

        Ok(())
    }
}

fn pending_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".pending");
    path.with_file_name(name)
}

fn run_to_file(
    tool: &str,
    args: &[&std::ffi::OsStr],
    destination: &Path,
) -> Result<(), EngineError> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .map_err(|err| EngineError::Subprocess {
            tool: tool.to_string(),
            code: None,
            message: err.to_string(),
        })?;

    if !output.status.success() {
        return Err(EngineError::Subprocess {
            tool: tool.to_string(),
            code: output.status.code(),
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let pending = pending_path(destination);
    fs::write(&pending, &output.stdout)?;
    fs::rename(&pending, destination)?;
    Ok(())
}
