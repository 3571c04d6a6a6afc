use crate::engine::EngineError;
use crate::store::FormulaStore;
use log::warn;
use std::path::{Component, Path, PathBuf};

//
// Public Interface
//

/// Forces a user-supplied compilation-unit path to end in `.o`.
pub fn force_object_extension(unit: &str) -> String {
    if unit.ends_with(".o") {
        return unit.to_string();
    }

    let forced = Path::new(unit).with_extension("o");
    let forced = forced.to_string_lossy().into_owned();
    warn!("forcing compilation unit '{}' to '{}'", unit, forced);
    forced
}

/// Maps a compilation-unit path to the single Kbuild key it denotes.
///
/// A path that is itself a key wins outright; otherwise all keys are
/// compared by normalized form. Zero matches means the unit has no
/// formula, several matches are a user-visible ambiguity.
pub fn resolve_unit(store: &FormulaStore, unit: &str) -> Result<String, EngineError> {
    if store.contains(unit) {
        return Ok(unit.to_string());
    }

    let cwd = std::env::current_dir()?;
    let target = canonical_key(&cwd, unit);

    let candidates: Vec<String> = store
        .keys()
        .filter(|key| !key.ends_with('/'))
        .filter(|key| canonical_key(&cwd, key) == target)
        .cloned()
        .collect();

    match candidates.len() {
        0 => Err(EngineError::NoFormula {
            unit: unit.to_string(),
        }),
        1 => Ok(candidates.into_iter().next().expect("one candidate")),
        _ => Err(EngineError::AmbiguousUnit {
            unit: unit.to_string(),
            candidates,
        }),
    }
}

/// Ancestor-directory keys of a Kbuild key, outermost first, each with
/// its trailing slash: `kernel/time/tick.o` yields `kernel/` and
/// `kernel/time/`.
pub fn ancestor_keys(key: &str) -> Vec<String> {
    let components: Vec<&str> = key.trim_end_matches('/').split('/').collect();
    let mut prefix = String::new();
    let mut ancestors = Vec::new();

    for component in &components[..components.len().saturating_sub(1)] {
        if component.is_empty() {
            continue;
        }
        prefix.push_str(component);
        prefix.push('/');
        ancestors.push(prefix.clone());
    }

    ancestors
}

//
// Private Implementation
//

/// Normalized form of a key: absolute, lexically cleaned, relativized
/// to the working directory, trailing slash preserved.
fn canonical_key(cwd: &Path, key: &str) -> String {
    let keeps_slash = key.ends_with('/');
    let path = Path::new(key);

    let absolute = if path.is_absolute() {
        lexical_normalize(path)
    } else {
        lexical_normalize(&cwd.join(path))
    };

    let relative = absolute
        .strip_prefix(&lexical_normalize(cwd))
        .map(Path::to_path_buf)
        .unwrap_or(absolute);

    let mut normalized = relative.to_string_lossy().into_owned();
    if keeps_slash && !normalized.ends_with('/') {
        normalized.push('/');
    }
    normalized
}

/// Component-wise `.`/`..` resolution without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    normalized
}
