use crate::arch::{self, ARCHITECTURES, DEFAULT_PRIORITY};
use crate::compose::{self, compose, ComposeRequest, Composition, Literal, BROKEN_GUARD};
use crate::emit::{self, EmitContext};
use crate::extract::KconfigExtract;
use crate::resolve;
use crate::solver::{
    self, DefaultBackend, Model, Outcome as SolveOutcome, SampleOutcome, SolveOptions,
    SolverError,
};
use crate::store::{self, FormulaStore};
use itertools::Itertools;
use log::{info, warn};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

//
// Public Interface
//

/// Everything one invocation needs, mirroring the CLI surface.
#[derive(Clone, Debug)]
pub struct Options {
    pub units: Vec<String>,
    pub formulas_root: PathBuf,
    pub kbuild_file: Option<PathBuf>,
    pub kconfig_file: Option<PathBuf>,
    pub extract_file: Option<PathBuf>,
    pub constraints_file: Option<PathBuf>,
    pub archs: Vec<String>,
    pub try_all: bool,
    pub report_all: bool,
    pub output: PathBuf,
    pub approximate: Option<PathBuf>,
    pub modules: bool,
    pub show_unsat_core: bool,
    pub defines: Vec<String>,
    pub undefines: Vec<String>,
    pub allow_config_broken: bool,
    pub allow_non_visibles: bool,
    pub view_kbuild: bool,
    pub sample: Option<usize>,
    pub sample_prefix: String,
    pub seed: Option<u64>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            units: Vec::new(),
            formulas_root: PathBuf::from(".kmax"),
            kbuild_file: None,
            kconfig_file: None,
            extract_file: None,
            constraints_file: None,
            archs: Vec::new(),
            try_all: false,
            report_all: false,
            output: PathBuf::from(".config"),
            approximate: None,
            modules: false,
            show_unsat_core: false,
            defines: Vec::new(),
            undefines: Vec::new(),
            allow_config_broken: false,
            allow_non_visibles: false,
            view_kbuild: false,
            sample: None,
            sample_prefix: "config".to_string(),
            seed: None,
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// A configuration was written; `arch` is the tag to report, absent
    /// when an explicit Kconfig bundle was used.
    Configured { arch: Option<String> },
    /// Every feasible architecture, in try order.
    Feasible { archs: Vec<String> },
    /// Chain conditions were printed.
    Viewed,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no formula for compilation unit '{unit}'")]
    NoFormula { unit: String },

    #[error("compilation unit '{unit}' is ambiguous, candidates: {}", .candidates.iter().join(", "))]
    AmbiguousUnit {
        unit: String,
        candidates: Vec<String>,
    },

    #[error("--view-kbuild requires at least one compilation unit")]
    ViewWithoutUnit,

    #[error("Kconfig bundle file '{}' not found", .path.display())]
    KconfigBundleMissing { path: PathBuf },

    #[error("no Kconfig bundles available for any candidate architecture")]
    NoKconfigBundles,

    #[error("multiple candidate architectures require a target compilation unit")]
    MultipleArchsNoUnit,

    #[error("compilation unit '{unit}' does not belong to any candidate architecture")]
    UnitArchMismatch { unit: String },

    #[error("the compilation unit depends on CONFIG_BROKEN")]
    Broken,

    #[error("no satisfying configuration found")]
    Unsatisfiable,

    #[error("{0}")]
    Usage(String),

    #[error("{tool} failed{}: {message}", .code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    Subprocess {
        tool: String,
        code: Option<i32>,
        message: String,
    },

    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

impl EngineError {
    /// Stable exit code of this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::NoFormula { .. } => 3,
            EngineError::AmbiguousUnit { .. } => 4,
            EngineError::ViewWithoutUnit => 5,
            EngineError::KconfigBundleMissing { .. } => 6,
            EngineError::NoKconfigBundles => 7,
            EngineError::MultipleArchsNoUnit => 8,
            EngineError::UnitArchMismatch { .. } => 9,
            EngineError::Broken => 10,
            EngineError::Unsatisfiable => 11,
            EngineError::Usage(_) => 12,
            EngineError::Subprocess { .. } => 13,
            EngineError::Malformed(_) | EngineError::Io(_) | EngineError::Solver(_) => 1,
        }
    }
}

/// Drives one invocation: resolves the compilation units, constructs
/// the architecture try-list, and per architecture composes and solves
/// until a configuration is found.
pub fn run(options: &Options) -> Result<Outcome, EngineError> {
    validate(options)?;

    let mut store = FormulaStore::load(&kbuild_store_path(options))?;

    let mut units = Vec::new();
    for raw in &options.units {
        let unit = resolve::force_object_extension(raw);
        store.ensure_unit_chain(&unit)?;
        units.push(resolve::resolve_unit(&store, &unit)?);
    }
    store.persist()?;

    if options.view_kbuild {
        for unit in &units {
            view_chain(&store, unit);
        }
        return Ok(Outcome::Viewed);
    }

    let adhoc = match &options.constraints_file {
        Some(path) => compose::parse_adhoc_file(path)?,
        None => Vec::new(),
    };
    let reference = match &options.approximate {
        Some(path) => Some(emit::parse_dot_config(path)?),
        None => None,
    };

    let mut feasible = Vec::new();
    let mut attempted = 0usize;

    for tag in arch_try_list(options, &units)? {
        let result = try_arch(
            options,
            &mut store,
            &units,
            tag.as_deref(),
            &adhoc,
            reference.as_deref(),
        )?;

        match result {
            TryResult::NoBundle => {}
            TryResult::Unsat { broken: true } => return Err(EngineError::Broken),
            TryResult::Unsat { broken: false } => attempted += 1,
            TryResult::Sat => {
                attempted += 1;
                if options.report_all {
                    feasible.push(tag.unwrap_or_default());
                } else {
                    return Ok(Outcome::Configured { arch: tag });
                }
            }
        }
    }

    if options.report_all && !feasible.is_empty() {
        return Ok(Outcome::Feasible { archs: feasible });
    }
    if attempted == 0 {
        return Err(EngineError::NoKconfigBundles);
    }
    Err(EngineError::Unsatisfiable)
}

//
// Private Implementation
//

enum TryResult {
    Sat,
    Unsat { broken: bool },
    NoBundle,
}

fn validate(options: &Options) -> Result<(), EngineError> {
    if options.kconfig_file.is_some() && (!options.archs.is_empty() || options.try_all) {
        return Err(EngineError::Usage(
            "an explicit Kconfig bundle excludes --arch and --all".to_string(),
        ));
    }
    if options.approximate.is_some() && options.sample.is_some() {
        return Err(EngineError::Usage(
            "--approximate and --sample are mutually exclusive".to_string(),
        ));
    }
    if options.report_all && options.sample.is_some() {
        return Err(EngineError::Usage(
            "--report-all and --sample are mutually exclusive".to_string(),
        ));
    }
    if let Some(count) = options.sample {
        if count < 2 {
            return Err(EngineError::Usage(
                "--sample requires at least two configurations".to_string(),
            ));
        }
    }
    if options.view_kbuild && options.units.is_empty() {
        return Err(EngineError::ViewWithoutUnit);
    }
    Ok(())
}

fn kbuild_store_path(options: &Options) -> PathBuf {
    if let Some(path) = &options.kbuild_file {
        return path.clone();
    }
    let precomputed = options.formulas_root.join("kmax");
    if precomputed.exists() {
        precomputed
    } else {
        options.formulas_root.join("kmax_cache")
    }
}

/// The ordered architecture candidates: `None` stands for the null
/// arch of an explicit Kconfig bundle.
fn arch_try_list(
    options: &Options,
    units: &[String],
) -> Result<Vec<Option<String>>, EngineError> {
    if options.kconfig_file.is_some() {
        return Ok(vec![None]);
    }

    let mut tags: Vec<String>;
    let try_all;
    if options.archs.is_empty() {
        tags = ARCHITECTURES[..DEFAULT_PRIORITY]
            .iter()
            .map(|tag| (*tag).to_string())
            .collect();
        try_all = true;
    } else {
        tags = options.archs.clone();
        try_all = options.try_all;
    }

    if try_all {
        for tag in ARCHITECTURES {
            if !tags.iter().any(|t| t == tag) {
                tags.push((*tag).to_string());
            }
        }
    }

    for unit in units {
        if let Some(unit_tags) = arch::unit_archs(unit) {
            tags.retain(|tag| unit_tags.iter().any(|t| t == tag));
            if tags.is_empty() {
                return Err(EngineError::UnitArchMismatch { unit: unit.clone() });
            }
        }
    }

    if units.is_empty() && tags.len() != 1 {
        return Err(EngineError::MultipleArchsNoUnit);
    }

    Ok(tags.into_iter().map(Some).collect())
}

fn view_chain(store: &FormulaStore, unit: &str) {
    for key in resolve::ancestor_keys(unit)
        .into_iter()
        .chain(std::iter::once(unit.to_string()))
    {
        println!("{} {}", key, store.raw(&key).unwrap_or("true"));
    }
}

fn try_arch(
    options: &Options,
    store: &mut FormulaStore,
    units: &[String],
    tag: Option<&str>,
    adhoc: &[Literal],
    reference: Option<&[Literal]>,
) -> Result<TryResult, EngineError> {
    let label = tag.unwrap_or("the given Kconfig bundle").to_string();

    let bundle_path = match (&options.kconfig_file, tag) {
        (Some(path), _) => path.clone(),
        (None, Some(tag)) => match store::ensure_kconfig_bundle(&options.formulas_root, tag) {
            Ok(path) => path,
            Err(EngineError::Subprocess {
                tool,
                code: None,
                message,
            }) => {
                warn!(
                    "cannot regenerate Kconfig bundle for {}: {} unavailable ({})",
                    tag, tool, message
                );
                return Ok(TryResult::NoBundle);
            }
            Err(err) => return Err(err),
        },
        (None, None) => unreachable!("the null arch implies an explicit bundle"),
    };

    let bundle = match store::load_kconfig_bundle(&bundle_path) {
        Ok(bundle) => bundle,
        Err(EngineError::KconfigBundleMissing { path }) if options.kconfig_file.is_none() => {
            warn!("no Kconfig bundle at {}, skipping {}", path.display(), label);
            return Ok(TryResult::NoBundle);
        }
        Err(err) => return Err(err),
    };

    let extract_path = options
        .extract_file
        .clone()
        .or_else(|| tag.map(|t| store::kconfig_extract_path(&options.formulas_root, t)));
    let mut extract = match &extract_path {
        Some(path) if path.exists() => Some(KconfigExtract::parse_file(path)?),
        _ => None,
    };
    if options.allow_non_visibles {
        if let Some(extract) = extract.as_mut() {
            extract.allow_non_visibles();
        }
    }

    let profile = tag.map(arch::profile);
    let composition = compose(
        store,
        &ComposeRequest {
            units,
            bundle: &bundle,
            extract: extract.as_ref(),
            adhoc,
            defines: &options.defines,
            undefines: &options.undefines,
            profile: profile.as_ref(),
            allow_broken: options.allow_config_broken,
        },
    )?;
    info!(
        "composed {} constraints for {}",
        composition.constraints.len(),
        label
    );

    let solve_options = SolveOptions { seed: options.seed };
    let write_files = !options.report_all;

    if let Some(count) = options.sample {
        let outcome = time_info!(format!("sampled {} configurations for {}", count, label), {
            solver::solve_samples::<DefaultBackend>(&composition, count, &solve_options)
        })?;
        match outcome {
            SampleOutcome::Sat(models) => {
                for (index, model) in models.iter().enumerate() {
                    let path = PathBuf::from(format!("{}{}", options.sample_prefix, index + 1));
                    write_config_file(&path, model, extract.as_ref(), &composition, options, false)?;
                }
                Ok(TryResult::Sat)
            }
            SampleOutcome::Unsat(core) => Ok(report_unsat(options, &label, &core)),
        }
    } else if let Some(reference) = reference {
        let outcome = time_info!(format!("approximated a configuration for {}", label), {
            solver::approximate::<DefaultBackend>(&composition, reference, &solve_options)
        })?;
        match outcome {
            SolveOutcome::Sat(model) => {
                if write_files {
                    write_config_file(
                        &options.output,
                        &model,
                        extract.as_ref(),
                        &composition,
                        options,
                        true,
                    )?;
                }
                Ok(TryResult::Sat)
            }
            SolveOutcome::Unsat(core) => Ok(report_unsat(options, &label, &core)),
        }
    } else {
        let outcome = time_info!(format!("solved constraints for {}", label), {
            solver::solve_single::<DefaultBackend>(&composition, &solve_options)
        })?;
        match outcome {
            SolveOutcome::Sat(model) => {
                if write_files {
                    write_config_file(
                        &options.output,
                        &model,
                        extract.as_ref(),
                        &composition,
                        options,
                        true,
                    )?;
                }
                Ok(TryResult::Sat)
            }
            SolveOutcome::Unsat(core) => Ok(report_unsat(options, &label, &core)),
        }
    }
}

fn report_unsat(options: &Options, label: &str, core: &[String]) -> TryResult {
    info!("no satisfying configuration for {}", label);
    if options.show_unsat_core {
        for origin in core {
            info!("unsat core: {}", origin);
        }
    }
    TryResult::Unsat {
        broken: core.iter().any(|origin| origin == BROKEN_GUARD),
    }
}

fn write_config_file(
    path: &Path,
    model: &Model,
    extract: Option<&KconfigExtract>,
    composition: &Composition,
    options: &Options,
    backup: bool,
) -> Result<(), EngineError> {
    if backup && path.exists() {
        let mut name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".orig");
        let backup_path = path.with_file_name(name);
        fs::copy(path, &backup_path)?;
        info!(
            "backed up existing {} to {}",
            path.display(),
            backup_path.display()
        );
    }

    let file = fs::File::create(path)?;
    emit::write_config(
        model,
        &EmitContext {
            extract,
            user_specified: &composition.user_specified,
            modules: options.modules,
        },
        BufWriter::new(file),
    )?;
    info!("wrote configuration to {}", path.display());
    Ok(())
}
