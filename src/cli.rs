use crate::engine::Options;
use clap::Parser;
use std::path::PathBuf;

/// Generates a kernel .config that causes the given compilation units
/// to be built.
#[derive(Parser, Debug)]
#[command(name = "kcover", version, about, long_about = None)]
pub struct Cli {
    /// Compilation units to include, as paths relative to the source tree
    #[arg(value_name = "UNIT")]
    pub units: Vec<String>,

    /// Directory holding the Kbuild and Kconfig formula caches
    #[arg(long, value_name = "DIR", default_value = ".kmax")]
    pub formulas: PathBuf,

    /// Explicit Kbuild formula cache file
    #[arg(long, value_name = "FILE")]
    pub kbuild: Option<PathBuf>,

    /// Explicit Kconfig clause bundle file (skips architecture profiles)
    #[arg(long, value_name = "FILE")]
    pub kconfig: Option<PathBuf>,

    /// Explicit Kconfig extract file
    #[arg(long, value_name = "FILE")]
    pub kconfig_extract: Option<PathBuf>,

    /// File of ad-hoc constraints, one NAME or !NAME per line
    #[arg(long, value_name = "FILE")]
    pub constraints_file: Option<PathBuf>,

    /// Candidate architecture, repeatable; tried in the given order
    #[arg(short = 'a', long = "arch", value_name = "TAG")]
    pub archs: Vec<String>,

    /// Append every remaining architecture to the candidate list
    #[arg(long)]
    pub all: bool,

    /// Report every feasible architecture instead of stopping at the first
    #[arg(long)]
    pub report_all: bool,

    /// Output configuration file
    #[arg(short = 'o', long, value_name = "FILE", default_value = ".config")]
    pub output: PathBuf,

    /// Reference configuration to approximate
    #[arg(long, value_name = "CONFIG")]
    pub approximate: Option<PathBuf>,

    /// Render enabled tristate options as modules
    #[arg(short = 'm', long)]
    pub modules: bool,

    /// Print the unsat core of an unsatisfiable attempt
    #[arg(long)]
    pub show_unsat_core: bool,

    /// Force an option on, repeatable
    #[arg(short = 'D', long = "define", value_name = "NAME")]
    pub defines: Vec<String>,

    /// Force an option off, repeatable
    #[arg(short = 'U', long = "undefine", value_name = "NAME")]
    pub undefines: Vec<String>,

    /// Permit configurations that enable CONFIG_BROKEN
    #[arg(long)]
    pub allow_config_broken: bool,

    /// Emit options that have no prompt
    #[arg(long)]
    pub allow_non_visibles: bool,

    /// Print the Kbuild chain conditions of the given units and exit
    #[arg(long)]
    pub view_kbuild: bool,

    /// Emit N configurations instead of one
    #[arg(long, value_name = "N")]
    pub sample: Option<usize>,

    /// Filename prefix of sampled configurations
    #[arg(long, value_name = "PREFIX", default_value = "config")]
    pub sample_prefix: String,

    /// Random seed passed to the solver
    #[arg(long, value_name = "SEED")]
    pub random_seed: Option<u64>,
}

impl Cli {
    pub fn into_options(self) -> Options {
        Options {
            units: self.units,
            formulas_root: self.formulas,
            kbuild_file: self.kbuild,
            kconfig_file: self.kconfig,
            extract_file: self.kconfig_extract,
            constraints_file: self.constraints_file,
            archs: self.archs,
            try_all: self.all,
            report_all: self.report_all,
            output: self.output,
            approximate: self.approximate,
            modules: self.modules,
            show_unsat_core: self.show_unsat_core,
            defines: self.defines,
            undefines: self.undefines,
            allow_config_broken: self.allow_config_broken,
            allow_non_visibles: self.allow_non_visibles,
            view_kbuild: self.view_kbuild,
            sample: self.sample,
            sample_prefix: self.sample_prefix,
            seed: self.random_seed,
        }
    }
}
