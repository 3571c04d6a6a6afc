mod common;

use common::{init, Fixture};
use kcover::arch;
use kcover::compose::{self, ComposeRequest, Constraint};
use kcover::emit;
use kcover::engine::{run, EngineError, Options, Outcome};
use kcover::solver::{
    self, varisat_impl::VarisatBackend, Outcome as SolveOutcome, SolveOptions,
};
use kcover::store::{load_kconfig_bundle, FormulaStore};
use std::fs;
use std::path::PathBuf;

fn options_for(fixture: &Fixture) -> Options {
    Options {
        formulas_root: fixture.root().to_path_buf(),
        output: fixture.path("out.config"),
        ..Options::default()
    }
}

const TRIVIAL_BUNDLE: &[(&str, &[&str])] = &[(
    "CONFIG_FOO",
    &["(assert (or (not CONFIG_FOO) CONFIG_X86))"],
)];

#[test]
fn single_arch_without_units_yields_a_pinned_configuration() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", TRIVIAL_BUNDLE);

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];

    match run(&options).unwrap() {
        Outcome::Configured { arch } => assert_eq!(arch.as_deref(), Some("x86_64")),
        other => panic!("unexpected outcome {:?}", other),
    }

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_X86=y\n"));
    assert!(config.contains("CONFIG_X86_64=y\n"));
    assert!(config.contains("# CONFIG_X86_32 is not set\n"));
}

#[test]
fn kbuild_chain_forces_the_unit_enabling_options() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[
        ("kernel/", "(assert (not CONFIG_A))"),
        ("kernel/kcmp.o", "(assert CONFIG_B)"),
    ]);
    fixture.write_bundle("x86_64", &[("CONFIG_A", &[]), ("CONFIG_B", &[])]);

    let mut options = options_for(&fixture);
    options.units = vec!["kernel/kcmp.o".to_string()];
    options.archs = vec!["x86_64".to_string()];

    run(&options).unwrap();

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_B=y\n"));
    assert!(config.contains("# CONFIG_A is not set\n"));
}

#[test]
fn unit_outside_the_requested_arch_fails_with_the_dedicated_code() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[("arch/arm/mm/fault.o", "(assert CONFIG_MMU)")]);

    let mut options = options_for(&fixture);
    options.units = vec!["arch/arm/mm/fault.o".to_string()];
    options.archs = vec!["x86_64".to_string()];

    let err = run(&options).unwrap_err();
    assert!(matches!(err, EngineError::UnitArchMismatch { .. }));
    assert_eq!(err.exit_code(), 9);
}

#[test]
fn several_keys_for_one_unit_are_a_reported_ambiguity() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[
        ("kernel/kcmp.o", "(assert CONFIG_B)"),
        ("./kernel/kcmp.o", "(assert CONFIG_B)"),
    ]);

    let mut options = options_for(&fixture);
    options.units = vec!["kernel//kcmp.o".to_string()];
    options.archs = vec!["x86_64".to_string()];

    let err = run(&options).unwrap_err();
    match &err {
        EngineError::AmbiguousUnit { candidates, .. } => assert_eq!(candidates.len(), 2),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn conflicting_define_and_undefine_are_unsatisfiable() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", &[("CONFIG_X", &[])]);

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];
    options.defines = vec!["CONFIG_X".to_string()];
    options.undefines = vec!["CONFIG_X".to_string()];
    options.show_unsat_core = true;

    let err = run(&options).unwrap_err();
    assert!(matches!(err, EngineError::Unsatisfiable));
    assert_eq!(err.exit_code(), 11);
    assert!(!fixture.path("out.config").exists());
}

#[test]
fn approximate_mode_cannot_drop_conflicting_user_constraints() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", &[("CONFIG_X", &[])]);
    let reference = fixture.path("reference.config");
    fs::write(&reference, "CONFIG_Z=y\n").unwrap();

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];
    options.defines = vec!["CONFIG_X".to_string()];
    options.undefines = vec!["CONFIG_X".to_string()];
    options.approximate = Some(reference);

    let err = run(&options).unwrap_err();
    assert!(matches!(err, EngineError::Unsatisfiable));
}

#[test]
fn samples_are_parseable_and_satisfy_the_constraints() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", TRIVIAL_BUNDLE);
    let prefix = fixture.path("cfg").to_string_lossy().into_owned();

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];
    options.defines = vec!["CONFIG_FOO".to_string()];
    options.sample = Some(3);
    options.sample_prefix = prefix.clone();
    options.seed = Some(42);

    match run(&options).unwrap() {
        Outcome::Configured { arch } => assert_eq!(arch.as_deref(), Some("x86_64")),
        other => panic!("unexpected outcome {:?}", other),
    }

    let bundle =
        load_kconfig_bundle(&fixture.path("kclause").join("x86_64").join("kclause")).unwrap();
    let profile = arch::profile("x86_64");
    let defines = vec!["CONFIG_FOO".to_string()];
    let mut store = FormulaStore::empty();
    let base = compose::compose(
        &mut store,
        &ComposeRequest {
            units: &[],
            bundle: &bundle,
            extract: None,
            adhoc: &[],
            defines: &defines,
            undefines: &[],
            profile: Some(&profile),
            allow_broken: false,
        },
    )
    .unwrap();

    for index in 1..=3 {
        let path = PathBuf::from(format!("{}{}", prefix, index));
        assert!(path.exists(), "sample {} was written", index);

        let literals = emit::parse_dot_config(&path).unwrap();
        assert!(!literals.is_empty(), "sample {} is parseable", index);

        let mut composition = base.clone();
        for literal in &literals {
            composition.constraints.push(Constraint {
                origin: format!("reference:{}", literal.name),
                formula: literal.formula(),
            });
        }

        match solver::solve_single::<VarisatBackend>(&composition, &SolveOptions::default())
            .unwrap()
        {
            SolveOutcome::Sat(model) => {
                for name in &base.user_specified {
                    if let Some(literal) = literals.iter().find(|l| &l.name == name) {
                        assert_eq!(
                            model.value(name),
                            Some(literal.positive),
                            "sample {} disagrees on {}",
                            index,
                            name
                        );
                    }
                }
            }
            SolveOutcome::Unsat(core) => {
                panic!("sample {} violates the constraint set: {:?}", index, core)
            }
        }
    }
}

#[test]
fn an_emitted_configuration_re_solves_as_hard_constraints() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", &[("CONFIG_P", &[]), ("CONFIG_Q", &[])]);

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];
    options.defines = vec!["CONFIG_P".to_string()];
    options.undefines = vec!["CONFIG_Q".to_string()];

    run(&options).unwrap();

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_P=y\n"));
    assert!(config.contains("# CONFIG_Q is not set\n"));

    let literals = emit::parse_dot_config(&fixture.path("out.config")).unwrap();
    let bundle =
        load_kconfig_bundle(&fixture.path("kclause").join("x86_64").join("kclause")).unwrap();
    let profile = arch::profile("x86_64");
    let defines = vec!["CONFIG_P".to_string()];
    let undefines = vec!["CONFIG_Q".to_string()];
    let mut store = FormulaStore::empty();
    let mut composition = compose::compose(
        &mut store,
        &ComposeRequest {
            units: &[],
            bundle: &bundle,
            extract: None,
            adhoc: &[],
            defines: &defines,
            undefines: &undefines,
            profile: Some(&profile),
            allow_broken: false,
        },
    )
    .unwrap();
    for literal in &literals {
        composition.constraints.push(Constraint {
            origin: format!("reference:{}", literal.name),
            formula: literal.formula(),
        });
    }

    match solver::solve_single::<VarisatBackend>(&composition, &SolveOptions::default()).unwrap()
    {
        SolveOutcome::Sat(model) => {
            assert_eq!(model.value("CONFIG_P"), Some(true));
            assert_eq!(model.value("CONFIG_Q"), Some(false));
        }
        SolveOutcome::Unsat(core) => panic!("emitted configuration is infeasible: {:?}", core),
    }
}

#[test]
fn broken_units_stop_with_the_dedicated_code_and_no_output() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[("drivers/acme.o", "(assert (and CONFIG_ACME CONFIG_BROKEN))")]);
    fixture.write_bundle("x86_64", &[("CONFIG_ACME", &[])]);

    let mut options = options_for(&fixture);
    options.units = vec!["drivers/acme.o".to_string()];
    options.archs = vec!["x86_64".to_string()];

    let err = run(&options).unwrap_err();
    assert!(matches!(err, EngineError::Broken));
    assert_eq!(err.exit_code(), 10);
    assert!(!fixture.path("out.config").exists());
}

#[test]
fn allowing_config_broken_makes_the_same_unit_feasible() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[("drivers/acme.o", "(assert (and CONFIG_ACME CONFIG_BROKEN))")]);
    fixture.write_bundle("x86_64", &[("CONFIG_ACME", &[])]);

    let mut options = options_for(&fixture);
    options.units = vec!["drivers/acme.o".to_string()];
    options.archs = vec!["x86_64".to_string()];
    options.allow_config_broken = true;

    run(&options).unwrap();

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_BROKEN=y\n"));
}

#[test]
fn approximate_mode_returns_a_model_whenever_the_base_set_is_satisfiable() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[("kernel/kcmp.o", "(assert (not CONFIG_A))")]);
    fixture.write_bundle("x86_64", &[("CONFIG_A", &[])]);
    let reference = fixture.path("reference.config");
    fs::write(&reference, "CONFIG_A=y\nCONFIG_C=y\n").unwrap();

    let mut options = options_for(&fixture);
    options.units = vec!["kernel/kcmp.o".to_string()];
    options.archs = vec!["x86_64".to_string()];
    options.approximate = Some(reference);

    run(&options).unwrap();

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    // the conflicting reference literal was dropped
    assert!(config.contains("# CONFIG_A is not set\n"));
    // the compatible reference literal survived
    assert!(config.contains("CONFIG_C=y\n"));
}

#[test]
fn report_all_collects_every_feasible_architecture() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[("kernel/kcmp.o", "(assert CONFIG_B)")]);
    fixture.write_bundle("x86_64", &[("CONFIG_B", &[])]);
    fixture.write_bundle("i386", &[("CONFIG_B", &[])]);

    let mut options = options_for(&fixture);
    options.units = vec!["kernel/kcmp.o".to_string()];
    options.archs = vec!["x86_64".to_string(), "i386".to_string()];
    options.report_all = true;

    match run(&options).unwrap() {
        Outcome::Feasible { archs } => assert_eq!(archs, vec!["x86_64", "i386"]),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!fixture.path("out.config").exists());
}

#[test]
fn visibility_and_types_filter_the_emitted_configuration() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle(
        "x86_64",
        &[("CONFIG_A", &[]), ("CONFIG_T", &[]), ("CONFIG_HIDDEN", &[])],
    );
    fixture.write_extract(
        "x86_64",
        "config CONFIG_A bool\n\
         config CONFIG_T tristate\n\
         config CONFIG_HIDDEN bool\n\
         prompt CONFIG_A\n\
         prompt CONFIG_T\n",
    );

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];
    options.defines = vec!["CONFIG_A".to_string(), "CONFIG_T".to_string()];
    options.modules = true;

    run(&options).unwrap();

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_A=y\n"));
    assert!(config.contains("CONFIG_T=m\n"));
    assert!(!config.contains("CONFIG_HIDDEN"));
    // arch pins are invisible under this extract
    assert!(!config.contains("CONFIG_X86=y\n"));
}

#[test]
fn an_existing_output_is_backed_up_before_overwriting() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", TRIVIAL_BUNDLE);
    fs::write(fixture.path("out.config"), "CONFIG_OLD=y\n").unwrap();

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];

    run(&options).unwrap();

    let backup = fs::read_to_string(fixture.path("out.config.orig")).unwrap();
    assert_eq!(backup, "CONFIG_OLD=y\n");
    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_X86=y\n"));
}

#[test]
fn an_explicit_missing_bundle_is_a_dedicated_error() {
    init();
    let fixture = Fixture::new();

    let mut options = options_for(&fixture);
    options.kconfig_file = Some(fixture.path("nowhere/kclause"));

    let err = run(&options).unwrap_err();
    assert!(matches!(err, EngineError::KconfigBundleMissing { .. }));
    assert_eq!(err.exit_code(), 6);
}

#[test]
fn no_available_bundle_for_any_arch_is_a_dedicated_error() {
    init();
    let fixture = Fixture::new();

    let mut options = options_for(&fixture);
    options.archs = vec!["arm64".to_string()];

    let err = run(&options).unwrap_err();
    assert!(matches!(err, EngineError::NoKconfigBundles));
    assert_eq!(err.exit_code(), 7);
}

#[test]
fn multiple_architectures_without_a_unit_are_rejected() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", TRIVIAL_BUNDLE);

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string(), "arm".to_string()];

    let err = run(&options).unwrap_err();
    assert!(matches!(err, EngineError::MultipleArchsNoUnit));
    assert_eq!(err.exit_code(), 8);
}

#[test]
fn explicit_bundle_skips_architecture_profiles() {
    init();
    let fixture = Fixture::new();
    let bundle = fixture.write_bundle(
        "explicit",
        &[("CONFIG_B", &["(assert CONFIG_B)"])],
    );

    let mut options = options_for(&fixture);
    options.kconfig_file = Some(bundle);

    match run(&options).unwrap() {
        Outcome::Configured { arch } => assert!(arch.is_none()),
        other => panic!("unexpected outcome {:?}", other),
    }

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_B=y\n"));
    assert!(!config.contains("CONFIG_X86=y\n"));
}

#[test]
fn view_kbuild_prints_the_chain_and_writes_nothing() {
    init();
    let fixture = Fixture::new();
    fixture.write_kbuild(&[
        ("kernel/", "(assert (not CONFIG_A))"),
        ("kernel/kcmp.o", "(assert CONFIG_B)"),
    ]);

    let mut options = options_for(&fixture);
    options.units = vec!["kernel/kcmp.o".to_string()];
    options.view_kbuild = true;

    assert!(matches!(run(&options).unwrap(), Outcome::Viewed));
    assert!(!fixture.path("out.config").exists());
}

#[test]
fn adhoc_constraints_force_polarities() {
    init();
    let fixture = Fixture::new();
    fixture.write_bundle("x86_64", &[("CONFIG_P", &[]), ("CONFIG_Q", &[])]);
    let constraints = fixture.path("extra.constraints");
    fs::write(&constraints, "CONFIG_P\n\n!CONFIG_Q\n").unwrap();

    let mut options = options_for(&fixture);
    options.archs = vec!["x86_64".to_string()];
    options.constraints_file = Some(constraints);

    run(&options).unwrap();

    let config = fs::read_to_string(fixture.path("out.config")).unwrap();
    assert!(config.contains("CONFIG_P=y\n"));
    assert!(config.contains("# CONFIG_Q is not set\n"));
}
