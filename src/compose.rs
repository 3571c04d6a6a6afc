use crate::arch::ArchProfile;
use crate::engine::EngineError;
use crate::extract::KconfigExtract;
use crate::formula::Formula;
use crate::resolve::ancestor_keys;
use crate::store::{FormulaStore, KconfigBundle};
use indexmap::IndexSet;
use log::debug;
use std::fs;
use std::path::Path;

//
// Public Interface
//

/// A single option literal: an option name with a forced polarity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Literal {
    pub name: String,
    pub positive: bool,
}

impl Literal {
    pub fn positive(name: &str) -> Self {
        Self {
            name: name.to_string(),
            positive: true,
        }
    }

    pub fn negative(name: &str) -> Self {
        Self {
            name: name.to_string(),
            positive: false,
        }
    }

    pub fn formula(&self) -> Formula {
        let var = Formula::Var(self.name.clone());
        if self.positive {
            var
        } else {
            var.negate()
        }
    }
}

/// One constraint of the composed problem, labelled with its origin
/// for unsat-core reporting.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub origin: String,
    pub formula: Formula,
}

/// Origin label of the `CONFIG_BROKEN` guard constraint.
pub const BROKEN_GUARD: &str = "broken-guard";

/// The flat constraint list of one (compilation-unit-set, arch)
/// attempt, plus the privileged user-constraint set.
#[derive(Clone, Debug, Default)]
pub struct Composition {
    pub constraints: Vec<Constraint>,
    pub user_constraints: Vec<Literal>,
    pub user_specified: IndexSet<String>,
}

pub struct ComposeRequest<'a> {
    pub units: &'a [String],
    pub bundle: &'a KconfigBundle,
    pub extract: Option<&'a KconfigExtract>,
    pub adhoc: &'a [Literal],
    pub defines: &'a [String],
    pub undefines: &'a [String],
    pub profile: Option<&'a ArchProfile>,
    pub allow_broken: bool,
}

/// Assembles the full constraint list for one attempt: Kbuild chains,
/// Kconfig clauses, user constraints, the architecture profile and the
/// `CONFIG_BROKEN` guard.
pub fn compose(
    store: &mut FormulaStore,
    request: &ComposeRequest,
) -> Result<Composition, EngineError> {
    let mut composition = Composition::default();
    let mut kbuild_atoms = IndexSet::new();

    // 1. per-unit Kbuild chain conjunctions
    for unit in request.units {
        let chain = chain_formula(store, unit)?;
        chain.collect_atoms(&mut kbuild_atoms);
        composition.constraints.push(Constraint {
            origin: format!("kbuild:{}", unit),
            formula: chain,
        });
    }

    // 2. options referenced by Kbuild but unknown to this arch's
    // Kconfig cannot be set
    if let Some(extract) = request.extract {
        for atom in &kbuild_atoms {
            if is_config_option(atom) && !extract.types.contains_key(atom) {
                debug!("'{}' is not declared by Kconfig, forcing it off", atom);
                composition.constraints.push(Constraint {
                    origin: format!("undeclared:{}", atom),
                    formula: Formula::Var(atom.clone()).negate(),
                });
            }
        }
    }

    // 3. Kconfig clauses
    for (option, clauses) in &request.bundle.clauses {
        for clause in clauses {
            composition.constraints.push(Constraint {
                origin: format!("kclause:{}", option),
                formula: clause.clone(),
            });
        }
    }

    // 4. ad-hoc constraints file
    for literal in request.adhoc {
        composition.push_user(
            format!("adhoc:{}", literal.name),
            literal.clone(),
        );
    }

    // 5. defines and undefines
    for name in request.defines {
        composition.push_user(format!("define:{}", name), Literal::positive(name));
    }
    for name in request.undefines {
        composition.push_user(format!("undefine:{}", name), Literal::negative(name));
    }

    // 6. architecture profile
    if let Some(profile) = request.profile {
        for name in &profile.positive {
            composition.constraints.push(Constraint {
                origin: format!("arch:{}", profile.tag),
                formula: Formula::Var(name.clone()),
            });
        }
        for name in &profile.negative {
            composition.constraints.push(Constraint {
                origin: format!("arch:{}", profile.tag),
                formula: Formula::Var(name.clone()).negate(),
            });
        }
    }

    // 7. CONFIG_BROKEN guard
    if !request.allow_broken {
        composition.constraints.push(Constraint {
            origin: BROKEN_GUARD.to_string(),
            formula: Formula::Var("CONFIG_BROKEN".to_string()).negate(),
        });
    }

    Ok(composition)
}

/// The effective presence condition of a compilation unit: its own
/// formula conjoined with each ancestor directory's formula.
pub fn chain_formula(store: &mut FormulaStore, unit: &str) -> Result<Formula, EngineError> {
    let mut parts = Vec::new();

    for ancestor in ancestor_keys(unit) {
        parts.extend(store.formulas(&ancestor)?);
    }
    parts.extend(store.formulas(unit)?);

    Ok(Formula::conjoin(parts))
}

/// Parses an ad-hoc constraints file: one `NAME` or `!NAME` token per
/// line, blank lines ignored, duplicates collapsed.
pub fn parse_adhoc_file(path: &Path) -> Result<Vec<Literal>, EngineError> {
    let content = fs::read_to_string(path)?;
    let mut literals = IndexSet::new();

    for line in content.lines() {
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        let literal = match token.strip_prefix('!') {
            Some(name) => Literal::negative(name),
            None => Literal::positive(token),
        };
        literals.insert(literal);
    }

    Ok(literals.into_iter().collect())
}

pub fn is_config_option(name: &str) -> bool {
    match name.strip_prefix("CONFIG_") {
        Some(rest) => {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

//
// Private Implementation
//

impl Composition {
    fn push_user(&mut self, origin: String, literal: Literal) {
        self.constraints.push(Constraint {
            origin,
            formula: literal.formula(),
        });
        self.user_specified.insert(literal.name.clone());
        self.user_constraints.push(literal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch;
    use crate::store::FormulaStore;
    use indexmap::IndexMap;

    fn empty_bundle() -> KconfigBundle {
        KconfigBundle {
            clauses: IndexMap::new(),
        }
    }

    fn request<'a>(units: &'a [String], bundle: &'a KconfigBundle) -> ComposeRequest<'a> {
        ComposeRequest {
            units,
            bundle,
            extract: None,
            adhoc: &[],
            defines: &[],
            undefines: &[],
            profile: None,
            allow_broken: false,
        }
    }

    #[test]
    fn chain_conjoins_unit_and_ancestors() {
        let mut store = FormulaStore::empty();
        store.insert("kernel/".to_string(), "(assert (not CONFIG_A))".to_string());
        store.insert("kernel/kcmp.o".to_string(), "(assert CONFIG_B)".to_string());

        let chain = chain_formula(&mut store, "kernel/kcmp.o").unwrap();

        assert_eq!(chain.to_string(), "(and (not CONFIG_A) CONFIG_B)");
    }

    #[test]
    fn absent_ancestors_do_not_constrain() {
        let mut store = FormulaStore::empty();
        store.insert(
            "drivers/net/e1000.o".to_string(),
            "(assert CONFIG_E1000)".to_string(),
        );

        let chain = chain_formula(&mut store, "drivers/net/e1000.o").unwrap();

        assert_eq!(chain.to_string(), "CONFIG_E1000");
    }

    #[test]
    fn broken_guard_is_appended_unless_allowed() {
        let mut store = FormulaStore::empty();
        let bundle = empty_bundle();

        let composition = compose(&mut store, &request(&[], &bundle)).unwrap();
        assert!(composition
            .constraints
            .iter()
            .any(|c| c.origin == BROKEN_GUARD));

        let mut allowing = request(&[], &bundle);
        allowing.allow_broken = true;
        let composition = compose(&mut store, &allowing).unwrap();
        assert!(composition.constraints.is_empty());
    }

    #[test]
    fn user_literals_are_privileged_and_recorded() {
        let mut store = FormulaStore::empty();
        let bundle = empty_bundle();
        let adhoc = vec![Literal::positive("CONFIG_P"), Literal::negative("CONFIG_Q")];

        let mut req = request(&[], &bundle);
        req.adhoc = &adhoc;
        let defines = vec!["CONFIG_X".to_string()];
        let undefines = vec!["CONFIG_Y".to_string()];
        req.defines = &defines;
        req.undefines = &undefines;

        let composition = compose(&mut store, &req).unwrap();

        assert_eq!(composition.user_constraints.len(), 4);
        let names: Vec<&str> = composition
            .user_specified
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(names, vec!["CONFIG_P", "CONFIG_Q", "CONFIG_X", "CONFIG_Y"]);
    }

    #[test]
    fn undeclared_kbuild_options_are_forced_off() {
        let mut store = FormulaStore::empty();
        store.insert(
            "kernel/kcmp.o".to_string(),
            "(assert (and CONFIG_B (= BITS 64)))".to_string(),
        );
        let bundle = empty_bundle();

        let extract = crate::extract::KconfigExtract::parse("config CONFIG_OTHER bool\n");
        let units = vec!["kernel/kcmp.o".to_string()];
        let mut req = request(&units, &bundle);
        req.extract = Some(&extract);

        let composition = compose(&mut store, &req).unwrap();

        assert!(composition
            .constraints
            .iter()
            .any(|c| c.origin == "undeclared:CONFIG_B"));
        // non-config atoms are never auto-negated
        assert!(!composition
            .constraints
            .iter()
            .any(|c| c.origin.contains("BITS")));
    }

    #[test]
    fn arch_profile_literals_are_appended() {
        let mut store = FormulaStore::empty();
        let bundle = empty_bundle();
        let profile = arch::profile("x86_64");

        let mut req = request(&[], &bundle);
        req.profile = Some(&profile);
        let composition = compose(&mut store, &req).unwrap();

        let arch_constraints = composition
            .constraints
            .iter()
            .filter(|c| c.origin == "arch:x86_64")
            .count();
        assert_eq!(
            arch_constraints,
            profile.positive.len() + profile.negative.len()
        );
    }

    #[test]
    fn config_option_shape() {
        assert!(is_config_option("CONFIG_X86_64"));
        assert!(is_config_option("CONFIG_9P_FS"));
        assert!(!is_config_option("BITS=64"));
        assert!(!is_config_option("CONFIG_"));
        assert!(!is_config_option("X86"));
        assert!(!is_config_option("CONFIG_A=y"));
    }
}
