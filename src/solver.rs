use crate::compose::{Composition, Literal};
use crate::formula::Formula;
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashSet;
use thiserror::Error;

//
// Public Interface
//

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("{0} backend failed: {1}")]
    Backend(&'static str, String),

    #[error("{0} backend produced no model after a successful check")]
    MissingModel(&'static str),
}

/// A satisfying assignment in atom-interning order.
#[derive(Clone, Debug, Default)]
pub struct Model {
    entries: Vec<(String, bool)>,
}

impl Model {
    pub fn new(entries: Vec<(String, bool)>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, bool)> {
        self.entries.iter()
    }

    pub fn value(&self, name: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a satisfiability check: a model, or the origins of the
/// constraints in the unsat core.
#[derive(Debug)]
pub enum Outcome {
    Sat(Model),
    Unsat(Vec<String>),
}

#[derive(Debug)]
pub enum SampleOutcome {
    Sat(Vec<Model>),
    Unsat(Vec<String>),
}

/// One SAT/SMT backend session. Constraints are tracked individually
/// so an unsat core maps back to constraint origins; reference-config
/// literals enter as retractable assumptions.
pub trait Backend {
    fn new(seed: Option<u64>) -> Self;
    fn name() -> &'static str;
    fn add_constraint(&mut self, origin: &str, formula: &Formula);
    fn check(&mut self, assumptions: &[Literal]) -> Result<bool, SolverError>;
    fn model(&mut self) -> Result<Model, SolverError>;
    fn failed_constraints(&mut self) -> Vec<String>;
    fn failed_assumptions(&mut self) -> Vec<Literal>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SolveOptions {
    pub seed: Option<u64>,
}

/// Checks satisfiability of the composed constraints and extracts one
/// model.
pub fn solve_single<B: Backend>(
    composition: &Composition,
    options: &SolveOptions,
) -> Result<Outcome, SolverError> {
    let mut backend = load::<B>(composition, options.seed, None);

    debug!("checking satisfiability with {} backend", B::name());
    if backend.check(&[])? {
        Ok(Outcome::Sat(backend.model()?))
    } else {
        Ok(Outcome::Unsat(backend.failed_constraints()))
    }
}

/// Issues `count` checks, extracting one model after each. Model
/// variation comes from reloading the constraints in a seeded shuffled
/// order; successive models are not guaranteed distinct.
pub fn solve_samples<B: Backend>(
    composition: &Composition,
    count: usize,
    options: &SolveOptions,
) -> Result<SampleOutcome, SolverError> {
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut order: Vec<usize> = (0..composition.constraints.len()).collect();
    let mut models = Vec::new();

    for attempt in 0..count {
        if attempt > 0 {
            order.shuffle(&mut rng);
        }
        let mut backend = load::<B>(composition, options.seed, Some(&order));

        if !backend.check(&[])? {
            return Ok(SampleOutcome::Unsat(backend.failed_constraints()));
        }
        models.push(backend.model()?);
    }

    Ok(SampleOutcome::Sat(models))
}

/// Finds a model as close to the reference literals as the constraints
/// allow, by iteratively dropping reference assumptions that appear in
/// the unsat core. User-supplied constraints are immovable.
pub fn approximate<B: Backend>(
    composition: &Composition,
    reference: &[Literal],
    options: &SolveOptions,
) -> Result<Outcome, SolverError> {
    let mut backend = load::<B>(composition, options.seed, None);
    let immovable: HashSet<&String> = composition
        .user_constraints
        .iter()
        .map(|literal| &literal.name)
        .collect();
    let mut assumptions: Vec<Literal> = reference.to_vec();

    loop {
        if backend.check(&assumptions)? {
            return Ok(Outcome::Sat(backend.model()?));
        }

        let core: HashSet<Literal> = backend.failed_assumptions().into_iter().collect();
        let before = assumptions.len();
        assumptions
            .retain(|literal| immovable.contains(&literal.name) || !core.contains(literal));

        if assumptions.len() == before {
            debug!("no reference assumption can be dropped, giving up");
            return Ok(Outcome::Unsat(backend.failed_constraints()));
        }
        debug!(
            "dropped {} reference assumptions, {} remain",
            before - assumptions.len(),
            assumptions.len()
        );
    }
}

#[cfg(not(feature = "z3"))]
pub type DefaultBackend = varisat_impl::VarisatBackend;
#[cfg(feature = "z3")]
pub type DefaultBackend = z3_impl::Z3Backend;

//
// Private Implementation
//

fn load<B: Backend>(composition: &Composition, seed: Option<u64>, order: Option<&[usize]>) -> B {
    let mut backend = B::new(seed);

    match order {
        Some(indices) => {
            for &index in indices {
                let constraint = &composition.constraints[index];
                backend.add_constraint(&constraint.origin, &constraint.formula);
            }
        }
        None => {
            for constraint in &composition.constraints {
                backend.add_constraint(&constraint.origin, &constraint.formula);
            }
        }
    }

    backend
}

pub mod varisat_impl {
    use super::{Backend, Model, SolverError};
    use crate::compose::Literal;
    use crate::formula::{eq_atom, Formula};
    use indexmap::{IndexMap, IndexSet};
    use std::collections::HashMap;
    use varisat::{ExtendFormula, Lit, Solver, Var};

    /// Tseitin transformation of the formula AST into CNF, solved by
    /// the pure-Rust varisat solver. Each constraint is guarded by an
    /// activation literal passed as an assumption, so the failed
    /// assumption core doubles as the constraint unsat core.
    pub struct VarisatBackend {
        solver: Solver<'static>,
        atoms: IndexMap<String, Var>,
        trackers: Vec<(Lit, String)>,
        last_assumptions: HashMap<Lit, Literal>,
    }

    impl Backend for VarisatBackend {
        fn new(_seed: Option<u64>) -> Self {
            Self {
                solver: Solver::new(),
                atoms: IndexMap::new(),
                trackers: Vec::new(),
                last_assumptions: HashMap::new(),
            }
        }

        fn name() -> &'static str {
            "varisat"
        }

        fn add_constraint(&mut self, origin: &str, formula: &Formula) {
            let encoded = self.encode(formula);
            let tracker = Lit::positive(self.solver.new_var());
            self.solver.add_clause(&[!tracker, encoded]);
            self.trackers.push((tracker, origin.to_string()));
        }

        fn check(&mut self, assumptions: &[Literal]) -> Result<bool, SolverError> {
            let mut lits: Vec<Lit> = self.trackers.iter().map(|(lit, _)| *lit).collect();

            self.last_assumptions.clear();
            for literal in assumptions {
                let var = self.atom_var(&literal.name);
                let lit = if literal.positive {
                    Lit::positive(var)
                } else {
                    Lit::negative(var)
                };
                self.last_assumptions.insert(lit, literal.clone());
                lits.push(lit);
            }

            self.solver.assume(&lits);
            self.solver
                .solve()
                .map_err(|err| SolverError::Backend(Self::name(), err.to_string()))
        }

        fn model(&mut self) -> Result<Model, SolverError> {
            let lits = self
                .solver
                .model()
                .ok_or(SolverError::MissingModel(Self::name()))?;

            let assignment: HashMap<Var, bool> = lits
                .iter()
                .map(|lit| (lit.var(), lit.is_positive()))
                .collect();

            Ok(Model::new(
                self.atoms
                    .iter()
                    .map(|(name, var)| {
                        (name.clone(), assignment.get(var).copied().unwrap_or(false))
                    })
                    .collect(),
            ))
        }

        fn failed_constraints(&mut self) -> Vec<String> {
            let core = match self.solver.failed_core() {
                Some(core) => core,
                None => return Vec::new(),
            };

            let by_tracker: HashMap<Lit, &String> = self
                .trackers
                .iter()
                .map(|(lit, origin)| (*lit, origin))
                .collect();

            let mut origins = IndexSet::new();
            for lit in core {
                if let Some(origin) = by_tracker.get(lit) {
                    origins.insert((*origin).clone());
                }
            }
            origins.into_iter().collect()
        }

        fn failed_assumptions(&mut self) -> Vec<Literal> {
            let core = match self.solver.failed_core() {
                Some(core) => core,
                None => return Vec::new(),
            };

            core.iter()
                .filter_map(|lit| self.last_assumptions.get(lit).cloned())
                .collect()
        }
    }

    impl VarisatBackend {
        fn atom_var(&mut self, name: &str) -> Var {
            if let Some(var) = self.atoms.get(name) {
                return *var;
            }
            let var = self.solver.new_var();
            self.atoms.insert(name.to_string(), var);
            var
        }

        fn encode(&mut self, formula: &Formula) -> Lit {
            match formula {
                Formula::Const(value) => {
                    let gate = Lit::positive(self.solver.new_var());
                    self.solver.add_clause(&[if *value { gate } else { !gate }]);
                    gate
                }
                Formula::Var(name) => Lit::positive(self.atom_var(name)),
                Formula::Eq(var, literal) => {
                    Lit::positive(self.atom_var(&eq_atom(var, literal)))
                }
                Formula::Not(inner) => !self.encode(inner),
                Formula::And(parts) => {
                    let lits: Vec<Lit> = parts.iter().map(|p| self.encode(p)).collect();
                    let gate = Lit::positive(self.solver.new_var());
                    // X := and(A, B, ...):
                    //   (-X | +A) for every operand, (+X | -A | -B | ...)
                    for &lit in &lits {
                        self.solver.add_clause(&[!gate, lit]);
                    }
                    let mut clause: Vec<Lit> = lits.iter().map(|&lit| !lit).collect();
                    clause.push(gate);
                    self.solver.add_clause(&clause);
                    gate
                }
                Formula::Or(parts) => {
                    let lits: Vec<Lit> = parts.iter().map(|p| self.encode(p)).collect();
                    let gate = Lit::positive(self.solver.new_var());
                    // X := or(A, B, ...):
                    //   (+X | -A) for every operand, (-X | +A | +B | ...)
                    for &lit in &lits {
                        self.solver.add_clause(&[gate, !lit]);
                    }
                    let mut clause = lits;
                    clause.push(!gate);
                    self.solver.add_clause(&clause);
                    gate
                }
            }
        }
    }
}

#[cfg(feature = "z3")]
pub mod z3_impl {
    use super::{Backend, Model, SolverError};
    use crate::compose::Literal;
    use crate::formula::{eq_atom, Formula};
    use indexmap::IndexMap;
    use std::collections::HashMap;
    use z3::ast::{Ast, Bool};
    use z3::{Config, Context, SatResult, Solver};

    /// Translation of the formula AST into z3 terms, with tracked
    /// assertions so `get_unsat_core` maps back to constraint origins.
    pub struct Z3Backend {
        context: &'static Context,
        solver: Solver<'static>,
        atoms: IndexMap<String, Bool<'static>>,
        trackers: Vec<(String, String)>,
        last_assumptions: HashMap<String, Literal>,
    }

    impl Backend for Z3Backend {
        fn new(seed: Option<u64>) -> Self {
            let mut config = Config::new();
            config.set_param_value("unsat_core", "true");
            if let Some(seed) = seed {
                config.set_param_value("smt.random_seed", &seed.to_string());
                config.set_param_value("sat.random_seed", &seed.to_string());
            }
            let context = Context::new(&config);
            // the context lives for the rest of the process
            let context: &'static Context = Box::leak(Box::new(context));
            Self {
                context,
                solver: Solver::new(context),
                atoms: IndexMap::new(),
                trackers: Vec::new(),
                last_assumptions: HashMap::new(),
            }
        }

        fn name() -> &'static str {
            "z3"
        }

        fn add_constraint(&mut self, origin: &str, formula: &Formula) {
            let term = self.translate(formula);
            let tracker_name = format!("track!{}", self.trackers.len());
            let tracker = Bool::new_const(self.context, tracker_name.as_str());
            self.solver.assert_and_track(&term, &tracker);
            self.trackers.push((tracker_name, origin.to_string()));
        }

        fn check(&mut self, assumptions: &[Literal]) -> Result<bool, SolverError> {
            self.last_assumptions.clear();
            let terms: Vec<Bool> = assumptions
                .iter()
                .map(|literal| {
                    let atom = self.atom(&literal.name).clone();
                    let term = if literal.positive { atom } else { atom.not() };
                    self.last_assumptions
                        .insert(term.to_string(), literal.clone());
                    term
                })
                .collect();

            match self.solver.check_assumptions(&terms) {
                SatResult::Sat => Ok(true),
                SatResult::Unsat => Ok(false),
                SatResult::Unknown => Err(SolverError::Backend(
                    Self::name(),
                    "satisfiability unknown".to_string(),
                )),
            }
        }

        fn model(&mut self) -> Result<Model, SolverError> {
            let model = self
                .solver
                .get_model()
                .ok_or(SolverError::MissingModel(Self::name()))?;

            Ok(Model::new(
                self.atoms
                    .iter()
                    .map(|(name, term)| {
                        let value = model
                            .eval(term, true)
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false);
                        (name.clone(), value)
                    })
                    .collect(),
            ))
        }

        fn failed_constraints(&mut self) -> Vec<String> {
            let by_tracker: HashMap<&str, &String> = self
                .trackers
                .iter()
                .map(|(name, origin)| (name.as_str(), origin))
                .collect();

            self.solver
                .get_unsat_core()
                .iter()
                .filter_map(|term| by_tracker.get(term.to_string().as_str()).cloned())
                .cloned()
                .collect()
        }

        fn failed_assumptions(&mut self) -> Vec<Literal> {
            self.solver
                .get_unsat_core()
                .iter()
                .filter_map(|term| self.last_assumptions.get(&term.to_string()).cloned())
                .collect()
        }
    }

    impl Z3Backend {
        fn atom(&mut self, name: &str) -> &Bool<'static> {
            if !self.atoms.contains_key(name) {
                let term = Bool::new_const(self.context, name);
                self.atoms.insert(name.to_string(), term);
            }
            &self.atoms[name]
        }

        fn translate(&mut self, formula: &Formula) -> Bool<'static> {
            match formula {
                Formula::Const(value) => Bool::from_bool(self.context, *value),
                Formula::Var(name) => self.atom(name).clone(),
                Formula::Eq(var, literal) => self.atom(&eq_atom(var, literal)).clone(),
                Formula::Not(inner) => self.translate(inner).not(),
                Formula::And(parts) => {
                    let terms: Vec<Bool> = parts.iter().map(|p| self.translate(p)).collect();
                    let refs: Vec<&Bool> = terms.iter().collect();
                    Bool::and(self.context, &refs)
                }
                Formula::Or(parts) => {
                    let terms: Vec<Bool> = parts.iter().map(|p| self.translate(p)).collect();
                    let refs: Vec<&Bool> = terms.iter().collect();
                    Bool::or(self.context, &refs)
                }
            }
        }
    }
}
