use indexmap::IndexSet;
use std::fmt;
use thiserror::Error;

//
// Public Interface
//

/// Propositional formula over `CONFIG_*` options and non-Boolean
/// equality atoms such as `BITS=64`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Formula {
    Const(bool),
    Var(String),
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Eq(String, String),
}

#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("unbalanced parentheses in SMT-LIB input")]
    Unbalanced,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unsupported operator '{0}'")]
    UnsupportedOp(String),

    #[error("malformed term: {0}")]
    Malformed(String),
}

impl Formula {
    /// Conjunction that collapses the degenerate cases.
    pub fn conjoin(mut formulas: Vec<Formula>) -> Formula {
        match formulas.len() {
            0 => Formula::Const(true),
            1 => formulas.remove(0),
            _ => Formula::And(formulas),
        }
    }

    pub fn negate(self) -> Formula {
        Formula::Not(Box::new(self))
    }

    /// Collects the atom names of this formula in first-occurrence
    /// order. An equality collapses to the atom `var=literal`.
    pub fn collect_atoms(&self, out: &mut IndexSet<String>) {
        match self {
            Formula::Const(_) => {}
            Formula::Var(name) => {
                out.insert(name.clone());
            }
            Formula::Not(inner) => inner.collect_atoms(out),
            Formula::And(parts) | Formula::Or(parts) => {
                for part in parts {
                    part.collect_atoms(out);
                }
            }
            Formula::Eq(var, literal) => {
                out.insert(eq_atom(var, literal));
            }
        }
    }
}

/// Atom name under which an equality is solved.
pub fn eq_atom(var: &str, literal: &str) -> String {
    format!("{}={}", var, literal)
}

/// Parses an SMT-LIB 2 script and returns the asserted formulas.
///
/// Declarations, options and other commands are skipped; a bare term
/// without a command head (the short form used by formula caches) is
/// accepted as a single assertion.
pub fn parse_script(input: &str) -> Result<Vec<Formula>, FormulaError> {
    let tokens = tokenize(input);
    let mut cursor = Cursor::new(&tokens);
    let mut formulas = Vec::new();

    while !cursor.at_end() {
        let sexpr = cursor.next_sexpr()?;
        match command_head(&sexpr) {
            Some("assert") => {
                let args = sexpr_args(&sexpr);
                if args.len() != 1 {
                    return Err(FormulaError::Malformed(
                        "assert takes exactly one term".to_string(),
                    ));
                }
                formulas.push(term(&args[0])?);
            }
            Some(
                "declare-fun" | "declare-const" | "set-option" | "set-logic" | "set-info"
                | "check-sat" | "get-model" | "push" | "pop" | "exit",
            ) => {}
            _ => formulas.push(term(&sexpr)?),
        }
    }

    Ok(formulas)
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Formula::Const(true) => write!(f, "true"),
            Formula::Const(false) => write!(f, "false"),
            Formula::Var(name) => write!(f, "{}", name),
            Formula::Not(inner) => write!(f, "(not {})", inner),
            Formula::And(parts) => write_nary(f, "and", parts, true),
            Formula::Or(parts) => write_nary(f, "or", parts, false),
            Formula::Eq(var, literal) => write!(f, "(= {} {})", var, literal),
        }
    }
}

//
// Private Implementation
//

#[derive(Debug, PartialEq)]
enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

fn write_nary(
    f: &mut fmt::Formatter,
    op: &str,
    parts: &[Formula],
    empty_value: bool,
) -> fmt::Result {
    if parts.is_empty() {
        return write!(f, "{}", if empty_value { "true" } else { "false" });
    }
    write!(f, "({}", op)?;
    for part in parts {
        write!(f, " {}", part)?;
    }
    write!(f, ")")
}

fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => tokens.push(c.to_string()),
            ';' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '|' => {
                let mut atom = String::new();
                for c in chars.by_ref() {
                    if c == '|' {
                        break;
                    }
                    atom.push(c);
                }
                tokens.push(atom);
            }
            '"' => {
                let mut literal = String::from("\"");
                for c in chars.by_ref() {
                    literal.push(c);
                    if c == '"' {
                        break;
                    }
                }
                tokens.push(literal);
            }
            c if c.is_whitespace() => {}
            c => {
                let mut atom = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' || next == ';' {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                tokens.push(atom);
            }
        }
    }

    tokens
}

struct Cursor<'a> {
    tokens: &'a [String],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [String]) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn next_sexpr(&mut self) -> Result<SExpr, FormulaError> {
        let token = self
            .tokens
            .get(self.position)
            .ok_or(FormulaError::Unbalanced)?;
        self.position += 1;

        match token.as_str() {
            "(" => {
                let mut items = Vec::new();
                loop {
                    match self.tokens.get(self.position) {
                        Some(t) if t == ")" => {
                            self.position += 1;
                            return Ok(SExpr::List(items));
                        }
                        Some(_) => items.push(self.next_sexpr()?),
                        None => return Err(FormulaError::Unbalanced),
                    }
                }
            }
            ")" => Err(FormulaError::UnexpectedToken(")".to_string())),
            atom => Ok(SExpr::Atom(atom.to_string())),
        }
    }
}

fn command_head(sexpr: &SExpr) -> Option<&str> {
    match sexpr {
        SExpr::List(items) => match items.first() {
            Some(SExpr::Atom(head)) => Some(head.as_str()),
            _ => None,
        },
        SExpr::Atom(_) => None,
    }
}

fn sexpr_args(sexpr: &SExpr) -> &[SExpr] {
    match sexpr {
        SExpr::List(items) => &items[1..],
        SExpr::Atom(_) => &[],
    }
}

fn term(sexpr: &SExpr) -> Result<Formula, FormulaError> {
    match sexpr {
        SExpr::Atom(atom) => match atom.as_str() {
            "true" => Ok(Formula::Const(true)),
            "false" => Ok(Formula::Const(false)),
            name => Ok(Formula::Var(name.to_string())),
        },
        SExpr::List(items) => {
            let head = match items.first() {
                Some(SExpr::Atom(head)) => head.as_str(),
                Some(SExpr::List(_)) => {
                    return Err(FormulaError::Malformed(
                        "term head must be an operator".to_string(),
                    ))
                }
                None => return Err(FormulaError::Malformed("empty term".to_string())),
            };
            let args = &items[1..];

            match head {
                "not" => {
                    if args.len() != 1 {
                        return Err(FormulaError::Malformed(
                            "not takes exactly one argument".to_string(),
                        ));
                    }
                    Ok(term(&args[0])?.negate())
                }
                "and" => Ok(Formula::And(terms(args)?)),
                "or" => Ok(Formula::Or(terms(args)?)),
                "=>" => {
                    if args.len() < 2 {
                        return Err(FormulaError::Malformed(
                            "=> takes at least two arguments".to_string(),
                        ));
                    }
                    // right-associative chain: (=> a b c) is a -> (b -> c)
                    let mut parts = terms(args)?;
                    let mut result = parts.pop().expect("at least two arguments");
                    while let Some(antecedent) = parts.pop() {
                        result = Formula::Or(vec![antecedent.negate(), result]);
                    }
                    Ok(result)
                }
                "xor" => {
                    if args.len() != 2 {
                        return Err(FormulaError::Malformed(
                            "xor takes exactly two arguments".to_string(),
                        ));
                    }
                    let lhs = term(&args[0])?;
                    let rhs = term(&args[1])?;
                    Ok(Formula::Or(vec![
                        Formula::And(vec![lhs.clone(), rhs.clone().negate()]),
                        Formula::And(vec![lhs.negate(), rhs]),
                    ]))
                }
                "=" => {
                    if args.len() != 2 {
                        return Err(FormulaError::Malformed(
                            "= takes exactly two arguments".to_string(),
                        ));
                    }
                    match (&args[0], &args[1]) {
                        (SExpr::Atom(var), SExpr::Atom(literal)) => Ok(Formula::Eq(
                            var.clone(),
                            literal.trim_matches('"').to_string(),
                        )),
                        _ => Err(FormulaError::Malformed(
                            "= arguments must be atoms".to_string(),
                        )),
                    }
                }
                other => Err(FormulaError::UnsupportedOp(other.to_string())),
            }
        }
    }
}

fn terms(args: &[SExpr]) -> Result<Vec<Formula>, FormulaError> {
    args.iter().map(term).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Formula {
        Formula::Var(name.to_string())
    }

    #[test]
    fn parses_bare_term() {
        let formulas = parse_script("(and CONFIG_A (not CONFIG_B))").unwrap();

        assert_eq!(
            formulas,
            vec![Formula::And(vec![var("CONFIG_A"), var("CONFIG_B").negate()])]
        );
    }

    #[test]
    fn parses_script_with_declarations() {
        let script = "\
            (set-option :produce-models true)\n\
            (declare-fun CONFIG_A () Bool)\n\
            (declare-fun CONFIG_B () Bool)\n\
            ; inclusion condition\n\
            (assert (or CONFIG_A CONFIG_B))\n\
            (assert (not CONFIG_A))\n\
            (check-sat)\n";

        let formulas = parse_script(script).unwrap();

        assert_eq!(
            formulas,
            vec![
                Formula::Or(vec![var("CONFIG_A"), var("CONFIG_B")]),
                var("CONFIG_A").negate(),
            ]
        );
    }

    #[test]
    fn parses_implication_as_disjunction() {
        let formulas = parse_script("(assert (=> CONFIG_A CONFIG_B))").unwrap();

        assert_eq!(
            formulas,
            vec![Formula::Or(vec![var("CONFIG_A").negate(), var("CONFIG_B")])]
        );
    }

    #[test]
    fn parses_equality_into_atom() {
        let formulas = parse_script("(assert (= BITS 32))").unwrap();

        assert_eq!(
            formulas,
            vec![Formula::Eq("BITS".to_string(), "32".to_string())]
        );

        let mut atoms = IndexSet::new();
        formulas[0].collect_atoms(&mut atoms);
        assert!(atoms.contains("BITS=32"));
    }

    #[test]
    fn parses_quoted_symbols_and_strings() {
        let formulas = parse_script("(assert (= |CONFIG_ARCH| \"um\"))").unwrap();

        assert_eq!(
            formulas,
            vec![Formula::Eq("CONFIG_ARCH".to_string(), "um".to_string())]
        );
    }

    #[test]
    fn rejects_unbalanced_input() {
        assert!(matches!(
            parse_script("(assert (and CONFIG_A"),
            Err(FormulaError::Unbalanced)
        ));
    }

    #[test]
    fn rejects_unsupported_operator() {
        assert!(matches!(
            parse_script("(assert (bvadd x y))"),
            Err(FormulaError::UnsupportedOp(op)) if op == "bvadd"
        ));
    }

    #[test]
    fn collects_atoms_in_first_occurrence_order() {
        let formulas =
            parse_script("(assert (and CONFIG_B (or CONFIG_A CONFIG_B) (= BITS 64)))").unwrap();

        let mut atoms = IndexSet::new();
        formulas[0].collect_atoms(&mut atoms);

        let collected: Vec<&str> = atoms.iter().map(String::as_str).collect();
        assert_eq!(collected, vec!["CONFIG_B", "CONFIG_A", "BITS=64"]);
    }

    #[test]
    fn displays_in_smt_syntax() {
        let formula = Formula::And(vec![
            var("CONFIG_B"),
            var("CONFIG_A").negate(),
            Formula::Eq("BITS".to_string(), "64".to_string()),
        ]);

        assert_eq!(
            formula.to_string(),
            "(and CONFIG_B (not CONFIG_A) (= BITS 64))"
        );
    }

    #[test]
    fn empty_conjunction_displays_as_true() {
        assert_eq!(Formula::And(Vec::new()).to_string(), "true");
        assert_eq!(Formula::conjoin(Vec::new()), Formula::Const(true));
    }
}
