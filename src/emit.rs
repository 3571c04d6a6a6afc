use crate::arch::is_arch_defining;
use crate::compose::{is_config_option, Literal};
use crate::engine::EngineError;
use crate::extract::{KconfigExtract, OptionType};
use crate::solver::Model;
use indexmap::IndexSet;
use log::warn;
use std::fs;
use std::io::Write;
use std::path::Path;

//
// Public Interface
//

pub struct EmitContext<'a> {
    pub extract: Option<&'a KconfigExtract>,
    pub user_specified: &'a IndexSet<String>,
    pub modules: bool,
}

/// Renders a satisfying assignment in kernel `.config` syntax, in the
/// model's own iteration order. Options outside the visible set are
/// filtered; types drive the assigned-value syntax.
pub fn write_config<W: Write>(
    model: &Model,
    context: &EmitContext,
    mut out: W,
) -> std::io::Result<()> {
    for (name, value) in model.iter() {
        if !is_config_option(name) {
            continue;
        }
        if let Some(visible) = context.extract.and_then(|e| e.visible.as_ref()) {
            if !visible.contains(name) {
                continue;
            }
        }

        if *value {
            emit_enabled(name, context, &mut out)?;
        } else {
            emit_disabled(name, context, &mut out)?;
        }
    }

    Ok(())
}

/// Extracts the option literals of a reference `.config`: `=y` and
/// `=m` lines force on, `# ... is not set` lines force off, everything
/// else is ignored.
pub fn parse_dot_config(path: &Path) -> Result<Vec<Literal>, EngineError> {
    let content = fs::read_to_string(path)?;
    let mut literals = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if let Some(name) = line
            .strip_prefix("# ")
            .and_then(|rest| rest.strip_suffix(" is not set"))
        {
            if is_config_option(name) {
                literals.push(Literal::negative(name));
            }
        } else if let Some((name, value)) = line.split_once('=') {
            if is_config_option(name) && (value == "y" || value == "m") {
                literals.push(Literal::positive(name));
            }
        }
    }

    Ok(literals)
}

//
// Private Implementation
//

fn emit_enabled<W: Write>(
    name: &str,
    context: &EmitContext,
    out: &mut W,
) -> std::io::Result<()> {
    let extract = match context.extract {
        None => return writeln!(out, "{}=y", name),
        Some(extract) => extract,
    };

    // Kconfig itself fills non-Boolean defaults the user did not pin
    if extract.has_def_nonbool.contains(name) && !context.user_specified.contains(name) {
        return Ok(());
    }

    match extract.types.get(name) {
        Some(OptionType::Bool) => writeln!(out, "{}=y", name),
        Some(OptionType::Tristate) => {
            writeln!(out, "{}={}", name, if context.modules { "m" } else { "y" })
        }
        Some(OptionType::String) => writeln!(out, "{}=", name),
        Some(OptionType::Number) => writeln!(out, "{}=0", name),
        Some(OptionType::Hex) => writeln!(out, "{}=0x0", name),
        None => {
            if is_arch_defining(name) {
                writeln!(out, "{}=y", name)
            } else {
                warn!("{} is not declared by this arch's Kconfig, skipping", name);
                Ok(())
            }
        }
    }
}

fn emit_disabled<W: Write>(
    name: &str,
    context: &EmitContext,
    out: &mut W,
) -> std::io::Result<()> {
    let known = match context.extract {
        None => true,
        Some(extract) => extract.types.contains_key(name) || is_arch_defining(name),
    };

    if known {
        writeln!(out, "# {} is not set", name)
    } else {
        warn!("{} is not declared by this arch's Kconfig, skipping", name);
        Ok(())
    }
}
