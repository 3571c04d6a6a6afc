use log::warn;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

//
// Public Interface
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    Tristate,
    String,
    Number,
    Hex,
}

/// Type and visibility information extracted from a Kconfig
/// specification, as produced by the external extractor.
#[derive(Clone, Debug, Default)]
pub struct KconfigExtract {
    pub types: HashMap<String, OptionType>,
    pub visible: Option<HashSet<String>>,
    pub has_def_nonbool: HashSet<String>,
}

impl KconfigExtract {
    pub fn parse_file(path: &Path) -> io::Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Parses the line-oriented extract format. Each non-empty line is
    /// whitespace-split and dispatched on its first token.
    pub fn parse(input: &str) -> Self {
        let mut extract = Self {
            visible: Some(HashSet::new()),
            ..Self::default()
        };

        for line in input.lines() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                [] => {}
                ["config", name, type_token, ..] => match parse_type(type_token) {
                    Some(option_type) => {
                        extract.types.insert((*name).to_string(), option_type);
                    }
                    None => warn!("unknown type '{}' for option {}", type_token, name),
                },
                ["prompt", name, ..] => {
                    if let Some(visible) = extract.visible.as_mut() {
                        visible.insert((*name).to_string());
                    }
                }
                ["def_nonbool", name, ..] => {
                    extract.has_def_nonbool.insert((*name).to_string());
                }
                [verb, ..] => warn!("skipping unknown extract line verb '{}'", verb),
            }
        }

        extract
    }

    /// Disables visibility filtering entirely.
    pub fn allow_non_visibles(&mut self) {
        self.visible = None;
    }
}

//
// Private Implementation
//

fn parse_type(token: &str) -> Option<OptionType> {
    match token {
        "bool" | "boolean" => Some(OptionType::Bool),
        "tristate" => Some(OptionType::Tristate),
        "string" => Some(OptionType::String),
        "number" | "int" => Some(OptionType::Number),
        "hex" => Some(OptionType::Hex),
        _ => None,
    }
}
