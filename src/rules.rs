//! The rule lexicon: atomic rule tokens and their decorations.
//!
//! A rule set is a disjunction of conjunctions: the outer list ORs, each
//! inner clause ANDs. An atom inside a clause is a plain string with
//! positional decorations:
//!
//! - `[x]`: optional; an unsatisfied atom degrades to a sequence break
//!   instead of failing the clause
//! - `{x}`: check-only; the clause can contribute at most `Inspect`
//! - `x:N`: satisfied only when the provider count reaches `N` (default 1)
//! - `@path`: cross-reference to another location or `location/section`
//! - `$name|arg|...`: scripted predicate invocation
//!
//! Stripping order is brackets, then braces, then the `:count` suffix.
//! Whitespace is significant and treated as part of the code.

use serde::Deserialize;

use crate::error::{Error, Result};

/// A single parsed rule atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// The bare token with all decorations stripped. May still carry an `@`
    /// or `$` prefix identifying a cross-reference or scripted predicate.
    pub text: String,
    /// `[...]`: satisfiable by a sequence break
    pub optional: bool,
    /// `{...}`: contributes at most the inspect level
    pub check_only: bool,
    /// `:N` suffix; the provider count required to satisfy the atom
    pub count: i32,
}

impl Atom {
    /// Parse an atom, stripping decorations in the documented order.
    pub fn parse(raw: &str) -> Self {
        let mut s = raw;
        let mut optional = false;
        let mut check_only = false;
        if s.len() > 1 && s.starts_with('[') && s.ends_with(']') {
            optional = true;
            s = &s[1..s.len() - 1];
        }
        if s.len() > 1 && s.starts_with('{') {
            check_only = true;
            s = &s[1..];
        }
        if check_only && s.ends_with('}') {
            s = &s[..s.len() - 1];
        }
        let mut count = 1;
        let mut text = s;
        if let Some(pos) = s.find(':') {
            count = s[pos + 1..].parse().unwrap_or(0);
            text = &s[..pos];
        }
        Atom {
            text: text.to_owned(),
            optional,
            check_only,
            count,
        }
    }

    /// Validate an atom against the normalized grammar.
    ///
    /// A `{` must be closed by `}` within the same atom; the asymmetric
    /// forms accepted by some legacy packs are rejected at load time.
    pub fn validate(raw: &str) -> Result<()> {
        let mut s = raw;
        if s.len() > 1 && s.starts_with('[') && s.ends_with(']') {
            s = &s[1..s.len() - 1];
        }
        let opens = s.starts_with('{');
        let closes = s.len() >= if opens { 2 } else { 1 } && s.ends_with('}');
        if opens && !closes {
            return Err(Error::rule(raw, "unterminated '{'"));
        }
        if closes && !opens {
            return Err(Error::rule(raw, "'}' without an opening '{'"));
        }
        Ok(())
    }

    /// Whether the atom is a cross-reference to a location or section.
    pub fn is_reference(&self) -> bool {
        self.text.starts_with('@')
    }
}

/// One OR-clause of a rule set as it appears in a declaration blob: either
/// a list of atoms or a single comma-joined string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClauseDescriptor {
    Atoms(Vec<String>),
    Joined(String),
}

impl ClauseDescriptor {
    fn into_atoms(self) -> Vec<String> {
        match self {
            Self::Atoms(atoms) => atoms,
            Self::Joined(joined) => joined.split(',').map(str::to_owned).collect(),
        }
    }
}

/// Normalize declared rule clauses into the evaluator's representation,
/// validating every atom.
pub(crate) fn parse_rule_sets(clauses: Vec<ClauseDescriptor>) -> Result<Vec<Vec<String>>> {
    let mut rules = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let atoms = clause.into_atoms();
        for atom in &atoms {
            Atom::validate(atom)?;
        }
        rules.push(atoms);
    }
    Ok(rules)
}
