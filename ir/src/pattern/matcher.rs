//! Named, validated patterns and their match results.

use std::sync::Arc;

use snafu::OptionExt;
use tracing::trace;

use super::npat::{BindingStore, BindingStoreExt, NPat, VarIntern};
use crate::error::{AmbiguousPatternSnafu, Result, TooManyLabelsSnafu};
use crate::node::{NodeRef, Output};
use crate::op::TypeInfo;

/// A pattern checked for ambiguity, ready to be matched.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    pattern: NPat,
    intern: Arc<VarIntern>,
}

impl Matcher {
    /// Fails with `AmbiguousPattern` when two alternatives of an alternation
    /// can accept the same node kind and element type, and with
    /// `TooManyLabels` past 256 distinct labels.
    pub fn new(name: impl Into<String>, pattern: NPat) -> Result<Self> {
        let name = name.into();
        check_ambiguity(&name, &pattern, "root")?;
        let mut intern = VarIntern::new();
        pattern.collect_labels(&mut intern).context(TooManyLabelsSnafu { matcher: name.clone() })?;
        Ok(Self { name, pattern, intern: Arc::new(intern) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &NPat {
        &self.pattern
    }

    pub fn referenced_kinds(&self) -> Vec<TypeInfo> {
        let mut kinds = Vec::new();
        self.pattern.referenced_kinds(&mut kinds);
        kinds
    }

    pub fn match_output(&self, output: &Output) -> Option<Match> {
        let bindings = self.pattern.match_first(output, &self.intern)?;
        trace!(matcher = %self.name, root = ?output, bindings = bindings.len(), "pattern matched");
        Some(Match { root: output.clone(), bindings, intern: self.intern.clone() })
    }

    /// Match rooted at every output of `node`, first output first.
    pub fn match_node(&self, node: &NodeRef) -> Option<Match> {
        if let Some(kinds) = self.pattern.root_kinds()
            && !kinds.contains(&node.type_info())
        {
            return None;
        }
        node.outputs().iter().find_map(|output| self.match_output(output))
    }
}

/// Bindings of one successful match.
#[derive(Debug, Clone)]
pub struct Match {
    root: Output,
    bindings: BindingStore,
    intern: Arc<VarIntern>,
}

impl Match {
    pub fn root(&self) -> &Output {
        &self.root
    }

    pub fn root_node(&self) -> &NodeRef {
        self.root.node()
    }

    /// Output bound to `label`.
    pub fn get(&self, label: &str) -> Option<&Output> {
        self.bindings.get_by_index(self.intern.get_index(label)?)
    }

    /// Node producing the output bound to `label`.
    pub fn node(&self, label: &str) -> Option<&NodeRef> {
        self.get(label).map(Output::node)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().filter_map(|(idx, _)| self.intern.get_name(*idx))
    }
}

// ===== Ambiguity check =====

/// Flattened head constraints of one alternative.
struct Head<'a> {
    kinds: Option<&'a [TypeInfo]>,
    dtypes: Option<lowp_dtype::DTypeSet>,
}

fn heads<'a>(pattern: &'a NPat, out: &mut Vec<Head<'a>>) {
    match pattern {
        NPat::Match { kinds, dtypes, .. } => out.push(Head { kinds: kinds.as_deref(), dtypes: *dtypes }),
        NPat::Any(alternatives) => alternatives.iter().for_each(|alt| heads(alt, out)),
    }
}

/// Shared kinds of two heads, `None` if they cannot accept the same node.
fn overlap(a: &Head<'_>, b: &Head<'_>) -> Option<String> {
    if let (Some(x), Some(y)) = (a.dtypes, b.dtypes)
        && x.is_disjoint(y)
    {
        return None;
    }
    match (a.kinds, b.kinds) {
        (None, None) => Some("*".to_string()),
        (Some(kinds), None) | (None, Some(kinds)) => {
            Some(kinds.iter().map(ToString::to_string).collect::<Vec<_>>().join("|"))
        }
        (Some(x), Some(y)) => {
            let shared: Vec<String> = x.iter().filter(|k| y.contains(k)).map(ToString::to_string).collect();
            (!shared.is_empty()).then(|| shared.join("|"))
        }
    }
}

fn check_ambiguity(matcher: &str, pattern: &NPat, position: &str) -> Result<()> {
    match pattern {
        NPat::Match { src, .. } => {
            for (i, child) in src.iter().flatten().enumerate() {
                check_ambiguity(matcher, child, &format!("{position}/input[{i}]"))?;
            }
        }
        NPat::Any(alternatives) => {
            let groups: Vec<Vec<Head<'_>>> = alternatives
                .iter()
                .map(|alt| {
                    let mut out = Vec::new();
                    heads(alt, &mut out);
                    out
                })
                .collect();
            for (i, lhs) in groups.iter().enumerate() {
                for (j, rhs) in groups.iter().enumerate().skip(i + 1) {
                    if let Some(kinds) = lhs.iter().flat_map(|a| rhs.iter().filter_map(move |b| overlap(a, b))).next() {
                        return AmbiguousPatternSnafu { matcher, position: format!("{position}/any[{i},{j}]"), kinds }
                            .fail();
                    }
                }
            }
            for (i, alt) in alternatives.iter().enumerate() {
                check_ambiguity(matcher, alt, &format!("{position}/alt[{i}]"))?;
            }
        }
    }
    Ok(())
}
