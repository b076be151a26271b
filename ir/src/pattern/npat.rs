//! Node pattern AST.
//!
//! An [`NPat`] is a tree template matched against a graph output and its
//! producers:
//!
//! ```ignore
//! // MaxPool fed by a dequantization Multiply with a constant scale.
//! let pattern = NPat::wrap_type::<MaxPool>(vec![
//!     NPat::wrap_type::<Multiply>(vec![NPat::any_input(), NPat::wrap_type::<Constant>(vec![])]).named("mul"),
//! ]);
//! ```
//!
//! Matching is top-down and non-backtracking: an alternation commits to its
//! first matching alternative. Source lists match as a prefix of the node's
//! inputs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use lowp_dtype::{DType, DTypeSet};
use smallvec::{SmallVec, smallvec};

use crate::node::Output;
use crate::op::{OpDef, TypeInfo};
use crate::shape;

// ===== Bindings =====

/// Single binding entry: (label index, bound output).
pub type BindingEntry = (u8, Output);

/// Inline storage for the usual handful of labels.
pub type BindingStore = SmallVec<[BindingEntry; 4]>;

/// Label interning table: names to compact indices.
#[derive(Debug, Clone, Default)]
pub struct VarIntern {
    names: Vec<String>,
    indices: HashMap<String, u8>,
}

impl VarIntern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `name`, interning it first. `None` once every `u8` index is taken.
    pub fn get_or_insert(&mut self, name: &str) -> Option<u8> {
        if let Some(&idx) = self.indices.get(name) {
            return Some(idx);
        }
        let idx = u8::try_from(self.names.len()).ok()?;
        self.names.push(name.to_string());
        self.indices.insert(name.to_string(), idx);
        Some(idx)
    }

    pub fn get_index(&self, name: &str) -> Option<u8> {
        self.indices.get(name).copied()
    }

    pub fn get_name(&self, idx: u8) -> Option<&str> {
        self.names.get(idx as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub trait BindingStoreExt {
    fn get_by_index(&self, idx: u8) -> Option<&Output>;

    /// Named `set_binding` to avoid clashing with `SmallVec::insert`.
    fn set_binding(&mut self, idx: u8, output: Output);
}

impl BindingStoreExt for BindingStore {
    fn get_by_index(&self, idx: u8) -> Option<&Output> {
        self.iter().find(|(i, _)| *i == idx).map(|(_, output)| output)
    }

    fn set_binding(&mut self, idx: u8, output: Output) {
        match self.iter_mut().find(|(i, _)| *i == idx) {
            Some((_, existing)) => *existing = output,
            None => self.push((idx, output)),
        }
    }
}

// ===== Predicates =====

type PredicateFn = Arc<dyn Fn(&Output) -> bool + Send + Sync>;

/// Extra condition on a matched output, named for diagnostics.
#[derive(Clone)]
pub struct NamedPredicate {
    name: Arc<str>,
    check: PredicateFn,
}

impl NamedPredicate {
    pub fn new(name: impl AsRef<str>, check: impl Fn(&Output) -> bool + Send + Sync + 'static) -> Self {
        Self { name: Arc::from(name.as_ref()), check: Arc::new(check) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, output: &Output) -> bool {
        (self.check)(output)
    }

    /// Both predicates must hold.
    pub fn and(self, other: NamedPredicate) -> Self {
        let name = format!("{} && {}", self.name, other.name);
        Self::new(name, move |output| self.check(output) && other.check(output))
    }
}

impl fmt::Debug for NamedPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.name)
    }
}

/// The output has exactly `count` live consumers.
pub fn consumers_count(count: usize) -> NamedPredicate {
    NamedPredicate::new(format!("consumers_count({count})"), move |output| output.consumers().len() == count)
}

pub fn has_static_shape() -> NamedPredicate {
    NamedPredicate::new("has_static_shape", |output| shape::is_static(&output.shape()))
}

pub fn type_matches(dtype: DType) -> NamedPredicate {
    NamedPredicate::new(format!("type_matches({dtype})"), move |output| output.dtype() == dtype)
}

pub fn type_matches_any(dtypes: &[DType]) -> NamedPredicate {
    let set: DTypeSet = dtypes.iter().copied().collect();
    NamedPredicate::new(format!("type_matches_any({dtypes:?})"), move |output| set.contains(output.dtype()))
}

pub fn custom(name: &str, check: impl Fn(&Output) -> bool + Send + Sync + 'static) -> NamedPredicate {
    NamedPredicate::new(name, check)
}

// ===== Pattern AST =====

#[derive(Debug, Clone)]
pub enum NPat {
    /// All present constraints must hold. `None` means unconstrained.
    Match {
        kinds: Option<SmallVec<[TypeInfo; 2]>>,
        dtypes: Option<DTypeSet>,
        /// Patterns for the leading inputs, in order.
        src: Option<Vec<NPat>>,
        predicate: Option<NamedPredicate>,
        label: Option<String>,
    },
    /// First matching alternative wins.
    Any(Vec<NPat>),
}

impl NPat {
    /// Matches any output.
    pub fn any_input() -> Self {
        NPat::Match { kinds: None, dtypes: None, src: None, predicate: None, label: None }
    }

    /// Matches any output and binds it to `name`.
    pub fn label(name: impl Into<String>) -> Self {
        Self::any_input().named(name)
    }

    /// Output of a node of kind `T`. An empty `inputs` list leaves the
    /// inputs unconstrained.
    pub fn wrap_type<T: OpDef>(inputs: Vec<NPat>) -> Self {
        Self::wrap_types(&[T::TYPE_INFO], inputs)
    }

    pub fn wrap_types(kinds: &[TypeInfo], inputs: Vec<NPat>) -> Self {
        NPat::Match {
            kinds: Some(kinds.iter().copied().collect()),
            dtypes: None,
            src: (!inputs.is_empty()).then_some(inputs),
            predicate: None,
            label: None,
        }
    }

    pub fn any(alternatives: Vec<NPat>) -> Self {
        NPat::Any(alternatives)
    }

    /// Bind the matched output to `name`. On an alternation every
    /// alternative carries the label.
    pub fn named(self, name: impl Into<String>) -> Self {
        let name = name.into();
        match self {
            NPat::Match { kinds, dtypes, src, predicate, .. } => {
                NPat::Match { kinds, dtypes, src, predicate, label: Some(name) }
            }
            NPat::Any(alternatives) => NPat::Any(alternatives.into_iter().map(|alt| alt.named(name.clone())).collect()),
        }
    }

    pub fn with_dtypes(self, allowed: DTypeSet) -> Self {
        match self {
            NPat::Match { kinds, src, predicate, label, .. } => {
                NPat::Match { kinds, dtypes: Some(allowed), src, predicate, label }
            }
            NPat::Any(alternatives) => {
                NPat::Any(alternatives.into_iter().map(|alt| alt.with_dtypes(allowed)).collect())
            }
        }
    }

    /// Add a predicate; it is combined with an existing one.
    pub fn with_predicate(self, extra: NamedPredicate) -> Self {
        match self {
            NPat::Match { kinds, dtypes, src, predicate, label } => {
                let predicate = Some(match predicate {
                    Some(existing) => existing.and(extra),
                    None => extra,
                });
                NPat::Match { kinds, dtypes, src, predicate, label }
            }
            NPat::Any(alternatives) => {
                NPat::Any(alternatives.into_iter().map(|alt| alt.with_predicate(extra.clone())).collect())
            }
        }
    }

    /// Intern every label in declaration order.
    /// Intern every label. `None` when the pattern has more distinct labels
    /// than a binding index can address.
    pub fn collect_labels(&self, intern: &mut VarIntern) -> Option<()> {
        match self {
            NPat::Match { src, label, .. } => {
                if let Some(label) = label {
                    intern.get_or_insert(label)?;
                }
                for child in src.iter().flatten() {
                    child.collect_labels(intern)?;
                }
            }
            NPat::Any(alternatives) => {
                for alt in alternatives {
                    alt.collect_labels(intern)?;
                }
            }
        }
        Some(())
    }

    /// Every kind mentioned anywhere in the pattern.
    pub fn referenced_kinds(&self, out: &mut Vec<TypeInfo>) {
        match self {
            NPat::Match { kinds, src, .. } => {
                for kind in kinds.iter().flatten() {
                    if !out.contains(kind) {
                        out.push(*kind);
                    }
                }
                for child in src.iter().flatten() {
                    child.referenced_kinds(out);
                }
            }
            NPat::Any(alternatives) => alternatives.iter().for_each(|alt| alt.referenced_kinds(out)),
        }
    }

    /// Kinds the root can have, `None` if unconstrained.
    pub fn root_kinds(&self) -> Option<SmallVec<[TypeInfo; 2]>> {
        match self {
            NPat::Match { kinds, .. } => kinds.clone(),
            NPat::Any(alternatives) => {
                let mut all: SmallVec<[TypeInfo; 2]> = smallvec![];
                for alt in alternatives {
                    for kind in alt.root_kinds()? {
                        if !all.contains(&kind) {
                            all.push(kind);
                        }
                    }
                }
                Some(all)
            }
        }
    }

    // ===== Matching =====

    /// Match against `output`, returning the bindings of the first match.
    pub fn match_first(&self, output: &Output, intern: &VarIntern) -> Option<BindingStore> {
        let mut store = BindingStore::new();
        if self.match_first_internal(output, &mut store, intern) { Some(store) } else { None }
    }

    fn match_first_internal(&self, output: &Output, store: &mut BindingStore, intern: &VarIntern) -> bool {
        match self {
            NPat::Any(alternatives) => {
                for alt in alternatives {
                    let mut store_copy = store.clone();
                    if alt.match_first_internal(output, &mut store_copy, intern) {
                        *store = store_copy;
                        return true;
                    }
                }
                false
            }

            NPat::Match { kinds, dtypes, src, predicate, label } => {
                let node = output.node();
                if let Some(kinds) = kinds
                    && !kinds.contains(&node.type_info())
                {
                    return false;
                }

                if let Some(dtypes) = dtypes
                    && !dtypes.contains(output.dtype())
                {
                    return false;
                }

                if let Some(predicate) = predicate
                    && !predicate.check(output)
                {
                    return false;
                }

                if let Some(label) = label
                    && let Some(idx) = intern.get_index(label)
                {
                    match store.get_by_index(idx) {
                        Some(existing) if existing != output => return false,
                        Some(_) => {}
                        None => store.set_binding(idx, output.clone()),
                    }
                }

                let Some(patterns) = src else {
                    return true;
                };
                let inputs = node.inputs();
                if inputs.len() < patterns.len() {
                    return false;
                }
                inputs.iter().zip(patterns).all(|(input, pat)| pat.match_first_internal(input, store, intern))
            }
        }
    }
}
