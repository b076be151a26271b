//! Pattern matching over graph outputs.
//!
//! [`NPat`] describes a sub-graph template; [`Matcher`] validates it once at
//! registration (rejecting ambiguous alternations) and produces [`Match`]
//! results that map labels to the matched outputs.

pub mod matcher;
pub mod npat;

pub use matcher::{Match, Matcher};
pub use npat::{
    BindingEntry, BindingStore, BindingStoreExt, NPat, NamedPredicate, VarIntern, consumers_count, custom,
    has_static_shape, type_matches, type_matches_any,
};
