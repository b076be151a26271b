//! Mutable computation-graph IR for the lowp graph optimizer.
//!
//! Graphs are DAGs of reference-counted [`Node`]s. Every node owns its
//! producers through its input edges and sees its consumers only weakly, so
//! a sub-graph is freed as soon as nothing reaches it any more.
//!
//! # Module Organization
//!
//! - [`node`] - nodes, edge endpoints and type relaxation
//! - [`op`] - the [`Operation`] trait, kind identity and attributes
//! - [`ops`] - the built-in operation set
//! - [`registry`] - kind to factory mapping
//! - [`function`] - results, parameters and the reference interpreter
//! - [`graph`] - graph surgery helpers
//! - [`pattern`] - node patterns and matching
//! - [`rewrite`] - matcher-driven rewriting and pass sequencing
//! - [`tensor`], [`shape`], [`rt_info`] - values, shapes and annotations

pub mod error;
pub mod function;
pub mod graph;
pub mod node;
pub mod op;
pub mod ops;
pub mod pattern;
pub mod prelude;
pub mod registry;
pub mod rewrite;
pub mod rt_info;
pub mod shape;
pub mod tensor;

#[cfg(test)]
pub mod test;

pub use error::{Error, Result};
pub use function::Function;
pub use graph::{replace_node, replace_output_update_name};
pub use node::{Input, Node, NodeKey, NodeRef, Output, OutputDesc, TypeRelaxation};
pub use op::{AttrValue, AttributeMap, OpDef, Operation, TypeInfo};
pub use pattern::{Match, Matcher, NPat};
pub use registry::OpRegistry;
pub use rewrite::{FunctionPass, GraphRewrite, PassManager, RewriteConfig, RewriteMode};
pub use rt_info::{RtInfo, RtValue};
pub use shape::{Dim, Shape};
pub use tensor::Tensor;

pub use lowp_dtype::{DType, DTypeSet};
