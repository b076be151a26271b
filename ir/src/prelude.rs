//! Common imports for building and rewriting graphs.
//!
//! ```rust,ignore
//! use lowp_ir::prelude::*;
//! ```

pub use crate::function::Function;
pub use crate::graph::replace_node;
pub use crate::node::{Node, NodeRef, Output, TypeRelaxation};
pub use crate::op::{OpDef, Operation};
pub use crate::ops::*;
pub use crate::pattern::{Match, Matcher, NPat};
pub use crate::registry::OpRegistry;
pub use crate::rewrite::{GraphRewrite, RewriteConfig, RewriteMode};
pub use crate::shape::{Dim, Shape, static_shape};
pub use crate::tensor::Tensor;

pub use lowp_dtype::{DType, DTypeSet};
