//! Graph rewriting: matcher-driven in-place rewrites and whole-function passes.

pub mod config;
pub mod engine;
pub mod pass;

pub use config::{RewriteConfig, RewriteMode};
pub use engine::{GraphRewrite, MatcherPass, RewriteCallback};
pub use pass::{FunctionPass, PassManager};
