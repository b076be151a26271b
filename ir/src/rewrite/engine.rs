//! Pattern-driven in-place graph rewriting.
//!
//! # Algorithm
//!
//! One sweep visits the nodes of [`Function::ordered_ops`] in order. The
//! queue holds weak handles, so nodes released by an earlier rewrite are
//! dropped instead of kept alive, and nodes that are still allocated but no
//! longer reachable from a result are skipped.
//!
//! For every visited node the passes are tried in registration order. The
//! first callback that returns `true` ends the node's turn; the node list is
//! then recomputed and nodes created by the callback are appended to the
//! queue. A callback error aborts the run.
//!
//! # Context
//!
//! Per-run state is passed at run time rather than captured in closures:
//!
//! ```ignore
//! let mut rewrite = GraphRewrite::<Counter>::new("count", &registry);
//! rewrite.add_matcher(matcher, |counter, m| {
//!     counter.hits += 1;
//!     Ok(false)
//! })?;
//! rewrite.run(&function, &mut Counter::default())?;
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};

use snafu::ensure;
use tracing::{debug, trace, warn};

use super::config::RewriteConfig;
use super::pass::FunctionPass;
use crate::error::{Error, RewriteLimitExceededSnafu, UnregisteredPatternKindSnafu};
use crate::function::Function;
use crate::node::Node;
use crate::pattern::{Match, Matcher};
use crate::registry::OpRegistry;

/// Rewrite callback: returns `Ok(true)` when it changed the graph.
pub type RewriteCallback<'r, C, E> = Box<dyn Fn(&mut C, &Match) -> Result<bool, E> + 'r>;

/// A matcher paired with the callback run on its matches.
pub struct MatcherPass<'r, C, E = Error> {
    matcher: Matcher,
    callback: RewriteCallback<'r, C, E>,
}

impl<C, E> MatcherPass<'_, C, E> {
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }
}

/// Ordered matcher passes applied over a function.
pub struct GraphRewrite<'r, C, E = Error> {
    name: String,
    registry: &'r OpRegistry,
    passes: Vec<MatcherPass<'r, C, E>>,
    config: RewriteConfig,
}

impl<'r, C, E: From<Error>> GraphRewrite<'r, C, E> {
    pub fn new(name: impl Into<String>, registry: &'r OpRegistry) -> Self {
        Self { name: name.into(), registry, passes: Vec::new(), config: RewriteConfig::default() }
    }

    pub fn with_config(mut self, config: RewriteConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Register a matcher. Every kind the pattern mentions must be known to
    /// the registry.
    pub fn add_matcher(
        &mut self,
        matcher: Matcher,
        callback: impl Fn(&mut C, &Match) -> Result<bool, E> + 'r,
    ) -> Result<(), E> {
        for kind in matcher.referenced_kinds() {
            ensure!(
                self.registry.contains(&kind),
                UnregisteredPatternKindSnafu { matcher: matcher.name(), kind }
            );
        }
        trace!(rewrite = %self.name, matcher = matcher.name(), "matcher registered");
        self.passes.push(MatcherPass { matcher, callback: Box::new(callback) });
        Ok(())
    }

    pub fn passes(&self) -> &[MatcherPass<'r, C, E>] {
        &self.passes
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Apply the passes to `function`. Returns whether anything changed.
    #[tracing::instrument(skip_all, fields(rewrite = %self.name, function = function.name()))]
    pub fn run(&self, function: &Function, ctx: &mut C) -> Result<bool, E> {
        let mut changed_any = false;
        let mut visits = 0usize;

        for sweep in 0..self.config.max_sweeps() {
            let mut changed = false;
            let ops = function.ordered_ops();
            let mut seen: HashSet<u64> = ops.iter().map(|node| node.id()).collect();
            let mut live = seen.clone();
            let mut queue: VecDeque<Weak<Node>> = ops.iter().map(Arc::downgrade).collect();
            drop(ops);

            while let Some(handle) = queue.pop_front() {
                let Some(node) = handle.upgrade() else {
                    continue;
                };
                if !live.contains(&node.id()) {
                    trace!(node = %node.friendly_name(), "skipping detached node");
                    continue;
                }

                visits += 1;
                ensure!(visits <= self.config.max_visits, RewriteLimitExceededSnafu { visits });

                for pass in &self.passes {
                    let Some(found) = pass.matcher.match_node(&node) else {
                        continue;
                    };
                    if !(pass.callback)(ctx, &found)? {
                        continue;
                    }
                    drop(found);
                    debug!(matcher = pass.matcher.name(), node = %node.friendly_name(), sweep, "rewrite applied");
                    changed = true;

                    let ops = function.ordered_ops();
                    if self.config.revalidate {
                        for op in &ops {
                            op.revalidate()?;
                        }
                    }
                    live = ops.iter().map(|node| node.id()).collect();
                    for op in &ops {
                        if seen.insert(op.id()) {
                            queue.push_back(Arc::downgrade(op));
                        }
                    }
                    break;
                }
            }

            if !changed {
                break;
            }
            changed_any = true;
            if self.config.revalidate {
                function.validate_nodes_and_infer_types()?;
            }
            let limit = self.config.max_sweeps();
            if limit > 1 && sweep + 1 == limit {
                warn!(rewrite = %self.name, sweeps = limit, "sweep limit reached before a fixed point");
            }
        }

        Ok(changed_any)
    }
}

impl<E: From<Error>> FunctionPass<E> for GraphRewrite<'_, (), E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_on_function(&self, function: &Function) -> Result<bool, E> {
        self.run(function, &mut ())
    }
}
