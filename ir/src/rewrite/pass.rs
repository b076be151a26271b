//! Whole-function passes and their sequencing.

use tracing::{debug, debug_span};

use crate::error::Error;
use crate::function::Function;

/// A transformation over a whole function.
pub trait FunctionPass<E = Error> {
    fn name(&self) -> &str;

    /// Returns whether the function changed.
    fn run_on_function(&self, function: &Function) -> Result<bool, E>;
}

/// Runs passes in insertion order.
pub struct PassManager<'p, E = Error> {
    passes: Vec<Box<dyn FunctionPass<E> + 'p>>,
    validate: bool,
}

impl<'p, E: From<Error>> PassManager<'p, E> {
    pub fn new() -> Self {
        Self { passes: Vec::new(), validate: true }
    }

    /// Chainable form of [`PassManager::register`].
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, pass: impl FunctionPass<E> + 'p) -> Self {
        self.register(pass);
        self
    }

    pub fn register(&mut self, pass: impl FunctionPass<E> + 'p) {
        self.passes.push(Box::new(pass));
    }

    /// Skip revalidation after changing passes.
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn run(&self, function: &Function) -> Result<bool, E> {
        let mut changed = false;
        for pass in &self.passes {
            let span = debug_span!("pass", name = pass.name());
            let _guard = span.enter();
            let pass_changed = pass.run_on_function(function)?;
            debug!(changed = pass_changed, "pass finished");
            if pass_changed && self.validate {
                function.validate_nodes_and_infer_types()?;
            }
            changed |= pass_changed;
        }
        Ok(changed)
    }
}

impl<E: From<Error>> Default for PassManager<'_, E> {
    fn default() -> Self {
        Self::new()
    }
}
