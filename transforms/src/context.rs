use std::collections::BTreeSet;

use lowp_ir::{Function, NodeRef};

use crate::params_manager::ParamsManager;

/// State of one optimization run, handed to every transformation callback.
pub struct TransformationContext<'a> {
    function: &'a Function,
    params_manager: &'a dyn ParamsManager,
    /// Friendly names of fake-quantize nodes whose output is stored in low
    /// precision.
    pub quantized_fake_quantize_names: BTreeSet<String>,
}

impl<'a> TransformationContext<'a> {
    pub fn new(function: &'a Function, params_manager: &'a dyn ParamsManager) -> Self {
        Self { function, params_manager, quantized_fake_quantize_names: BTreeSet::new() }
    }

    pub fn function(&self) -> &'a Function {
        self.function
    }

    pub fn params_manager(&self) -> &'a dyn ParamsManager {
        self.params_manager
    }

    pub fn mark_quantized(&mut self, fake_quantize: &NodeRef) {
        self.quantized_fake_quantize_names.insert(fake_quantize.friendly_name());
    }

    pub fn is_quantized_fake_quantize(&self, fake_quantize: &NodeRef) -> bool {
        self.quantized_fake_quantize_names.contains(&fake_quantize.friendly_name())
    }
}

impl std::fmt::Debug for TransformationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformationContext")
            .field("function", &self.function.name())
            .field("quantized_fake_quantize_names", &self.quantized_fake_quantize_names)
            .finish()
    }
}
