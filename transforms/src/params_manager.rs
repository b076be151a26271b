//! Small query surfaces transformations consult about the rest of the run.

use lowp_dtype::DTypeSet;
use lowp_ir::Node;

use crate::config::LowPrecisionParams;

/// Reports the admissible low-precision types of activations feeding an
/// operation.
pub trait ParamsManager {
    fn precisions_on_activations(&self, node: &Node) -> DTypeSet;
}

/// Per-kind knowledge of the registered layer transformations.
pub trait LayerTransformationsManager {
    /// Whether some transformation handles the kind of `node`.
    fn is_quantized(&self, node: &Node) -> bool;

    /// Whether the handling transformation keeps the data on its integer grid.
    fn is_precision_preserved(&self, node: &Node) -> bool;
}

impl ParamsManager for LowPrecisionParams {
    fn precisions_on_activations(&self, _node: &Node) -> DTypeSet {
        self.precisions_on_activations
    }
}
