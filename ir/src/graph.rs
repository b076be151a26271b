//! Graph surgery helpers.

use snafu::ensure;
use tracing::trace;

use crate::error::{ReplacementAritySnafu, Result};
use crate::node::{NodeRef, Output};
use crate::ops::{Parameter, ResultOp};

/// Repoint every consumer of every output of `target` to the matching output
/// of `replacement`. `target` stays intact and is freed once unreferenced.
pub fn replace_node(target: &NodeRef, replacement: &NodeRef) -> Result<()> {
    let (target_outputs, replacement_outputs) = (target.output_count(), replacement.output_count());
    ensure!(
        target_outputs == replacement_outputs,
        ReplacementAritySnafu {
            target: target.friendly_name(),
            target_outputs,
            replacement: replacement.friendly_name(),
            replacement_outputs,
        }
    );
    trace!(target = %target.friendly_name(), replacement = %replacement.friendly_name(), "replace node");
    for (from, to) in target.outputs().iter().zip(replacement.outputs().iter()) {
        from.replace(to)?;
    }
    Ok(())
}

/// Replace `output` by `replacement` while keeping the visible name of a
/// function output: when `output` feeds a `Result`, the replacement's node
/// inherits the producer's friendly name.
///
/// Returns `false` (and changes nothing) when that would rename a parameter.
pub fn replace_output_update_name(output: &Output, replacement: &Output) -> Result<bool> {
    let feeds_result = output.consumers().iter().any(|input| input.node().is::<ResultOp>());
    if feeds_result {
        if replacement.node().is::<Parameter>() {
            return Ok(false);
        }
        replacement.node().set_friendly_name(output.node().friendly_name());
    }
    output.replace(replacement)?;
    Ok(true)
}
