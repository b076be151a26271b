//! A function: ordered results and parameters plus everything between them.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tracing::{debug, trace};

use crate::error::{
    FunctionInputCountSnafu, InvariantViolationSnafu, Result, UnexpectedNodeKindSnafu, UnlistedParameterSnafu,
};
use crate::node::NodeRef;
use crate::op::OpDef;
use crate::ops::{Parameter, ResultOp};
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    results: Vec<NodeRef>,
    parameters: Vec<NodeRef>,
}

impl Function {
    /// Build a function. Every parameter reachable from `results` must be
    /// listed in `parameters`.
    pub fn new(name: impl Into<String>, results: Vec<NodeRef>, parameters: Vec<NodeRef>) -> Result<Self> {
        for node in &results {
            ensure!(node.is::<ResultOp>(), UnexpectedNodeKindSnafu { node: node.friendly_name(), expected: "Result" });
        }
        for node in &parameters {
            ensure!(
                node.is::<Parameter>(),
                UnexpectedNodeKindSnafu { node: node.friendly_name(), expected: "Parameter" }
            );
        }

        let function = Self { name: name.into(), results, parameters };
        let listed: HashSet<u64> = function.parameters.iter().map(|p| p.id()).collect();
        if let Some(unlisted) =
            function.ordered_ops().into_iter().find(|node| node.is::<Parameter>() && !listed.contains(&node.id()))
        {
            return UnlistedParameterSnafu { name: unlisted.friendly_name() }.fail();
        }
        Ok(function)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn results(&self) -> &[NodeRef] {
        &self.results
    }

    pub fn parameters(&self) -> &[NodeRef] {
        &self.parameters
    }

    /// Every live node in topological order, producers first.
    ///
    /// Listed parameters come first in list order (even when unused), then a
    /// depth-first post-order from each result, visiting inputs in order.
    pub fn ordered_ops(&self) -> Vec<NodeRef> {
        let mut visited: HashSet<u64> = HashSet::new();
        let mut order = Vec::new();

        for root in self.parameters.iter().chain(&self.results) {
            let mut stack: Vec<(NodeRef, bool)> = vec![(root.clone(), false)];
            while let Some((node, expanded)) = stack.pop() {
                if expanded {
                    order.push(node);
                    continue;
                }
                if !visited.insert(node.id()) {
                    continue;
                }
                let inputs = node.inputs();
                stack.push((node, true));
                for input in inputs.iter().rev() {
                    if !visited.contains(&input.node().id()) {
                        stack.push((input.node().clone(), false));
                    }
                }
            }
        }

        order
    }

    /// Whether `node` is reachable from a result or is a listed parameter.
    pub fn contains(&self, node: &NodeRef) -> bool {
        self.ordered_ops().iter().any(|n| n.id() == node.id())
    }

    pub fn ops_count(&self) -> usize {
        self.ordered_ops().len()
    }

    /// Number of live nodes of kind `T`.
    pub fn count_ops_of<T: OpDef>(&self) -> usize {
        self.ordered_ops().iter().filter(|node| node.is::<T>()).count()
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeRef> {
        self.ordered_ops().into_iter().find(|node| node.friendly_name() == name)
    }

    /// Re-derive every output descriptor in topological order.
    pub fn validate_nodes_and_infer_types(&self) -> Result<()> {
        let ops = self.ordered_ops();
        for node in &ops {
            node.revalidate()?;
        }
        debug!(function = %self.name, nodes = ops.len(), "validated");
        Ok(())
    }

    /// Reference interpreter: run the function on concrete parameter values.
    ///
    /// Parameter values are cast to the declared element type.
    pub fn evaluate(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        ensure!(
            inputs.len() == self.parameters.len(),
            FunctionInputCountSnafu { expected: self.parameters.len(), actual: inputs.len() }
        );
        let parameter_index: HashMap<u64, usize> =
            self.parameters.iter().enumerate().map(|(i, node)| (node.id(), i)).collect();

        let mut values: HashMap<u64, SmallVec<[Tensor; 1]>> = HashMap::new();
        for node in self.ordered_ops() {
            let outputs = if let Some(&index) = parameter_index.get(&node.id()) {
                SmallVec::from_elem(inputs[index].cast(node.output_dtype(0)?), 1)
            } else {
                let args = node
                    .inputs()
                    .iter()
                    .map(|input| {
                        values.get(&input.node().id()).and_then(|outs| outs.get(input.index())).cloned().context(
                            InvariantViolationSnafu { reason: format!("{input:?} evaluated out of order") },
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                node.evaluate(&args)?
            };
            trace!(node = %node.friendly_name(), outputs = outputs.len(), "evaluated");
            values.insert(node.id(), outputs);
        }

        self.results
            .iter()
            .map(|result| {
                values
                    .get(&result.id())
                    .and_then(|outs| outs.first())
                    .cloned()
                    .context(InvariantViolationSnafu { reason: format!("result {} was not evaluated", result.friendly_name()) })
            })
            .collect()
    }
}
