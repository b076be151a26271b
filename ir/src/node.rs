//! Mutable graph nodes.
//!
//! A node owns its producers through its input edges (`Output` holds an
//! `Arc<Node>`), while every output slot records its consumers only as weak
//! `(node, input index)` targets. A node therefore lives exactly as long as
//! an edge, a function result/parameter list, or a local handle refers to it;
//! replaced sub-graphs are freed as soon as the last handle goes away.
//!
//! Interior state sits behind a `parking_lot::RwLock`. Locks are held only for
//! the duration of a single field access and never across calls into other
//! nodes, so re-wiring two neighbours cannot deadlock.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use lowp_dtype::DType;
use parking_lot::RwLock;
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::error::{
    CycleDetectedSnafu, InputIndexOutOfRangeSnafu, InvariantViolationSnafu, OutputIndexOutOfRangeSnafu, Result,
};
use crate::op::{InferInput, OpDef, Operation, TypeInfo};
use crate::rt_info::{RtInfo, RtValue};
use crate::shape::{self, Shape};
use crate::tensor::Tensor;

static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> u64 {
    NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub type NodeRef = Arc<Node>;

/// Element type and shape of one node output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDesc {
    pub dtype: DType,
    pub shape: Shape,
}

impl OutputDesc {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn is_static(&self) -> bool {
        shape::is_static(&self.shape)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// Per-edge element type overrides.
///
/// Input overrides are what type inference (and evaluation) sees instead of
/// the producer's real type; output overrides replace the inferred type.
/// This is how mixed-precision arithmetic such as `u8 * f32 -> f32` is
/// expressed without widening the operands in the graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeRelaxation {
    pub inputs: SmallVec<[Option<DType>; 2]>,
    pub outputs: SmallVec<[Option<DType>; 1]>,
}

impl TypeRelaxation {
    pub fn new(inputs: &[Option<DType>], outputs: &[Option<DType>]) -> Self {
        Self { inputs: inputs.into(), outputs: outputs.into() }
    }

    /// Every input seen as `input`, output forced to `output`.
    pub fn uniform(input_count: usize, input: DType, output: DType) -> Self {
        Self { inputs: smallvec::smallvec![Some(input); input_count], outputs: smallvec::smallvec![Some(output)] }
    }

    pub fn input(&self, index: usize) -> Option<DType> {
        self.inputs.get(index).copied().flatten()
    }

    pub fn output(&self, index: usize) -> Option<DType> {
        self.outputs.get(index).copied().flatten()
    }

    pub fn set_output(&mut self, index: usize, dtype: DType) {
        if self.outputs.len() <= index {
            self.outputs.resize(index + 1, None);
        }
        self.outputs[index] = Some(dtype);
    }
}

// ============================================================================
// Edge endpoints
// ============================================================================

/// Output `index` of a node: the source end of an edge.
#[derive(Clone)]
pub struct Output {
    node: NodeRef,
    index: usize,
}

impl Output {
    /// Unchecked constructor; prefer [`Node::output`].
    pub fn new(node: NodeRef, index: usize) -> Self {
        Self { node, index }
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn desc(&self) -> OutputDesc {
        self.node.state.read().outputs[self.index].desc.clone()
    }

    pub fn dtype(&self) -> DType {
        self.node.state.read().outputs[self.index].desc.dtype
    }

    pub fn shape(&self) -> Shape {
        self.node.state.read().outputs[self.index].desc.shape.clone()
    }

    /// Live consumer input slots, in connection order.
    pub fn consumers(&self) -> Vec<Input> {
        self.node.state.read().outputs[self.index]
            .targets
            .iter()
            .filter_map(|(node, index)| node.upgrade().map(|node| Input { node, index: *index }))
            .collect()
    }

    /// Repoint every consumer of this output to `replacement`.
    pub fn replace(&self, replacement: &Output) -> Result<()> {
        for input in self.consumers() {
            if Arc::ptr_eq(&input.node, &replacement.node) {
                continue;
            }
            input.node.set_argument(input.index, replacement)?;
        }
        Ok(())
    }
}

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node) && self.index == other.index
    }
}

impl Eq for Output {}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node.friendly_name(), self.index)
    }
}

impl From<NodeRef> for Output {
    fn from(node: NodeRef) -> Self {
        Self { node, index: 0 }
    }
}

impl From<&NodeRef> for Output {
    fn from(node: &NodeRef) -> Self {
        Self { node: node.clone(), index: 0 }
    }
}

/// Input slot `index` of a consumer node: the target end of an edge.
#[derive(Clone)]
pub struct Input {
    node: NodeRef,
    index: usize,
}

impl Input {
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The output currently feeding this slot.
    pub fn source(&self) -> Output {
        self.node.state.read().inputs[self.index].clone()
    }

    pub fn replace_source_output(&self, output: &Output) -> Result<()> {
        self.node.set_argument(self.index, output)
    }
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.node.friendly_name(), self.index)
    }
}

// ============================================================================
// Node
// ============================================================================

struct OutputSlot {
    desc: OutputDesc,
    targets: Vec<(Weak<Node>, usize)>,
}

struct NodeState {
    inputs: SmallVec<[Output; 2]>,
    outputs: SmallVec<[OutputSlot; 1]>,
    rt_info: RtInfo,
    friendly_name: Option<String>,
    relaxation: Option<TypeRelaxation>,
}

pub struct Node {
    id: u64,
    op: Arc<dyn Operation>,
    state: RwLock<NodeState>,
}

impl Node {
    pub fn new(op: impl Operation, inputs: impl IntoIterator<Item = Output>) -> Result<NodeRef> {
        Self::from_op(Arc::new(op), inputs.into_iter().collect(), None)
    }

    /// Node whose edge types are overridden by `relaxation`.
    pub fn new_relaxed(
        op: impl Operation,
        inputs: impl IntoIterator<Item = Output>,
        relaxation: TypeRelaxation,
    ) -> Result<NodeRef> {
        Self::from_op(Arc::new(op), inputs.into_iter().collect(), Some(relaxation))
    }

    pub fn from_op(
        op: Arc<dyn Operation>,
        inputs: SmallVec<[Output; 2]>,
        relaxation: Option<TypeRelaxation>,
    ) -> Result<NodeRef> {
        for input in &inputs {
            let count = input.node.output_count();
            ensure!(
                input.index < count,
                OutputIndexOutOfRangeSnafu { node: input.node.friendly_name(), index: input.index, count }
            );
        }

        let descs = infer_outputs(op.as_ref(), &inputs, relaxation.as_ref())?;
        ensure!(
            !descs.is_empty(),
            InvariantViolationSnafu { reason: format!("{} produced no outputs", op.type_info()) }
        );

        let outputs = descs.into_iter().map(|desc| OutputSlot { desc, targets: Vec::new() }).collect();
        let node = Arc::new(Node {
            id: next_node_id(),
            op,
            state: RwLock::new(NodeState {
                inputs: inputs.clone(),
                outputs,
                rt_info: RtInfo::new(),
                friendly_name: None,
                relaxation,
            }),
        });

        for (i, input) in inputs.iter().enumerate() {
            input.node.add_target(input.index, &node, i);
        }

        Ok(node)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn op(&self) -> &Arc<dyn Operation> {
        &self.op
    }

    pub fn type_info(&self) -> TypeInfo {
        self.op.type_info()
    }

    pub fn is<T: OpDef>(&self) -> bool {
        self.op.type_info() == T::TYPE_INFO
    }

    /// Typed access to the operation attributes.
    pub fn op_as<T: Operation>(&self) -> Option<&T> {
        self.op.as_any().downcast_ref::<T>()
    }

    /// Friendly name, `<Kind>_<id>` unless set explicitly.
    pub fn friendly_name(&self) -> String {
        match &self.state.read().friendly_name {
            Some(name) => name.clone(),
            None => format!("{}_{}", self.op.type_info().name, self.id),
        }
    }

    pub fn set_friendly_name(&self, name: impl Into<String>) {
        self.state.write().friendly_name = Some(name.into());
    }

    pub fn input_count(&self) -> usize {
        self.state.read().inputs.len()
    }

    pub fn inputs(&self) -> SmallVec<[Output; 2]> {
        self.state.read().inputs.clone()
    }

    pub fn input_value(&self, index: usize) -> Result<Output> {
        let state = self.state.read();
        let count = state.inputs.len();
        state
            .inputs
            .get(index)
            .cloned()
            .context(InputIndexOutOfRangeSnafu { node: self.name_locked(&state), index, count })
    }

    pub fn input_node(&self, index: usize) -> Result<NodeRef> {
        Ok(self.input_value(index)?.node)
    }

    /// Element type an input is treated as (relaxation applied).
    pub fn input_dtype(&self, index: usize) -> Result<DType> {
        let source = self.input_value(index)?;
        let relaxed = self.state.read().relaxation.as_ref().and_then(|r| r.input(index));
        Ok(relaxed.unwrap_or_else(|| source.dtype()))
    }

    pub fn output_count(&self) -> usize {
        self.state.read().outputs.len()
    }

    pub fn output(self: &Arc<Self>, index: usize) -> Result<Output> {
        let count = self.output_count();
        ensure!(index < count, OutputIndexOutOfRangeSnafu { node: self.friendly_name(), index, count });
        Ok(Output { node: self.clone(), index })
    }

    pub fn outputs(self: &Arc<Self>) -> SmallVec<[Output; 1]> {
        (0..self.output_count()).map(|index| Output { node: self.clone(), index }).collect()
    }

    pub fn output_desc(&self, index: usize) -> Result<OutputDesc> {
        let state = self.state.read();
        let count = state.outputs.len();
        state
            .outputs
            .get(index)
            .map(|slot| slot.desc.clone())
            .context(OutputIndexOutOfRangeSnafu { node: self.name_locked(&state), index, count })
    }

    pub fn output_dtype(&self, index: usize) -> Result<DType> {
        Ok(self.output_desc(index)?.dtype)
    }

    pub fn output_shape(&self, index: usize) -> Result<Shape> {
        Ok(self.output_desc(index)?.shape)
    }

    /// Live consumers of output `index`.
    pub fn consumers(self: &Arc<Self>, index: usize) -> Result<Vec<Input>> {
        Ok(self.output(index)?.consumers())
    }

    /// Number of live consumers over all outputs.
    pub fn consumer_count(self: &Arc<Self>) -> usize {
        self.outputs().iter().map(|o| o.consumers().len()).sum()
    }

    /// Re-wire input `index` to `output`, keeping both producers' consumer
    /// lists in sync. Types are not re-derived; call [`Node::revalidate`].
    pub fn set_argument(self: &Arc<Self>, index: usize, output: &Output) -> Result<()> {
        ensure!(!Arc::ptr_eq(self, &output.node), CycleDetectedSnafu { node: self.friendly_name() });
        let count = output.node.output_count();
        ensure!(
            output.index < count,
            OutputIndexOutOfRangeSnafu { node: output.node.friendly_name(), index: output.index, count }
        );

        let previous = {
            let mut state = self.state.write();
            let count = state.inputs.len();
            ensure!(
                index < count,
                InputIndexOutOfRangeSnafu { node: self.name_locked(&state), index, count }
            );
            std::mem::replace(&mut state.inputs[index], output.clone())
        };

        previous.node.remove_target(previous.index, self, index);
        output.node.add_target(output.index, self, index);
        Ok(())
    }

    /// Re-derive output descriptors from the current inputs.
    pub fn revalidate(&self) -> Result<()> {
        let (inputs, relaxation) = {
            let state = self.state.read();
            (state.inputs.clone(), state.relaxation.clone())
        };
        let descs = infer_outputs(self.op.as_ref(), &inputs, relaxation.as_ref())?;

        let mut state = self.state.write();
        ensure!(
            descs.len() == state.outputs.len(),
            InvariantViolationSnafu {
                reason: format!(
                    "{} changed its output count from {} to {}",
                    self.op.type_info(),
                    state.outputs.len(),
                    descs.len()
                ),
            }
        );
        for (slot, desc) in state.outputs.iter_mut().zip(descs) {
            slot.desc = desc;
        }
        Ok(())
    }

    /// Same operation and relaxation on different inputs. Name and runtime
    /// info are not carried over.
    pub fn clone_with_new_inputs(&self, inputs: impl IntoIterator<Item = Output>) -> Result<NodeRef> {
        let relaxation = self.relaxation();
        Self::from_op(self.op.clone(), inputs.into_iter().collect(), relaxation)
    }

    pub fn relaxation(&self) -> Option<TypeRelaxation> {
        self.state.read().relaxation.clone()
    }

    pub fn is_type_relaxed(&self) -> bool {
        self.state.read().relaxation.is_some()
    }

    /// Replace the type relaxation and re-derive outputs.
    pub fn set_relaxation(&self, relaxation: Option<TypeRelaxation>) -> Result<()> {
        self.state.write().relaxation = relaxation;
        self.revalidate()
    }

    /// Force the element type of output `index`.
    pub fn set_output_type(&self, index: usize, dtype: DType) -> Result<()> {
        let mut relaxation = self.relaxation().unwrap_or_default();
        relaxation.set_output(index, dtype);
        self.set_relaxation(Some(relaxation))
    }

    pub fn rt_info(&self) -> RtInfo {
        self.state.read().rt_info.clone()
    }

    pub fn rt_value(&self, key: &str) -> Option<RtValue> {
        self.state.read().rt_info.get(key).cloned()
    }

    pub fn set_rt_info(&self, rt_info: RtInfo) {
        self.state.write().rt_info = rt_info;
    }

    pub fn insert_rt_value(&self, key: impl Into<String>, value: impl Into<RtValue>) {
        self.state.write().rt_info.insert(key.into(), value.into());
    }

    pub fn remove_rt_value(&self, key: &str) -> Option<RtValue> {
        self.state.write().rt_info.remove(key)
    }

    /// Value of a constant node.
    pub fn constant_value(&self) -> Option<Arc<Tensor>> {
        self.op_as::<crate::ops::Constant>().map(|c| c.value().clone())
    }

    /// Evaluate this node on concrete input values, honouring relaxation.
    pub fn evaluate(&self, inputs: &[Tensor]) -> Result<SmallVec<[Tensor; 1]>> {
        let (relaxation, descs) = {
            let state = self.state.read();
            let descs: SmallVec<[OutputDesc; 1]> = state.outputs.iter().map(|slot| slot.desc.clone()).collect();
            (state.relaxation.clone(), descs)
        };
        let inputs: SmallVec<[Tensor; 2]> = inputs
            .iter()
            .enumerate()
            .map(|(i, t)| match relaxation.as_ref().and_then(|r| r.input(i)) {
                Some(dtype) => t.cast(dtype),
                None => t.clone(),
            })
            .collect();
        let outputs = self.op.evaluate(&inputs, &descs)?;
        Ok(outputs
            .into_iter()
            .zip(&descs)
            .map(|(t, desc)| if t.dtype() == desc.dtype { t } else { t.cast(desc.dtype) })
            .collect())
    }

    fn name_locked(&self, state: &NodeState) -> String {
        match &state.friendly_name {
            Some(name) => name.clone(),
            None => format!("{}_{}", self.op.type_info().name, self.id),
        }
    }

    fn add_target(&self, output: usize, consumer: &NodeRef, input: usize) {
        let mut state = self.state.write();
        if let Some(slot) = state.outputs.get_mut(output) {
            slot.targets.retain(|(node, _)| node.strong_count() > 0);
            slot.targets.push((Arc::downgrade(consumer), input));
        }
    }

    fn remove_target(&self, output: usize, consumer: &NodeRef, input: usize) {
        let mut state = self.state.write();
        if let Some(slot) = state.outputs.get_mut(output) {
            let consumer = Arc::downgrade(consumer);
            slot.targets
                .retain(|(node, index)| node.strong_count() > 0 && !(node.ptr_eq(&consumer) && *index == input));
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.op.type_info())
            .field("name", &self.friendly_name())
            .finish()
    }
}

/// Derive output descriptors of `op` applied to `inputs`.
fn infer_outputs(
    op: &dyn Operation,
    inputs: &[Output],
    relaxation: Option<&TypeRelaxation>,
) -> Result<SmallVec<[OutputDesc; 1]>> {
    let args: SmallVec<[InferInput; 2]> = inputs
        .iter()
        .enumerate()
        .map(|(i, output)| {
            let mut desc = output.desc();
            if let Some(dtype) = relaxation.and_then(|r| r.input(i)) {
                desc.dtype = dtype;
            }
            InferInput { desc, value: output.node.constant_value() }
        })
        .collect();

    let mut outputs = op.infer(&args)?;
    if let Some(relaxation) = relaxation {
        for (i, desc) in outputs.iter_mut().enumerate() {
            if let Some(dtype) = relaxation.output(i) {
                desc.dtype = dtype;
            }
        }
    }
    Ok(outputs)
}

/// Hash/Eq wrapper keyed by the stable node id.
#[derive(Clone)]
pub struct NodeKey(pub NodeRef);

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey(id={})", self.0.id)
    }
}

impl PartialEq for NodeKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for NodeKey {}

impl Hash for NodeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}
