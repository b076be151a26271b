//! Operation kind registry.
//!
//! Maps a stable [`TypeInfo`] to a factory that builds the operation from its
//! attributes. A registry is an ordinary value: build it once (usually with
//! [`OpRegistry::opset1`]) and pass it by reference to whatever needs to
//! create nodes or validate patterns.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tracing::trace;

use crate::error::{DuplicateOpKindSnafu, Result, UnknownOpKindSnafu};
use crate::node::{Node, NodeRef, Output};
use crate::op::{AttributeMap, OpDef, Operation, TypeInfo};
use crate::ops;

pub type OpFactory = Arc<dyn Fn(&AttributeMap) -> Result<Arc<dyn Operation>> + Send + Sync>;

/// Factory building `T` from its attributes.
pub fn factory_of<T: OpDef>() -> OpFactory {
    Arc::new(|attributes: &AttributeMap| -> Result<Arc<dyn Operation>> {
        let op: Arc<dyn Operation> = Arc::new(T::from_attributes(attributes)?);
        Ok(op)
    })
}

#[derive(Clone, Default)]
pub struct OpRegistry {
    factories: HashMap<TypeInfo, OpFactory>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in kind.
    pub fn opset1() -> Self {
        let mut registry = Self::new();
        registry.insert_op::<ops::Parameter>();
        registry.insert_op::<ops::Constant>();
        registry.insert_op::<ops::ResultOp>();
        registry.insert_op::<ops::Convert>();
        registry.insert_op::<ops::Add>();
        registry.insert_op::<ops::Subtract>();
        registry.insert_op::<ops::Multiply>();
        registry.insert_op::<ops::Clamp>();
        registry.insert_op::<ops::MaxPool>();
        registry.insert_op::<ops::AvgPool>();
        registry.insert_op::<ops::Mvn>();
        registry.insert_op::<ops::Reshape>();
        registry.insert_op::<ops::Transpose>();
        registry.insert_op::<ops::StridedSlice>();
        registry.insert_op::<ops::VariadicSplit>();
        registry.insert_op::<ops::FakeQuantize>();
        registry
    }

    fn insert_op<T: OpDef>(&mut self) {
        self.factories.insert(T::TYPE_INFO, factory_of::<T>());
    }

    /// Add a kind. Registering a kind twice is an error.
    pub fn register(&mut self, kind: TypeInfo, factory: OpFactory) -> Result<()> {
        ensure!(!self.factories.contains_key(&kind), DuplicateOpKindSnafu { kind });
        trace!(%kind, "registering operation kind");
        self.factories.insert(kind, factory);
        Ok(())
    }

    pub fn register_op<T: OpDef>(&mut self) -> Result<()> {
        self.register(T::TYPE_INFO, factory_of::<T>())
    }

    pub fn contains(&self, kind: &TypeInfo) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn create(&self, kind: &TypeInfo, attributes: &AttributeMap) -> Result<Arc<dyn Operation>> {
        let factory = self.factories.get(kind).context(UnknownOpKindSnafu { kind: *kind })?;
        factory(attributes)
    }

    /// Create an operation and wire it to `inputs`.
    pub fn make_node(
        &self,
        kind: &TypeInfo,
        attributes: &AttributeMap,
        inputs: impl IntoIterator<Item = Output>,
    ) -> Result<NodeRef> {
        let op = self.create(kind, attributes)?;
        Node::from_op(op, inputs.into_iter().collect::<SmallVec<_>>(), None)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<TypeInfo> {
        let mut kinds: Vec<TypeInfo> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpRegistry").field("kinds", &self.kinds()).finish()
    }
}
