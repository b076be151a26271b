//! The operation interface every node kind implements.
//!
//! Nodes own their operation as `Arc<dyn Operation>`. Dispatch goes through
//! the stable [`TypeInfo`] rather than Rust type identity, so kinds defined in
//! other crates participate in patterns and registries the same way the
//! built-in opset does.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lowp_dtype::DType;
use smallvec::SmallVec;
use snafu::OptionExt;

use crate::error::{InvalidAttributeSnafu, MissingAttributeSnafu, Result};
use crate::node::OutputDesc;
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Stable identity of an operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{name}-{version}")]
pub struct TypeInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl TypeInfo {
    pub const fn new(name: &'static str, version: &'static str) -> Self {
        Self { name, version }
    }
}

/// Input description handed to type inference.
#[derive(Debug, Clone)]
pub struct InferInput {
    pub desc: OutputDesc,
    /// Value of the producer when it is a constant.
    pub value: Option<Arc<Tensor>>,
}

pub type InferredOutputs = SmallVec<[OutputDesc; 1]>;

pub type EvaluatedOutputs = SmallVec<[Tensor; 1]>;

pub trait Operation: fmt::Debug + Send + Sync + 'static {
    fn type_info(&self) -> TypeInfo;

    /// Derive output descriptors from input descriptors.
    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs>;

    /// Compute outputs from constant inputs. `outputs` are the inferred
    /// descriptors of this node.
    fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs>;

    /// Attributes in registry form.
    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new()
    }

    fn as_any(&self) -> &dyn Any;
}

/// Statically known operation kinds that can be built from attributes.
pub trait OpDef: Operation + Sized {
    const TYPE_INFO: TypeInfo;

    fn from_attributes(attributes: &AttributeMap) -> Result<Self>;
}

// ============================================================================
// Attributes
// ============================================================================

#[derive(Debug, Clone, PartialEq, derive_more::From)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Str(String),
    DType(DType),
    Shape(Shape),
    Tensor(Arc<Tensor>),
}

/// Named attributes of one operation instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    values: BTreeMap<&'static str, AttrValue>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<AttrValue>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn insert(&mut self, name: &'static str, value: impl Into<AttrValue>) {
        self.values.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &AttrValue)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    fn require(&self, op: &'static str, name: &'static str) -> Result<&AttrValue> {
        self.values.get(name).context(MissingAttributeSnafu { op, name })
    }

    fn mismatch<T>(op: &'static str, name: &'static str, expected: &str, found: &AttrValue) -> Result<T> {
        InvalidAttributeSnafu { op, name, reason: format!("expected {expected}, found {found:?}") }.fail()
    }

    pub fn bool(&self, op: &'static str, name: &'static str) -> Result<bool> {
        match self.require(op, name)? {
            AttrValue::Bool(v) => Ok(*v),
            other => Self::mismatch(op, name, "bool", other),
        }
    }

    pub fn int(&self, op: &'static str, name: &'static str) -> Result<i64> {
        match self.require(op, name)? {
            AttrValue::Int(v) => Ok(*v),
            other => Self::mismatch(op, name, "int", other),
        }
    }

    pub fn float(&self, op: &'static str, name: &'static str) -> Result<f64> {
        match self.require(op, name)? {
            AttrValue::Float(v) => Ok(*v),
            AttrValue::Int(v) => Ok(*v as f64),
            other => Self::mismatch(op, name, "float", other),
        }
    }

    pub fn ints(&self, op: &'static str, name: &'static str) -> Result<Vec<i64>> {
        match self.require(op, name)? {
            AttrValue::Ints(v) => Ok(v.clone()),
            other => Self::mismatch(op, name, "int list", other),
        }
    }

    /// Non-negative integer list (kernel sizes, strides, axes).
    pub fn usizes(&self, op: &'static str, name: &'static str) -> Result<Vec<usize>> {
        self.ints(op, name)?
            .into_iter()
            .map(|v| {
                usize::try_from(v)
                    .ok()
                    .context(InvalidAttributeSnafu { op, name, reason: format!("negative value {v}") })
            })
            .collect()
    }

    pub fn string(&self, op: &'static str, name: &'static str) -> Result<String> {
        match self.require(op, name)? {
            AttrValue::Str(v) => Ok(v.clone()),
            other => Self::mismatch(op, name, "string", other),
        }
    }

    pub fn dtype(&self, op: &'static str, name: &'static str) -> Result<DType> {
        match self.require(op, name)? {
            AttrValue::DType(v) => Ok(*v),
            other => Self::mismatch(op, name, "element type", other),
        }
    }

    pub fn shape(&self, op: &'static str, name: &'static str) -> Result<Shape> {
        match self.require(op, name)? {
            AttrValue::Shape(v) => Ok(v.clone()),
            other => Self::mismatch(op, name, "shape", other),
        }
    }

    pub fn tensor(&self, op: &'static str, name: &'static str) -> Result<Arc<Tensor>> {
        match self.require(op, name)? {
            AttrValue::Tensor(v) => Ok(v.clone()),
            other => Self::mismatch(op, name, "tensor", other),
        }
    }

    /// Parse a string attribute into an enum via `FromStr`.
    pub fn parsed<T: std::str::FromStr>(&self, op: &'static str, name: &'static str) -> Result<T> {
        let raw = self.string(op, name)?;
        raw.parse().ok().context(InvalidAttributeSnafu { op, name, reason: format!("unknown value '{raw}'") })
    }
}
