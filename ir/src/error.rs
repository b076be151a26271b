use lowp_dtype::DType;
use snafu::Snafu;

use crate::op::TypeInfo;
use crate::shape::Shape;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    // =========================================================================
    // Type and shape inference
    // =========================================================================
    /// Element types of an elementwise operation disagree.
    #[snafu(display("dtype mismatch in {op}: {lhs} vs {rhs}"))]
    DTypeMismatch { op: &'static str, lhs: DType, rhs: DType },

    /// Operation does not accept this element type.
    #[snafu(display("{op} does not accept {dtype} inputs: expected {expected}"))]
    UnexpectedDType { op: &'static str, dtype: DType, expected: &'static str },

    #[snafu(display("cannot broadcast shapes {lhs:?} and {rhs:?}"))]
    BroadcastShapeMismatch { lhs: Box<Shape>, rhs: Box<Shape> },

    #[snafu(display("{op} expects {expected} inputs, got {actual}"))]
    InputCountMismatch { op: &'static str, expected: usize, actual: usize },

    #[snafu(display("{op} expects rank {expected}, got {actual}"))]
    RankMismatch { op: &'static str, expected: String, actual: usize },

    #[snafu(display("axis {axis} is out of range for rank {rank} in {op}"))]
    AxisOutOfRange { op: &'static str, axis: i64, rank: usize },

    #[snafu(display("invalid permutation {permutation:?} for rank {rank}"))]
    InvalidPermutation { permutation: Vec<i64>, rank: usize },

    #[snafu(display("reshape size mismatch: input size {input_size} != output size {output_size}"))]
    ReshapeSizeMismatch { input_size: usize, output_size: usize },

    #[snafu(display("{op} requires input {index} to be a constant"))]
    NonConstantInput { op: &'static str, index: usize },

    #[snafu(display("{op} requires static shapes"))]
    DynamicShape { op: &'static str },

    #[snafu(display("split lengths {lengths:?} do not cover dimension of size {dim}"))]
    SplitLengthMismatch { lengths: Vec<i64>, dim: usize },

    // =========================================================================
    // Attributes and tensors
    // =========================================================================
    #[snafu(display("{op} is missing attribute '{name}'"))]
    MissingAttribute { op: &'static str, name: &'static str },

    #[snafu(display("invalid attribute '{name}' of {op}: {reason}"))]
    InvalidAttribute { op: &'static str, name: &'static str, reason: String },

    #[snafu(display("tensor of shape {shape:?} needs {expected} elements, got {actual}"))]
    TensorSizeMismatch { shape: Vec<usize>, expected: usize, actual: usize },

    // =========================================================================
    // Graph structure
    // =========================================================================
    /// Input slot does not exist. Callers never get a silent repair.
    #[snafu(display("node {node} has {count} inputs, index {index} is out of range"))]
    InputIndexOutOfRange { node: String, index: usize, count: usize },

    #[snafu(display("node {node} has {count} outputs, index {index} is out of range"))]
    OutputIndexOutOfRange { node: String, index: usize, count: usize },

    #[snafu(display("connecting {node} to its own output would create a cycle"))]
    CycleDetected { node: String },

    #[snafu(display("cannot replace {target} ({target_outputs} outputs) with {replacement} ({replacement_outputs} outputs)"))]
    ReplacementArity { target: String, target_outputs: usize, replacement: String, replacement_outputs: usize },

    #[snafu(display("parameter {name} is reachable from the results but not listed"))]
    UnlistedParameter { name: String },

    #[snafu(display("{node} is not a {expected} node"))]
    UnexpectedNodeKind { node: String, expected: &'static str },

    #[snafu(display("function expects {expected} inputs, got {actual}"))]
    FunctionInputCount { expected: usize, actual: usize },

    #[snafu(display("{op} cannot be evaluated"))]
    EvaluationUnsupported { op: &'static str },

    /// A transformation broke a structural contract.
    #[snafu(display("invariant violation: {reason}"))]
    InvariantViolation { reason: String },

    // =========================================================================
    // Registry, patterns and rewriting
    // =========================================================================
    #[snafu(display("operation kind {kind} is already registered"))]
    DuplicateOpKind { kind: TypeInfo },

    #[snafu(display("operation kind {kind} is not registered"))]
    UnknownOpKind { kind: TypeInfo },

    /// Two alternatives of one alternation can match the same node.
    #[snafu(display("pattern {matcher} is ambiguous at {position}: alternatives overlap on {kinds}"))]
    AmbiguousPattern { matcher: String, position: String, kinds: String },

    #[snafu(display("pattern {matcher} has more than 256 distinct labels"))]
    TooManyLabels { matcher: String },

    #[snafu(display("pattern {matcher} references unregistered kind {kind}"))]
    UnregisteredPatternKind { matcher: String, kind: TypeInfo },

    #[snafu(display("rewrite did not settle after {visits} node visits"))]
    RewriteLimitExceeded { visits: usize },
}
