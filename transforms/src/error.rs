use lowp_dtype::DType;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Ir { source: lowp_ir::Error },

    #[snafu(display("{transformation}: unexpected element type {dtype} on {node}"))]
    UnexpectedElementType { transformation: &'static str, node: String, dtype: DType },

    /// The chain handed to a propagation helper does not feed the operation.
    #[snafu(display("dequantization ending at {chain} is not an input of {op}"))]
    DetachedDequantization { op: String, chain: String },

    /// Re-applying a constant would lose range or precision.
    #[snafu(display("constant {node} of type {from} cannot be narrowed to {to}"))]
    ConstantNarrowing { node: String, from: DType, to: DType },

    #[snafu(display("constant {node} does not hold a single repeated value"))]
    NotScalarLike { node: String },

    #[snafu(display("input {index} of {node} is not a constant"))]
    NonConstantOperand { node: String, index: usize },
}
