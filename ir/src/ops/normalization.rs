use smallvec::smallvec;
use snafu::ensure;

use super::{OPSET, args, expect_inputs, op_common, output_dims, single};
use crate::error::{AxisOutOfRangeSnafu, InvalidAttributeSnafu, Result, UnexpectedDTypeSnafu};
use crate::node::OutputDesc;
use crate::op::{AttributeMap, EvaluatedOutputs, InferInput, InferredOutputs, OpDef, Operation, TypeInfo};
use crate::tensor::{Tensor, for_each_index};

/// Where epsilon enters the variance normalisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MvnEpsMode {
    #[default]
    InsideSqrt,
    OutsideSqrt,
}

/// Mean-variance normalisation over `reduction_axes`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mvn {
    reduction_axes: Vec<usize>,
    normalize_variance: bool,
    eps: f64,
    eps_mode: MvnEpsMode,
}

impl Mvn {
    pub fn new(reduction_axes: Vec<usize>, normalize_variance: bool, eps: f64, eps_mode: MvnEpsMode) -> Result<Self> {
        ensure!(
            !reduction_axes.is_empty(),
            InvalidAttributeSnafu {
                op: Self::TYPE_INFO.name,
                name: "reduction_axes",
                reason: "at least one axis is required".to_string(),
            }
        );
        let mut reduction_axes = reduction_axes;
        reduction_axes.sort_unstable();
        reduction_axes.dedup();
        Ok(Self { reduction_axes, normalize_variance, eps, eps_mode })
    }

    pub fn reduction_axes(&self) -> &[usize] {
        &self.reduction_axes
    }

    pub fn normalize_variance(&self) -> bool {
        self.normalize_variance
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn eps_mode(&self) -> MvnEpsMode {
        self.eps_mode
    }
}

impl OpDef for Mvn {
    const TYPE_INFO: TypeInfo = TypeInfo::new("MVN", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        let op = Self::TYPE_INFO.name;
        Self::new(
            attributes.usizes(op, "reduction_axes")?,
            attributes.bool(op, "normalize_variance")?,
            attributes.float(op, "eps")?,
            attributes.parsed(op, "eps_mode")?,
        )
    }
}

impl Operation for Mvn {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        expect_inputs(op, inputs, 1)?;
        let desc = &inputs[0].desc;
        ensure!(
            desc.dtype.is_real() || !desc.dtype.is_static(),
            UnexpectedDTypeSnafu { op, dtype: desc.dtype, expected: "a floating point type" }
        );
        if let Some(&axis) = self.reduction_axes.iter().find(|&&axis| axis >= desc.rank()) {
            return AxisOutOfRangeSnafu { op, axis: axis as i64, rank: desc.rank() }.fail();
        }
        Ok(single(desc.clone()))
    }

    fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let op = Self::TYPE_INFO.name;
        let [input] = args::<1>(op, inputs)?;
        let shape = output_dims(op, outputs, 0)?;

        // Group id = flat index over the kept axes.
        let kept: Vec<usize> = (0..shape.len()).filter(|axis| !self.reduction_axes.contains(axis)).collect();
        let groups: Vec<usize> = for_each_index(&shape)
            .map(|index| kept.iter().fold(0, |acc, &axis| acc * shape[axis] + index[axis]))
            .collect();
        let group_count: usize = kept.iter().map(|&axis| shape[axis]).product();

        let mut sums = vec![0.0; group_count];
        let mut counts = vec![0usize; group_count];
        for (&group, &value) in groups.iter().zip(input.values()) {
            sums[group] += value;
            counts[group] += 1;
        }
        let means: Vec<f64> = sums.iter().zip(&counts).map(|(s, &c)| s / c.max(1) as f64).collect();

        let mut variances = vec![0.0; group_count];
        for (&group, &value) in groups.iter().zip(input.values()) {
            variances[group] += (value - means[group]).powi(2);
        }
        for (variance, &count) in variances.iter_mut().zip(&counts) {
            *variance /= count.max(1) as f64;
        }

        let data = groups
            .iter()
            .zip(input.values())
            .map(|(&group, &value)| {
                let centered = value - means[group];
                if !self.normalize_variance {
                    return centered;
                }
                let denominator = match self.eps_mode {
                    MvnEpsMode::InsideSqrt => (variances[group] + self.eps).sqrt(),
                    MvnEpsMode::OutsideSqrt => variances[group].sqrt() + self.eps,
                };
                centered / denominator
            })
            .collect();
        let dtype = outputs.first().map_or(input.dtype(), |desc| desc.dtype);
        Ok(smallvec![Tensor::new(dtype, &shape, data)?])
    }

    fn visit_attributes(&self) -> AttributeMap {
        AttributeMap::new()
            .with("reduction_axes", self.reduction_axes.iter().map(|&a| a as i64).collect::<Vec<_>>())
            .with("normalize_variance", self.normalize_variance)
            .with("eps", self.eps)
            .with("eps_mode", self.eps_mode.to_string())
    }
}
