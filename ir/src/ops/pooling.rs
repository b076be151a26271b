use smallvec::smallvec;
use snafu::{OptionExt, ensure};

use super::{OPSET, args, expect_inputs, op_common, output_dims, single};
use crate::error::{InvalidAttributeSnafu, RankMismatchSnafu, Result};
use crate::node::OutputDesc;
use crate::op::{AttributeMap, EvaluatedOutputs, InferInput, InferredOutputs, OpDef, Operation, TypeInfo};
use crate::shape::{Dim, Shape, StaticShape, strides};
use crate::tensor::{Tensor, for_each_index};

/// How a partial window at the end of a spatial axis is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RoundingType {
    #[default]
    Floor,
    Ceil,
}

/// Window geometry shared by the pooling kinds.
#[derive(Debug, Clone, PartialEq)]
struct Window {
    kernel: Vec<usize>,
    strides: Vec<usize>,
    pads_begin: Vec<usize>,
    pads_end: Vec<usize>,
    rounding: RoundingType,
}

impl Window {
    fn from_attributes(op: &'static str, attributes: &AttributeMap) -> Result<Self> {
        let window = Self {
            kernel: attributes.usizes(op, "kernel")?,
            strides: attributes.usizes(op, "strides")?,
            pads_begin: attributes.usizes(op, "pads_begin")?,
            pads_end: attributes.usizes(op, "pads_end")?,
            rounding: attributes.parsed(op, "rounding_type")?,
        };
        window.validate(op)?;
        Ok(window)
    }

    fn validate(&self, op: &'static str) -> Result<()> {
        let spatial = self.kernel.len();
        let lengths = [
            ("strides", self.strides.len()),
            ("pads_begin", self.pads_begin.len()),
            ("pads_end", self.pads_end.len()),
        ];
        for (name, len) in lengths {
            ensure!(
                len == spatial,
                InvalidAttributeSnafu { op, name, reason: format!("expected {spatial} values, got {len}") }
            );
        }
        ensure!(
            self.kernel.iter().chain(&self.strides).all(|&v| v > 0),
            InvalidAttributeSnafu { op, name: "kernel", reason: "kernel and strides must be positive".to_string() }
        );
        Ok(())
    }

    fn attributes(&self) -> AttributeMap {
        let ints = |v: &[usize]| v.iter().map(|&x| x as i64).collect::<Vec<_>>();
        AttributeMap::new()
            .with("kernel", ints(&self.kernel))
            .with("strides", ints(&self.strides))
            .with("pads_begin", ints(&self.pads_begin))
            .with("pads_end", ints(&self.pads_end))
            .with("rounding_type", self.rounding.to_string())
    }

    fn infer(&self, op: &'static str, input: &OutputDesc) -> Result<Shape> {
        let spatial = self.kernel.len();
        ensure!(
            input.rank() == spatial + 2,
            RankMismatchSnafu { op, expected: format!("{}", spatial + 2), actual: input.rank() }
        );

        let mut shape: Shape = input.shape[..2].iter().cloned().collect();
        for (axis, dim) in input.shape[2..].iter().enumerate() {
            let out = match dim {
                Dim::Static(size) => Dim::Static(self.output_extent(op, axis, *size)?),
                Dim::Symbolic(name) => Dim::symbolic(format!("pool({name})")),
            };
            shape.push(out);
        }
        Ok(shape)
    }

    fn output_extent(&self, op: &'static str, axis: usize, size: usize) -> Result<usize> {
        let padded = size + self.pads_begin[axis] + self.pads_end[axis];
        let span = padded.checked_sub(self.kernel[axis]).context(InvalidAttributeSnafu {
            op,
            name: "kernel",
            reason: format!("window {} exceeds padded extent {padded}", self.kernel[axis]),
        })?;
        let stride = self.strides[axis];
        let mut out = match self.rounding {
            RoundingType::Floor => span / stride + 1,
            RoundingType::Ceil => span.div_ceil(stride) + 1,
        };
        // The last window must start inside the input or the begin padding.
        if self.rounding == RoundingType::Ceil && (out - 1) * stride >= size + self.pads_begin[axis] {
            out -= 1;
        }
        Ok(out)
    }

    /// Reduce every window of `input` with `reduce(values, kernel_volume)`.
    fn apply(&self, input: &Tensor, out_shape: &StaticShape, reduce: impl Fn(&[f64], usize) -> f64) -> Vec<f64> {
        let in_shape = input.shape();
        let in_strides = strides(in_shape);
        let volume: usize = self.kernel.iter().product();
        let mut window = Vec::with_capacity(volume);

        for_each_index(out_shape)
            .map(|out| {
                window.clear();
                for offset in for_each_index(&self.kernel) {
                    let mut flat = out[0] * in_strides[0] + out[1] * in_strides[1];
                    let mut inside = true;
                    for axis in 0..self.kernel.len() {
                        let pos = (out[axis + 2] * self.strides[axis] + offset[axis]) as isize
                            - self.pads_begin[axis] as isize;
                        if pos < 0 || pos as usize >= in_shape[axis + 2] {
                            inside = false;
                            break;
                        }
                        flat += pos as usize * in_strides[axis + 2];
                    }
                    if inside {
                        window.push(input.values()[flat]);
                    }
                }
                reduce(&window, volume)
            })
            .collect()
    }
}

macro_rules! window_accessors {
    () => {
        pub fn kernel(&self) -> &[usize] {
            &self.window.kernel
        }

        pub fn strides(&self) -> &[usize] {
            &self.window.strides
        }

        pub fn pads_begin(&self) -> &[usize] {
            &self.window.pads_begin
        }

        pub fn pads_end(&self) -> &[usize] {
            &self.window.pads_end
        }

        pub fn rounding(&self) -> RoundingType {
            self.window.rounding
        }
    };
}

/// Max pooling over the spatial axes of an `N, C, ...` input.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxPool {
    window: Window,
}

impl MaxPool {
    pub fn new(
        kernel: Vec<usize>,
        strides: Vec<usize>,
        pads_begin: Vec<usize>,
        pads_end: Vec<usize>,
        rounding: RoundingType,
    ) -> Result<Self> {
        let window = Window { kernel, strides, pads_begin, pads_end, rounding };
        window.validate(Self::TYPE_INFO.name)?;
        Ok(Self { window })
    }

    window_accessors!();
}

impl OpDef for MaxPool {
    const TYPE_INFO: TypeInfo = TypeInfo::new("MaxPool", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        Ok(Self { window: Window::from_attributes(Self::TYPE_INFO.name, attributes)? })
    }
}

impl Operation for MaxPool {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        expect_inputs(op, inputs, 1)?;
        let desc = &inputs[0].desc;
        Ok(single(OutputDesc::new(desc.dtype, self.window.infer(op, desc)?)))
    }

    fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let op = Self::TYPE_INFO.name;
        let [input] = args::<1>(op, inputs)?;
        let out_shape = output_dims(op, outputs, 0)?;
        let data =
            self.window.apply(input, &out_shape, |values, _| values.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        Ok(smallvec![Tensor::new(input.dtype(), &out_shape, data)?])
    }

    fn visit_attributes(&self) -> AttributeMap {
        self.window.attributes()
    }
}

/// Average pooling over the spatial axes of an `N, C, ...` input.
#[derive(Debug, Clone, PartialEq)]
pub struct AvgPool {
    window: Window,
    exclude_pad: bool,
}

impl AvgPool {
    pub fn new(
        kernel: Vec<usize>,
        strides: Vec<usize>,
        pads_begin: Vec<usize>,
        pads_end: Vec<usize>,
        rounding: RoundingType,
        exclude_pad: bool,
    ) -> Result<Self> {
        let window = Window { kernel, strides, pads_begin, pads_end, rounding };
        window.validate(Self::TYPE_INFO.name)?;
        Ok(Self { window, exclude_pad })
    }

    window_accessors!();

    pub fn exclude_pad(&self) -> bool {
        self.exclude_pad
    }
}

impl OpDef for AvgPool {
    const TYPE_INFO: TypeInfo = TypeInfo::new("AvgPool", OPSET);

    fn from_attributes(attributes: &AttributeMap) -> Result<Self> {
        let op = Self::TYPE_INFO.name;
        Ok(Self { window: Window::from_attributes(op, attributes)?, exclude_pad: attributes.bool(op, "exclude_pad")? })
    }
}

impl Operation for AvgPool {
    op_common!();

    fn infer(&self, inputs: &[InferInput]) -> Result<InferredOutputs> {
        let op = Self::TYPE_INFO.name;
        expect_inputs(op, inputs, 1)?;
        let desc = &inputs[0].desc;
        Ok(single(OutputDesc::new(desc.dtype, self.window.infer(op, desc)?)))
    }

    fn evaluate(&self, inputs: &[Tensor], outputs: &[OutputDesc]) -> Result<EvaluatedOutputs> {
        let op = Self::TYPE_INFO.name;
        let [input] = args::<1>(op, inputs)?;
        let out_shape = output_dims(op, outputs, 0)?;
        let exclude_pad = self.exclude_pad;
        let data = self.window.apply(input, &out_shape, |values, volume| {
            let count = if exclude_pad { values.len() } else { volume };
            if count == 0 { 0.0 } else { values.iter().sum::<f64>() / count as f64 }
        });
        let dtype = outputs.first().map_or(input.dtype(), |desc| desc.dtype);
        Ok(smallvec![Tensor::new(dtype, &out_shape, data)?])
    }

    fn visit_attributes(&self) -> AttributeMap {
        self.window.attributes().with("exclude_pad", self.exclude_pad)
    }
}

