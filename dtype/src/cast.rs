use super::*;

impl DType {
    /// Direct promotion targets. Walking the edges transitively yields every
    /// type a value of `self` may be widened to.
    const fn widens_to(self) -> &'static [Self] {
        use DType::*;
        match self {
            Bool => &[Int4, UInt4],
            Int4 => &[Int8],
            UInt4 => &[Int8, UInt8],
            Int8 => &[Int16],
            UInt8 => &[Int16, UInt16],
            Int16 => &[Int32],
            UInt16 => &[Int32, UInt32],
            Int32 => &[Int64],
            UInt32 => &[Int64, UInt64],
            Int64 | UInt64 => &[Float16, BFloat16],
            Float16 | BFloat16 => &[Float32],
            Float32 => &[Float64],
            Float64 | Dynamic => &[],
        }
    }

    fn promotions(self) -> DTypeSet {
        let mut reached = DTypeSet::only(self);
        for &next in self.widens_to() {
            reached |= next.promotions();
        }
        reached
    }

    /// Significand width including the implicit bit; zero for non-floats.
    const fn significand_bits(&self) -> usize {
        match self {
            Self::Float16 => 11,
            Self::BFloat16 => 8,
            Self::Float32 => 24,
            Self::Float64 => 53,
            _ => 0,
        }
    }

    /// Whether every value of `self` is exactly representable in `to`.
    pub fn can_safe_cast(self, to: Self) -> bool {
        if self == to || self.is_bool() {
            return true;
        }
        if !self.is_static() || !to.is_static() {
            return false;
        }
        match (self.is_float(), to.is_float()) {
            (false, false) => to.min_value() <= self.min_value() && to.max_value() >= self.max_value(),
            (false, true) => {
                let magnitude_bits = self.bitwidth() - usize::from(self.is_signed());
                magnitude_bits <= to.significand_bits()
            }
            (true, true) => self.bitwidth() < to.bitwidth(),
            (true, false) => false,
        }
    }

    /// Most specific type every input promotes to.
    ///
    /// `None` for an empty slice or when `Dynamic` is present.
    pub fn least_upper_dtype(dtypes: &[Self]) -> Option<Self> {
        if dtypes.iter().any(|dtype| !dtype.is_static()) {
            return None;
        }
        let common = dtypes.iter().map(|dtype| dtype.promotions()).reduce(|acc, set| acc & set)?;
        // Discriminant order puts narrower types first.
        common.iter().min()
    }
}
