//! Runtime info: free-form per-node annotations that transformations carry
//! along when they replace nodes.

use std::collections::{BTreeMap, BTreeSet};

use crate::node::NodeRef;

/// Well-known runtime info keys.
pub mod keys {
    /// Set on nodes whose output keeps the input's quantization grid.
    pub const PRECISION_PRESERVED: &str = "PRECISION_PRESERVED";
    /// Marks nodes that belong to a dequantization chain.
    pub const DEQUANTIZATION: &str = "DEQUANTIZATION";
    /// Names of the original nodes a node was fused from.
    pub const FUSED_NAMES: &str = "FUSED_NAMES";
}

#[derive(Debug, Clone, PartialEq, derive_more::From)]
pub enum RtValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Names(BTreeSet<String>),
}

impl From<&str> for RtValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

pub type RtInfo = BTreeMap<String, RtValue>;

/// Overwrite the runtime info of `to` with the one of `from`.
pub fn copy_runtime_info(from: &NodeRef, to: &NodeRef) {
    to.set_rt_info(from.rt_info());
}

/// Merge the runtime info of several sources into `to`.
///
/// A key present on exactly one source is copied. A key present on several
/// sources survives only when every source agrees on the value; fused-name
/// sets are united instead.
pub fn copy_runtime_info_from_many(from: &[NodeRef], to: &NodeRef) {
    let infos: Vec<RtInfo> = from.iter().map(|node| node.rt_info()).collect();
    to.set_rt_info(merge_runtime_info(&infos));
}

pub fn merge_runtime_info(infos: &[RtInfo]) -> RtInfo {
    let mut merged = RtInfo::new();
    let all_keys: BTreeSet<&String> = infos.iter().flat_map(|info| info.keys()).collect();

    for key in all_keys {
        let values: Vec<&RtValue> = infos.iter().filter_map(|info| info.get(key)).collect();
        if key == keys::FUSED_NAMES {
            let names: BTreeSet<String> = values
                .iter()
                .flat_map(|value| match value {
                    RtValue::Names(names) => names.iter().cloned().collect::<Vec<_>>(),
                    RtValue::Str(name) => vec![name.clone()],
                    _ => Vec::new(),
                })
                .collect();
            merged.insert(key.clone(), RtValue::Names(names));
            continue;
        }
        if let Some((first, rest)) = values.split_first()
            && rest.iter().all(|value| value == first)
        {
            merged.insert(key.clone(), (*first).clone());
        }
    }

    merged
}
