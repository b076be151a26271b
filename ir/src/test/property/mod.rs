//! Property-based tests for operations and graph evaluation.

#[cfg(test)]
mod op_props;

pub mod generators;
