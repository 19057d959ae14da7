//! Data nodes
//!
//! Pure value sources.

mod constant;
mod random;

pub use constant::{BoolConstant, ConstantNode, F64Constant, I32Constant, I8Constant, StringConstant};
pub use random::RandomNode;
