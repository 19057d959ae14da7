//! Debug nodes
//!
//! Nodes for inspecting values while a graph runs.

mod print;

pub use print::PrintNode;
