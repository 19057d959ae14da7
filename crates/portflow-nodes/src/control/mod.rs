//! Control nodes
//!
//! Entry points, branching, sequencing, loops and timing.

mod branch;
mod delay;
mod for_loop;
mod sequence;
mod start;

pub use branch::BranchNode;
pub use delay::DelayNode;
pub use for_loop::ForLoopNode;
pub use sequence::{SequenceNode, SEQUENCE_OUTPUTS};
pub use start::StartNode;
