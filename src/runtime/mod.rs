//! Manager and the GPU resources it hands out.

pub mod algorithm;
pub mod manager;
pub mod sequence;
pub mod tensor;

pub use algorithm::Algorithm;
pub use manager::{Manager, TrackedCounts};
pub use sequence::Sequence;
pub use tensor::{Tensor, TensorDataType, TensorElement};
