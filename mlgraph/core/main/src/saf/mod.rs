//! Facade re-exports for mlgraph-core

pub use crate::api::error::*;
pub use crate::api::types::*;
pub use crate::core::arena::ContextPool;
pub use crate::core::autodiff::build_backward;
pub use crate::core::context::Context;
pub use crate::core::executor::compute;
pub use crate::core::graph::{build_forward, build_forward_expand, Graph};
pub use crate::core::runtime::RuntimeConfig;
pub use crate::core::tensor::Tensor;
