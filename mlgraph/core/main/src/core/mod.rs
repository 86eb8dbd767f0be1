pub mod arena;
pub mod autodiff;
pub mod context;
pub mod executor;
pub mod graph;
pub(crate) mod kernels;
pub mod ops;
pub mod runtime;
pub(crate) mod scheduler;
pub(crate) mod table;
pub mod tensor;
pub mod views;
