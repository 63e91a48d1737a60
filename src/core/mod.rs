// Core domain layer
pub mod chunks;
pub mod context;
pub mod emitter;
pub mod graph;
pub mod interfaces;
pub mod models;
pub mod optimizer;
pub mod orchestrator;
pub mod services;
pub mod transform;

pub use context::*;
pub use emitter::*;
pub use graph::*;
pub use interfaces::*;
pub use models::*;
pub use optimizer::*;
pub use orchestrator::*;
pub use services::*;
pub use transform::*;
