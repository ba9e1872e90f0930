pub mod config;
pub mod errors;
pub mod execution;
pub mod summary;
pub mod task;

pub use config::*;
pub use errors::*;
pub use execution::*;
pub use summary::*;
pub use task::*;
