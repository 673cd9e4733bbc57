pub mod engine;
pub mod pool;
pub mod shell;

pub use engine::{DocumentFileStore, ExecutionEngine};
pub use pool::{WorkHandler, WorkItem, WorkKind, WorkerPool};
pub use shell::{ShellEngine, ShellSettings};
