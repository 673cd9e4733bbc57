pub mod document;
pub mod execution;
pub mod service;
pub mod state;
