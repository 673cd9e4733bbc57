pub mod initializer;

pub use initializer::{map_strings, DocumentInitializer, ParserInfo, StepInitializer};
