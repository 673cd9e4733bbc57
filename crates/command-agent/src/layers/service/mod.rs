pub mod compat;
pub mod logging;
pub mod parse;
pub mod policy;
pub mod processor;
pub mod scrub;
pub mod server;
pub mod transport;

pub use processor::{Processor, ProcessorSettings};
pub use server::{spawn_accept_loop, ChannelTransport};
