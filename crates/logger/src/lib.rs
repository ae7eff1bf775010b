//! Shared tracing setup for the uppe binaries.

mod subscriber;

pub use subscriber::{init_tracing, try_init_tracing};
