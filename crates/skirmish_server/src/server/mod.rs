//! Shard management and session admission.

mod core;

pub use self::core::{DispatchServer, SERVER};
