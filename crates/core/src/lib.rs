//! `beacon-core` — building blocks shared by the collector crates.
//!
//! Nothing in here performs IO.

pub mod error;
pub mod id;
pub mod json;
pub mod prefix_map;

pub use error::{ConfigError, ConfigResult};
pub use id::{AnonymousId, MessageId};
pub use prefix_map::{PrefixMap, ShortCircuit};
