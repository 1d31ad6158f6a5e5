//! Loopback sinkhole for redirected AI service traffic.
//!
//! Re-exports the server and parsers from `ifnoai-core` and the configuration
//! model from `ifnoai-config`.

pub use ifnoai_config as config;
pub use ifnoai_core::*;
