// hcache-common - Shared types for the hcache workspace
//
// Error taxonomy, store options, value codec, and the diagnostics channel.

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;

// Re-export for convenience
pub use codec::*;
pub use config::*;
pub use diagnostics::*;
pub use error::*;
