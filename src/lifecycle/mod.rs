//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Shutdown::trigger
//!     → request tokens cancelled (in-flight fetches stop retrying)
//!     → broadcast to background tasks (config updates)
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
