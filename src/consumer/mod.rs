//! Consumer facade, options and builder.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent [`ConsumerBuilder`] |
//! | `core` | The [`Consumer`] facade |
//! | `options` | [`ConsumerOptions`] and adapter JSON parsing |

// ============================================================================
// Submodules
// ============================================================================

/// Consumer builder.
pub mod builder;

/// Consumer facade.
pub mod core;

/// Consumer configuration.
pub mod options;

#[cfg(test)]
mod tests;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConsumerBuilder;
pub use core::Consumer;
pub use options::{ConsumerOptions, DEFAULT_PROTOCOLS, DEFAULT_URL};
