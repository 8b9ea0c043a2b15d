//! Unified error types for the addon host core.
//!
//! Per-addon failures are values of [`LoadError`]; none of them is allowed to
//! cross the subsystem boundary as a panic. The loader converts every variant
//! into a logged per-addon outcome, so the host application observes the
//! subsystem as infallible at the aggregate level.

use thiserror::Error;

/// Boxed error used where a failure is passed through unchanged.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Load Errors
// =============================================================================

/// Errors that can occur while loading, enabling, or unloading an addon.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The external package store failed to enumerate installed addons.
    #[error("failed to enumerate installed addons: {0}")]
    Discovery(String),

    /// The unpacked bundle contains no file flagged as the main module.
    #[error("addon '{id}' has no file flagged as main")]
    MissingMainFile {
        /// The addon whose bundle is incomplete.
        id: String,
    },

    /// None of the recognised entry-point shapes matched the module's exports.
    #[error("addon '{id}': no entry point matched the module's exports")]
    EntryResolution {
        /// The addon whose module exposed no callable entry.
        id: String,
    },

    /// Evaluating the main module's source text failed.
    #[error("addon '{id}': script evaluation failed: {reason}")]
    Script {
        /// The addon whose source failed to evaluate.
        id: String,
        /// Engine-reported failure.
        reason: String,
    },

    /// The addon's entry function returned an error.
    #[error("addon '{id}' failed to enable: {reason}")]
    Enable {
        /// The addon whose entry function failed.
        id: String,
        /// Failure raised by the entry function.
        reason: String,
    },

    /// A load was requested for an id already loaded in this session.
    ///
    /// Treated as success by batch operations: the duplicate is skipped.
    #[error("addon '{id}' is already loaded in this session")]
    DuplicateLoad {
        /// The already-loaded addon id.
        id: String,
    },

    /// The manifest declares an SDK version the host refuses under the
    /// strict compatibility policy.
    #[error("addon '{id}' targets SDK {declared}, host provides {host}")]
    IncompatibleSdk {
        /// The refused addon id.
        id: String,
        /// SDK version declared in the manifest.
        declared: String,
        /// SDK version the host provides.
        host: String,
    },
}

// =============================================================================
// Secret Store Errors
// =============================================================================

/// Errors surfaced unchanged from the external secret store.
#[derive(Debug, Clone, Error)]
pub enum SecretError {
    /// I/O failure talking to the store.
    #[error("secret store I/O failure: {0}")]
    Io(String),

    /// The store refused access to a key.
    #[error("secret store denied access to key '{key}'")]
    Denied {
        /// The store-level (already prefixed) key.
        key: String,
    },

    /// Any other backend failure.
    #[error("secret store backend error: {0}")]
    Backend(String),
}
