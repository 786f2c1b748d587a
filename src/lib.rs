//! Language intelligence for MongoDB playground scripts: cursor-context
//! classification, metadata-backed completion, and sandboxed script
//! execution with cooperative-then-forced cancellation.

pub mod assets;
pub mod connection;
pub mod error;
pub mod language;
pub mod sandbox;

pub use error::{Error, Result};
pub use language::service::{ConnectParams, LanguageService, LogNotifier, Notifier};
pub use language::visitor::{CompletionContext, CursorKind, classify};
pub use sandbox::{CancellationToken, ExecutionOutput, ExecutionSandbox};
