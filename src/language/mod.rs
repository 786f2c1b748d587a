//! Language intelligence for playground scripts: cursor context
//! extraction, shell symbol tables, metadata caching, and the completion
//! resolver, tied together by [`service::LanguageService`].

pub mod cache;
pub mod completion;
pub mod service;
pub mod symbols;
pub mod visitor;

pub use cache::{FieldEntry, MetadataCache};
pub use completion::resolve;
pub use symbols::{ShellSymbolTable, SymbolCategory};
pub use visitor::{CompletionContext, CursorKind, classify};
