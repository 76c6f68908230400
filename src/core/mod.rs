//! Core types shared by every part of the builder.
//!
//! - [`error`] - the error taxonomy ([`BuilderError`]) and CLI error display
//!   ([`ErrorContext`], [`user_friendly_error`])
//! - [`module`] - logical module names, loader plugin prefixes and [`SourceKind`]

pub mod error;
pub mod module;

pub use error::{BuilderError, ErrorContext, user_friendly_error};
pub use module::{
    SourceKind, bare_name, interface_module_of, split_plugin, strip_extension, unixify,
};
