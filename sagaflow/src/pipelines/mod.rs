//! Concrete pipeline definitions.
//!
//! Each module wires domain capabilities into a [`StageRegistry`] and
//! describes the request payload its stages read.
//!
//! [`StageRegistry`]: crate::pipeline::StageRegistry

pub mod document;
pub mod order;

pub use document::{document_registry, DocumentRequest, DocumentServices};
pub use order::{order_registry, OrderRequest, OrderServices};
