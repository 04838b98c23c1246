//! Core data model: structural nodes, the rendered part tree, crypto
//! metadata, and the summaries handed to consumers.

pub mod address;
pub mod attachment;
pub mod mail;
pub mod metadata;
pub mod node;
pub mod part;
