//! Message parsing: MIME loading, header decoding, inline armor detection,
//! and the object tree parser that turns nodes into parts.

pub mod armor;
pub mod eml;
pub mod formatter;
pub mod header;
pub mod mime;
pub mod registry;
pub mod tree;

pub use registry::FormatterRegistry;
pub use tree::{ObjectTreeParser, ParseContext};
