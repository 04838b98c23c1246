//! Export functionality: writing attachments of rendered messages to disk.

pub mod attachment;
