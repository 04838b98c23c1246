//! `mimetree` renders structured mail messages (MIME, PGP/MIME, S/MIME,
//! inline OpenPGP) into a tree of typed parts.
//!
//! This crate provides the core library: loading RFC 5322 bytes into a node
//! tree, dispatching nodes to body-part formatters, running the decrypt and
//! verify passes through a pluggable crypto engine, and querying the result.

pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod render;
