//! Serializer subsystem for a compact OSM-like graph snapshot: a buffered,
//! CRC-framed binary stream with variable-length integer codecs, a
//! CRC32C-keyed string interning table, delta/base-node encoding for nodes
//! and ways, and the page-based arena backing every decoded container.
//!
//! Reading OSM-PBF itself, CLI entry points, and the interactive street-name
//! autocompletion loop this format was built to serve are out of scope here
//! — this crate only knows how to read and write its own file format.

pub mod arena;
pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod model;
pub mod primer;
pub mod span;
pub mod stream;
pub mod string_table;

pub use arena::{Arena, AllocationIndex};
pub use decoder::WaysDecoder;
pub use encoder::WaysEncoder;
pub use error::{AllocError, CodecError};
pub use model::{Node, Tag, Way};
pub use span::{Provenance, Span};
pub use stream::{StreamOptions, StreamReader, StreamWriter};
pub use string_table::StringTable;
