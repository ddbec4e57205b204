//! Binary field codecs shared by the packet protocols

pub mod field;

pub use field::{FieldReader, FieldWriter};
