#![forbid(unsafe_code)]
//! Conversion core: FAT tree serialization with relocation, and the
//! three-phase orchestration (plan & serialize, dry run, commit).

mod convert;
mod serialize;

pub use convert::{convert, ConversionSummary, ConvertOptions};
pub use serialize::{FatTreeSerializer, SerializeStats};
