pub mod chunkutil;
pub mod fileref;
pub mod rollbackstore;
pub mod transaction;

pub use fileref::{FileRef, StorageOptions, WriteMode};
