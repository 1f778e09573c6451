pub mod dataset;
pub mod variable;

pub use dataset::DatasetMetadata;
pub use variable::{ChunkLen, DType, FillValue, VariableEncoding, VariableMetadata};
