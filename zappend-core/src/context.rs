//! Processing context: the handful of things a slice source or attribute
//! template needs to see besides its own inputs — the active configuration,
//! the target's current outline (once one exists), and which slice in the
//! input list is being processed.

use crate::config::Config;
use crate::metadata::DatasetMetadata;

pub struct ProcessingContext<'a> {
    config: &'a Config,
    target_metadata: Option<&'a DatasetMetadata>,
    slice_index: usize,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(config: &'a Config, slice_index: usize) -> Self {
        Self {
            config,
            target_metadata: None,
            slice_index,
        }
    }

    pub fn with_target_metadata(mut self, target_metadata: &'a DatasetMetadata) -> Self {
        self.target_metadata = Some(target_metadata);
        self
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn target_metadata(&self) -> Option<&DatasetMetadata> {
        self.target_metadata
    }

    pub fn slice_index(&self) -> usize {
        self.slice_index
    }
}
