//! Pipeline tuning

use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Batch size of sink writes and capacity of the queues between stages
///
/// A zero value means "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PipelineOptions {
    pub fn new(batch_size: usize, queue_capacity: usize) -> Self {
        Self {
            batch_size,
            queue_capacity,
        }
        .normalized()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self.normalized()
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self.normalized()
    }

    /// Replace zero values with the defaults
    pub fn normalized(self) -> Self {
        Self {
            batch_size: if self.batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                self.batch_size
            },
            queue_capacity: if self.queue_capacity == 0 {
                DEFAULT_QUEUE_CAPACITY
            } else {
                self.queue_capacity
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_falls_back_to_defaults() {
        let options = PipelineOptions::new(0, 0);
        assert_eq!(options, PipelineOptions::default());

        let options = PipelineOptions::new(5, 0);
        assert_eq!(options.batch_size, 5);
        assert_eq!(options.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_partial_deserialize() {
        let options: PipelineOptions = serde_yaml::from_str("batch_size: 250").unwrap();
        assert_eq!(options.batch_size, 250);
        assert_eq!(options.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
