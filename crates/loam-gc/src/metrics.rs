//! Collection statistics.

use std::time::Duration;

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Wall-clock duration of the collection, world-stop included.
    pub duration: Duration,
    /// Reference objects reclaimed by the sweep.
    pub objects_reclaimed: usize,
    /// Bytes returned to the segments: object spans plus array payloads.
    pub bytes_reclaimed: usize,
    /// Reference objects that survived the sweep.
    pub objects_surviving: usize,
    /// Segment count at the end of the collection.
    pub segments: usize,
    /// Collections run by this runtime since creation.
    pub total_collections: usize,
}

impl GcMetrics {
    /// All-zero metrics, the state before the first collection.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            objects_reclaimed: 0,
            bytes_reclaimed: 0,
            objects_surviving: 0,
            segments: 0,
            total_collections: 0,
        }
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}
