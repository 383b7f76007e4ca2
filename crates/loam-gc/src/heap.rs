//! The segmented heap.
//!
//! The heap is the union of its segments. Allocation rotates across
//! segments starting from the one that last succeeded, wrapping around;
//! policy (when to collect, when to grow) lives in the runtime, this
//! module only provides the mechanisms.
//!
//! The aggregate `[low, high)` address range over all segments is cached
//! so the conservative filter can reject the vast majority of stack
//! words with two comparisons before touching any segment.

use std::ptr::NonNull;

use crate::segment::Segment;

/// Heap configuration.
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    /// Size of segments created on allocation pressure. A request larger
    /// than this gets a segment of exactly the requested size.
    pub preferred_segment_size: usize,
}

impl HeapConfig {
    /// Default preferred segment size: 64 KiB.
    pub const DEFAULT_SEGMENT_SIZE: usize = 64 * 1024;
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            preferred_segment_size: Self::DEFAULT_SEGMENT_SIZE,
        }
    }
}

pub(crate) struct Heap {
    config: HeapConfig,
    segments: Vec<Segment>,
    /// Rotation point: index of the segment that served the last
    /// successful allocation.
    last_alloc_segment: usize,
    /// Cached aggregate bounds over all segments.
    low_bound: usize,
    high_bound: usize,
}

impl Heap {
    pub(crate) const fn new(config: HeapConfig) -> Self {
        Self {
            config,
            segments: Vec::new(),
            last_alloc_segment: 0,
            low_bound: usize::MAX,
            high_bound: 0,
        }
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn segments_mut(&mut self) -> &mut [Segment] {
        &mut self.segments
    }

    /// Attempts to allocate from existing segments only: no collection,
    /// no growth. Visits segments starting from the rotation point.
    pub(crate) fn try_alloc(&mut self, size: usize, is_gc_object: bool) -> Option<NonNull<u8>> {
        let count = self.segments.len();
        if count == 0 {
            return None;
        }
        if self.last_alloc_segment >= count {
            self.last_alloc_segment = 0;
        }
        for step in 0..count {
            let idx = (self.last_alloc_segment + step) % count;
            if let Some(chunk) = self.segments[idx].try_alloc(size, is_gc_object) {
                self.last_alloc_segment = idx;
                return Some(chunk);
            }
        }
        None
    }

    /// Adds a segment large enough for `min_size` and returns it.
    /// Platform allocation failure here is fatal: there is nothing left
    /// to collect or grow.
    pub(crate) fn grow(&mut self, min_size: usize) -> &mut Segment {
        let size = self.config.preferred_segment_size.max(min_size);
        let segment = match Segment::new(size) {
            Ok(segment) => segment,
            Err(err) => {
                eprintln!("heap segment allocation of {size} bytes failed: {err}");
                std::process::abort();
            }
        };
        self.low_bound = self.low_bound.min(segment.base());
        self.high_bound = self.high_bound.max(segment.base() + segment.len());
        #[cfg(feature = "tracing")]
        tracing::debug!(
            size,
            segments = self.segments.len() + 1,
            "added heap segment"
        );
        self.segments.push(segment);
        let idx = self.segments.len() - 1;
        &mut self.segments[idx]
    }

    /// The segment owning `addr`, honoring the same membership rules as
    /// [`Segment::contains`].
    pub(crate) fn find_owner(&self, addr: usize, is_gc_object: bool) -> Option<&Segment> {
        if addr < self.low_bound || addr >= self.high_bound {
            return None;
        }
        self.segments
            .iter()
            .find(|segment| segment.contains(addr, is_gc_object))
    }

    /// Mutable variant of [`find_owner`](Self::find_owner).
    pub(crate) fn find_owner_mut(
        &mut self,
        addr: usize,
        is_gc_object: bool,
    ) -> Option<&mut Segment> {
        if addr < self.low_bound || addr >= self.high_bound {
            return None;
        }
        self.segments
            .iter_mut()
            .find(|segment| segment.contains(addr, is_gc_object))
    }

    /// Whether `addr` is the start of a live reference object.
    pub(crate) fn is_heap_object(&self, addr: usize) -> bool {
        self.find_owner(addr, true).is_some()
    }
}
