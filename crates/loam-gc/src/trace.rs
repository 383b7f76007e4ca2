//! Structured tracing for collections.
//!
//! With the `tracing` feature enabled, every collection gets a span and
//! each phase (roots / mark / sweep) a child span; call sites elsewhere
//! are individually feature-gated so the default build carries no
//! tracing dependency at all.

#[cfg(feature = "tracing")]
pub(crate) mod internal {
    use tracing::{span, Level};

    /// Phases of a stop-the-world collection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum GcPhase {
        /// Conservative stack/register scan plus precise static scan.
        Roots,
        /// BFS over the reachable object graph.
        Mark,
        /// Object-start walk reclaiming unmarked objects.
        Sweep,
    }

    /// Span covering one whole collection.
    pub(crate) fn collection_span(epoch: u8) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect", epoch).entered()
    }

    /// Span covering one collection phase.
    pub(crate) fn phase_span(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }
}
