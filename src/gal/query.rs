//! GPU Queries
//!
//! Timestamp and pipeline-statistics queries. Query sets are sized per
//! in-flight frame; results resolve into the frame's readback buffer at
//! `Frame::end` and become readable when that frame's fence signals.
//!
//! Both query kinds are gated on device features and degrade to no-ops
//! when absent; a query that never resolves simply stays `!ready`.

use crate::gal::NUM_BACKBUFFERS;

/// Maximum queries of each kind per frame.
pub const QUERY_CAPACITY: u32 = 64;

/// Kind of a GAL query.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum QueryKind {
    Timestamp,
    PipelineStats,
}

/// A GAL query object. Created once, reused across frames.
pub struct Query {
    pub kind: QueryKind,
    /// Slot in the owning query set, assigned when recorded.
    pub idx: u32,
    pub result: u64,
    pub ready: bool,
}

/// Owns the native query sets and per-frame slot cursors.
pub struct QueryPool {
    pub timestamp_set: Option<wgpu::QuerySet>,
    pub stats_set: Option<wgpu::QuerySet>,
    /// Nanoseconds per timestamp tick, from the queue.
    pub timestamp_period: f32,
    cursors: [u32; NUM_BACKBUFFERS],
    stats_cursors: [u32; NUM_BACKBUFFERS],
}

impl QueryPool {
    #[must_use]
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, features: wgpu::Features) -> Self {
        let timestamp_set = features
            .contains(
                wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS,
            )
            .then(|| {
                device.create_query_set(&wgpu::QuerySetDescriptor {
                    label: Some("Timestamp Queries"),
                    ty: wgpu::QueryType::Timestamp,
                    count: QUERY_CAPACITY * NUM_BACKBUFFERS as u32,
                })
            });
        let stats_set = features
            .contains(wgpu::Features::PIPELINE_STATISTICS_QUERY)
            .then(|| {
                device.create_query_set(&wgpu::QuerySetDescriptor {
                    label: Some("Pipeline Stats Queries"),
                    ty: wgpu::QueryType::PipelineStatistics(
                        wgpu::PipelineStatisticsTypes::CLIPPER_INVOCATIONS,
                    ),
                    count: QUERY_CAPACITY * NUM_BACKBUFFERS as u32,
                })
            });
        Self {
            timestamp_set,
            stats_set,
            timestamp_period: queue.get_timestamp_period(),
            cursors: [0; NUM_BACKBUFFERS],
            stats_cursors: [0; NUM_BACKBUFFERS],
        }
    }

    /// Allocates the next timestamp slot in `frame`'s query range, or
    /// `None` when the feature is absent or the range is full.
    pub fn alloc_timestamp(&mut self, frame: usize) -> Option<u32> {
        self.timestamp_set.as_ref()?;
        let cursor = &mut self.cursors[frame];
        if *cursor >= QUERY_CAPACITY {
            return None;
        }
        let idx = frame as u32 * QUERY_CAPACITY + *cursor;
        *cursor += 1;
        Some(idx)
    }

    /// Allocates the next pipeline-stats slot in `frame`'s range.
    pub fn alloc_stats(&mut self, frame: usize) -> Option<u32> {
        self.stats_set.as_ref()?;
        let cursor = &mut self.stats_cursors[frame];
        if *cursor >= QUERY_CAPACITY {
            return None;
        }
        let idx = frame as u32 * QUERY_CAPACITY + *cursor;
        *cursor += 1;
        Some(idx)
    }

    /// Number of timestamp slots used by `frame` so far.
    #[must_use]
    pub fn used(&self, frame: usize) -> u32 {
        self.cursors[frame]
    }

    #[must_use]
    pub fn stats_used(&self, frame: usize) -> u32 {
        self.stats_cursors[frame]
    }

    /// Resets `frame`'s slot ranges. Called from `Frame::begin` once the
    /// previous use of the range has been resolved.
    pub fn reset(&mut self, frame: usize) {
        self.cursors[frame] = 0;
        self.stats_cursors[frame] = 0;
    }
}
