//! GPU pass timing
//!
//! Timestamps are written by the render passes through
//! `RenderPassDescriptor::timestamp_writes`, resolved into a per-slot
//! buffer and read back a full ring later, so the GPU is never stalled
//! for a result. Slot `current` is written this frame; slot
//! `(current + 1) % N` is the oldest in flight and the one read back.

use std::collections::HashMap;
use std::time::Duration;

use crate::backend::{
    BackendError, BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend,
    PassTimestampWrites, QuerySetHandle,
};

/// Number of ring slots; the readback latency in frames is one less.
pub const PROFILER_SLOTS: usize = 10;

const QUERIES_PER_SLOT: u32 = 12;
const SLOT_BYTES: u64 = QUERIES_PER_SLOT as u64 * 8;

/// Bounded map polling: up to this many polls with a short sleep between
/// them, then the sample is discarded.
const MAX_MAP_POLLS: u32 = 64;
const MAP_POLL_SLEEP: Duration = Duration::from_micros(200);

/// Timestamp scopes handed to the passes, with begin/end query indices
/// within a slot. The two SSAO passes share one scope: generation writes
/// the begin, the blur writes the end.
const SCOPES: [(&str, Option<u32>, Option<u32>); 7] = [
    ("shadow", Some(0), Some(1)),
    ("gbuffer", Some(2), Some(3)),
    ("light_volumes", Some(4), Some(5)),
    ("ssao", Some(6), None),
    ("ssao_blur", None, Some(7)),
    ("combine", Some(8), Some(9)),
    ("forward", Some(10), Some(11)),
];

/// GUI rows with their begin/end query indices. Frame Time is derived
/// from the very first and very last timestamp of the frame.
const ROWS: [(&str, usize, usize); 7] = [
    ("Light Camera", 0, 1),
    ("Geometry Pass", 2, 3),
    ("Light Volumes", 4, 5),
    ("SSAO", 6, 7),
    ("Lighting Pass", 8, 9),
    ("Forward Pass", 10, 11),
    ("Frame Time", 0, 11),
];

/// A discarded timing sample. Recoverable: the frame is rendered either
/// way, only this slot's measurement is lost.
#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("timed out waiting for timestamp readback")]
    MapTimeout,
    #[error("timestamp readback failed: {0}")]
    MapFailed(#[from] BackendError),
    #[error("timestamp sample was disjoint")]
    Disjoint,
}

/// One timing row as shown in the performance GUI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassTiming {
    pub name: &'static str,
    pub milliseconds: f32,
}

/// A complete timing table for one frame.
#[derive(Debug, Clone, Default)]
pub struct FrameTimings {
    pub rows: Vec<PassTiming>,
}

impl FrameTimings {
    pub fn frame_time_ms(&self) -> Option<f32> {
        self.rows
            .iter()
            .find(|row| row.name == "Frame Time")
            .map(|row| row.milliseconds)
    }
}

struct ProfilerSlot {
    query_set: QuerySetHandle,
    resolve_buffer: BufferHandle,
    staging_buffer: BufferHandle,
    /// Set when the slot has been written and not yet read back.
    pending: bool,
}

/// Ring of timestamp query slots, one whole ring deep to keep readback
/// off the critical path.
pub struct GpuProfiler {
    slots: Vec<ProfilerSlot>,
    current: usize,
    timestamp_period_ns: f32,
    /// Most recent complete table, refreshed whenever a slot reads back.
    latest: FrameTimings,
    /// Table latched for the GUI when the ring wraps to slot 0.
    latched: FrameTimings,
    enabled: bool,
}

impl GpuProfiler {
    pub fn new(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        if !backend.timestamps_supported() {
            log::warn!("timestamp queries not supported, GPU profiling disabled");
            return Ok(Self::disabled());
        }

        let mut slots = Vec::with_capacity(PROFILER_SLOTS);
        for i in 0..PROFILER_SLOTS {
            let query_set =
                backend.create_query_set(Some(&format!("profiler queries {i}")), QUERIES_PER_SLOT)?;
            let resolve_buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(format!("profiler resolve {i}")),
                size: SLOT_BYTES,
                usage: BufferUsage::QUERY_RESOLVE | BufferUsage::COPY_SRC,
                mapped_at_creation: false,
            })?;
            let staging_buffer = backend.create_buffer(&BufferDescriptor {
                label: Some(format!("profiler staging {i}")),
                size: SLOT_BYTES,
                usage: BufferUsage::COPY_DST | BufferUsage::MAP_READ,
                mapped_at_creation: false,
            })?;
            slots.push(ProfilerSlot {
                query_set,
                resolve_buffer,
                staging_buffer,
                pending: false,
            });
        }

        Ok(Self {
            slots,
            current: 0,
            timestamp_period_ns: backend.timestamp_period_ns(),
            latest: FrameTimings::default(),
            latched: FrameTimings::default(),
            enabled: true,
        })
    }

    fn disabled() -> Self {
        Self {
            slots: Vec::new(),
            current: 0,
            timestamp_period_ns: 0.0,
            latest: FrameTimings::default(),
            latched: FrameTimings::default(),
            enabled: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Slot queries are written into this frame. Exposed for tests.
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// The timing table latched at the last ring wrap.
    pub fn timings(&self) -> &FrameTimings {
        &self.latched
    }

    /// Timestamp attachment points for every instrumented scope, all
    /// targeting the current slot's query set.
    pub fn pass_timestamps(&self) -> HashMap<String, PassTimestampWrites> {
        if !self.enabled {
            return HashMap::new();
        }
        let query_set = self.slots[self.current].query_set;
        SCOPES
            .iter()
            .map(|(name, begin_index, end_index)| {
                (
                    (*name).to_string(),
                    PassTimestampWrites {
                        query_set,
                        begin_index: *begin_index,
                        end_index: *end_index,
                    },
                )
            })
            .collect()
    }

    /// Resolve the current slot, read back the oldest one and advance the
    /// ring. Must be called once per frame after all passes recorded.
    pub fn end_frame(
        &mut self,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<(), MeasurementError> {
        if !self.enabled {
            return Ok(());
        }

        {
            let slot = &mut self.slots[self.current];
            backend.resolve_query_set(slot.query_set, QUERIES_PER_SLOT, slot.resolve_buffer);
            backend.copy_buffer_to_buffer(slot.resolve_buffer, slot.staging_buffer, SLOT_BYTES);
            slot.pending = true;
        }

        let read_index = (self.current + 1) % self.slots.len();
        let result = self.read_slot(backend, read_index);

        self.current = read_index;
        if self.current == 0 {
            self.latched = self.latest.clone();
        }
        result
    }

    fn read_slot(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        index: usize,
    ) -> Result<(), MeasurementError> {
        if !self.slots[index].pending {
            return Ok(());
        }
        // One attempt per slot write, even if the read fails.
        self.slots[index].pending = false;
        let staging = self.slots[index].staging_buffer;

        let mut polls = 0;
        let bytes = loop {
            match backend.try_read_buffer(staging, SLOT_BYTES) {
                Ok(Some(bytes)) => break bytes,
                Ok(None) => {
                    polls += 1;
                    if polls >= MAX_MAP_POLLS {
                        return Err(MeasurementError::MapTimeout);
                    }
                    std::thread::sleep(MAP_POLL_SLEEP);
                }
                Err(err) => return Err(MeasurementError::MapFailed(err)),
            }
        };

        if bytes.len() != SLOT_BYTES as usize {
            return Err(MeasurementError::Disjoint);
        }
        let mut ticks = [0u64; QUERIES_PER_SLOT as usize];
        for (tick, chunk) in ticks.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *tick = u64::from_le_bytes(raw);
        }

        // An end before its begin means the sample pairs up timestamps
        // from different submissions; discard the whole slot.
        for (_, begin, end) in ROWS {
            if ticks[end] < ticks[begin] {
                return Err(MeasurementError::Disjoint);
            }
        }

        let period = self.timestamp_period_ns;
        let to_ms = move |begin: usize, end: usize| {
            (ticks[end] - ticks[begin]) as f32 * period / 1_000_000.0
        };
        self.latest = FrameTimings {
            rows: ROWS
                .iter()
                .map(|&(name, begin, end)| PassTiming {
                    name,
                    milliseconds: to_ms(begin, end),
                })
                .collect(),
        };
        Ok(())
    }
}
