//! Fixed-layout metrics buffer shared between the collector and its readers.
//!
//! Sequence-lock protocol: the writer makes the sequence odd, stores every
//! slot, then makes it even again. Readers copy the slots between two loads of
//! the sequence and retry when the two differ or the first one was odd, so a
//! sample is only ever observed whole. The published version is `sequence / 2`,
//! which increases by exactly one per completed write.

use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::metrics::{LiveMetrics, METRIC_SLOT_COUNT};

struct Inner {
    sequence: AtomicU64,
    slots: [AtomicU64; METRIC_SLOT_COUNT],
}

/// Create a buffer, returning its only writer and a cloneable reader.
pub fn metrics_buffer() -> (MetricsBufferWriter, MetricsBufferReader) {
    let inner = Arc::new(Inner {
        sequence: AtomicU64::new(0),
        slots: std::array::from_fn(|_| AtomicU64::new(f64::NAN.to_bits())),
    });
    (
        MetricsBufferWriter {
            inner: Arc::clone(&inner),
        },
        MetricsBufferReader { inner },
    )
}

/// Single writer handle. Not `Clone`: the collector owns the only one.
pub struct MetricsBufferWriter {
    inner: Arc<Inner>,
}

impl MetricsBufferWriter {
    /// Write all slots, then bump the version. Returns the new version.
    pub fn publish(&mut self, values: &[f64; METRIC_SLOT_COUNT]) -> u64 {
        let seq = self.inner.sequence.load(Ordering::Relaxed);
        self.inner.sequence.store(seq + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        for (slot, value) in self.inner.slots.iter().zip(values.iter()) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }

        self.inner.sequence.store(seq + 2, Ordering::Release);
        (seq + 2) / 2
    }

    /// Publish a full sample; the returned version is what readers will see.
    pub fn publish_metrics(&mut self, metrics: &LiveMetrics) -> u64 {
        self.publish(&metrics.to_slots())
    }
}

#[derive(Clone)]
pub struct MetricsBufferReader {
    inner: Arc<Inner>,
}

impl MetricsBufferReader {
    /// Version of the last complete write (0 before the first one).
    pub fn version(&self) -> u64 {
        self.inner.sequence.load(Ordering::Acquire) / 2
    }

    /// Consistent copy of all slots plus their version.
    pub fn read(&self) -> ([f64; METRIC_SLOT_COUNT], u64) {
        let mut spins = 0u32;
        loop {
            let before = self.inner.sequence.load(Ordering::Acquire);
            if before & 1 == 0 {
                let values: [f64; METRIC_SLOT_COUNT] = std::array::from_fn(|i| {
                    f64::from_bits(self.inner.slots[i].load(Ordering::Relaxed))
                });
                fence(Ordering::Acquire);
                let after = self.inner.sequence.load(Ordering::Relaxed);
                if before == after {
                    return (values, before / 2);
                }
            }

            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Decoded sample, or `None` if nothing has been published yet.
    pub fn read_metrics(&self) -> Option<LiveMetrics> {
        let (values, version) = self.read();
        (version > 0).then(|| LiveMetrics::from_slots(&values, version))
    }
}
