//! Rolling per-channel sample storage
//!
//! Each channel keeps exactly the most recent `W` samples. A buffer that has
//! not yet seen `W` samples is "not ready" and must not be transformed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::UnknownChannel;

/// Warm-up state of a channel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelReadiness {
    Ready,
    NotReady { have: usize, need: usize },
}

/// Fixed-capacity FIFO of the most recent samples of one channel.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    last_timestamp_ms: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            last_timestamp_ms: 0,
        }
    }

    /// Append samples, evicting the oldest once capacity is exceeded.
    pub fn push_slice(&mut self, samples: &[f32]) {
        // Only the tail of an oversized batch can survive
        let incoming = if samples.len() > self.capacity {
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };

        let overflow = (self.samples.len() + incoming.len()).saturating_sub(self.capacity);
        self.samples.drain(..overflow);
        self.samples.extend(incoming.iter().copied());
    }

    pub fn set_timestamp(&mut self, timestamp_ms: u64) {
        self.last_timestamp_ms = self.last_timestamp_ms.max(timestamp_ms);
    }

    pub fn last_timestamp_ms(&self) -> u64 {
        self.last_timestamp_ms
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The buffer never shrinks, so a full buffer means it has reached `W` at least once.
    pub fn readiness(&self) -> ChannelReadiness {
        if self.samples.len() == self.capacity {
            ChannelReadiness::Ready
        } else {
            ChannelReadiness::NotReady {
                have: self.samples.len(),
                need: self.capacity,
            }
        }
    }

    /// Copy of the full window, oldest sample first, or `None` while warming up.
    pub fn snapshot(&self) -> Option<Vec<f32>> {
        match self.readiness() {
            ChannelReadiness::Ready => Some(self.samples.iter().copied().collect()),
            ChannelReadiness::NotReady { .. } => None,
        }
    }
}

/// The ring buffers of every configured channel.
///
/// Each channel sits behind its own mutex, held only for the copy in or out,
/// so ingestion on one channel never waits on another channel.
#[derive(Debug)]
pub struct ChannelBuffers {
    names: Vec<String>,
    index: HashMap<String, usize>,
    buffers: Vec<Mutex<RingBuffer>>,
}

impl ChannelBuffers {
    pub fn new(names: &[String], capacity: usize) -> Self {
        Self {
            names: names.to_vec(),
            index: names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect(),
            buffers: names.iter().map(|_| Mutex::new(RingBuffer::new(capacity))).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Append a batch to the named channel, returning the channel index.
    pub fn ingest(
        &self,
        channel: &str,
        samples: &[f32],
        timestamp_ms: u64,
    ) -> Result<usize, UnknownChannel> {
        let idx = self
            .index_of(channel)
            .ok_or_else(|| UnknownChannel(channel.to_string()))?;
        let mut buffer = self.lock(idx);
        buffer.push_slice(samples);
        buffer.set_timestamp(timestamp_ms);
        Ok(idx)
    }

    /// Full window and latest timestamp of channel `idx`, or `None` while warming up.
    pub fn snapshot(&self, idx: usize) -> Option<(Vec<f32>, u64)> {
        let buffer = self.lock(idx);
        buffer.snapshot().map(|s| (s, buffer.last_timestamp_ms()))
    }

    pub fn readiness(&self, idx: usize) -> ChannelReadiness {
        self.lock(idx).readiness()
    }

    fn lock(&self, idx: usize) -> MutexGuard<'_, RingBuffer> {
        // A panic while holding the lock cannot leave the deque half-written
        self.buffers[idx].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_not_ready_until_full() {
        let mut buffer = RingBuffer::new(4);
        buffer.push_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(
            buffer.readiness(),
            ChannelReadiness::NotReady { have: 3, need: 4 }
        );
        assert!(buffer.snapshot().is_none());

        buffer.push_slice(&[4.0]);
        assert_eq!(buffer.snapshot(), Some(vec![1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = RingBuffer::new(4);
        buffer.push_slice(&[1.0, 2.0, 3.0, 4.0]);
        buffer.push_slice(&[5.0, 6.0]);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.snapshot(), Some(vec![3.0, 4.0, 5.0, 6.0]));
    }

    #[test]
    fn test_oversized_batch_keeps_tail() {
        let mut buffer = RingBuffer::new(3);
        buffer.push_slice(&[1.0]);
        buffer.push_slice(&[2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buffer.snapshot(), Some(vec![4.0, 5.0, 6.0]));
    }

    #[test]
    fn test_channels_are_isolated() {
        let names = vec!["A".to_string(), "B".to_string()];
        let buffers = ChannelBuffers::new(&names, 2);

        assert_eq!(buffers.ingest("A", &[1.0, 2.0], 10), Ok(0));
        assert!(buffers.snapshot(0).is_some());
        assert!(buffers.snapshot(1).is_none());
        assert_eq!(
            buffers.readiness(1),
            ChannelReadiness::NotReady { have: 0, need: 2 }
        );
    }

    #[test]
    fn test_unknown_channel() {
        let names = vec!["A".to_string()];
        let buffers = ChannelBuffers::new(&names, 2);
        assert_eq!(
            buffers.ingest("Z", &[1.0], 0),
            Err(UnknownChannel("Z".to_string()))
        );
    }

    proptest! {
        #[test]
        fn prop_buffer_holds_most_recent_samples(
            batches in proptest::collection::vec(
                proptest::collection::vec(-1000.0f32..1000.0, 0..40),
                0..20,
            ),
            capacity in 1usize..64,
        ) {
            let mut buffer = RingBuffer::new(capacity);
            let mut all = Vec::new();
            for batch in &batches {
                buffer.push_slice(batch);
                all.extend_from_slice(batch);
                prop_assert!(buffer.len() <= capacity);
            }

            if all.len() >= capacity {
                prop_assert_eq!(buffer.snapshot(), Some(all[all.len() - capacity..].to_vec()));
            } else {
                prop_assert!(buffer.snapshot().is_none());
                prop_assert_eq!(buffer.len(), all.len());
            }
        }
    }

    #[test]
    fn test_timestamp_tracks_latest() {
        let names = vec!["A".to_string()];
        let buffers = ChannelBuffers::new(&names, 2);
        buffers.ingest("A", &[1.0], 200).unwrap();
        buffers.ingest("A", &[2.0], 100).unwrap();
        assert_eq!(buffers.snapshot(0), Some((vec![1.0, 2.0], 200)));
    }
}
