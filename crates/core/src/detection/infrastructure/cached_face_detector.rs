use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};

use crate::detection::domain::detection_record::DetectionRecord;
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::frame::Frame;

type FrameDigest = [u8; 32];

/// Lookups between hit-rate log lines.
const STATS_LOG_EVERY: u64 = 1000;

/// Decorator that memoizes detection results by image content.
///
/// Frames are keyed by a SHA-256 of their dimensions and pixels, so the
/// same picture submitted under different paths hits the cache. Holds at
/// most `capacity` entries; the oldest insertion is evicted first.
/// Failed detections are not cached.
pub struct CachedFaceDetector {
    inner: Box<dyn FaceDetector>,
    capacity: usize,
    entries: HashMap<FrameDigest, Vec<DetectionRecord>>,
    insertion_order: VecDeque<FrameDigest>,
    hits: u64,
    misses: u64,
}

impl CachedFaceDetector {
    pub fn new(inner: Box<dyn FaceDetector>, capacity: usize) -> Result<Self, &'static str> {
        if capacity == 0 {
            return Err("cache capacity must be >= 1");
        }
        Ok(Self {
            inner,
            capacity,
            entries: HashMap::with_capacity(capacity),
            insertion_order: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Hit-rate line logged every [`STATS_LOG_EVERY`] lookups.
    pub fn stats_line(&self) -> String {
        let lookups = self.hits + self.misses;
        let rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64 * 100.0
        };
        format!(
            "Detection cache: {} hits, {} misses ({rate:.1}% hit rate), {}/{} entries",
            self.hits,
            self.misses,
            self.entries.len(),
            self.capacity
        )
    }

    fn record_lookup(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        if (self.hits + self.misses) % STATS_LOG_EVERY == 0 {
            log::info!("{}", self.stats_line());
        }
    }

    fn insert(&mut self, key: FrameDigest, records: Vec<DetectionRecord>) {
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.insertion_order.push_back(key);
        self.entries.insert(key, records);
    }
}

fn frame_digest(frame: &Frame) -> FrameDigest {
    let mut hasher = Sha256::new();
    hasher.update(frame.width().to_le_bytes());
    hasher.update(frame.height().to_le_bytes());
    hasher.update([frame.channels()]);
    hasher.update(frame.data());
    hasher.finalize().into()
}

impl FaceDetector for CachedFaceDetector {
    fn detect(
        &mut self,
        frame: &Frame,
    ) -> Result<Vec<DetectionRecord>, Box<dyn std::error::Error>> {
        let key = frame_digest(frame);
        if let Some(records) = self.entries.get(&key).cloned() {
            self.record_lookup(true);
            log::debug!("Detection cache hit ({} entries)", self.entries.len());
            return Ok(records);
        }

        self.record_lookup(false);
        let records = self.inner.detect(frame)?;
        self.insert(key, records.clone());
        Ok(records)
    }
}
