use crate::render::Renderer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MIN_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Fraction of an upload sent so far, or `None` when the total is unknown.
pub fn progress_fraction(loaded: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((loaded as f64 / total as f64).min(1.0))
}

/// Byte counter for one upload, shared by every part of the body.
#[derive(Clone)]
pub struct UploadProgress {
    renderer: Arc<dyn Renderer>,
    total_bytes: u64,
    sent_bytes: Arc<AtomicU64>,
    last_report: Arc<std::sync::Mutex<Option<Instant>>>,
}

impl UploadProgress {
    pub fn new(renderer: Arc<dyn Renderer>, total_bytes: u64) -> Self {
        Self {
            renderer,
            total_bytes,
            sent_bytes: Arc::new(AtomicU64::new(0)),
            last_report: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Count `bytes` as sent and report the new fraction. Intermediate
    /// reports are throttled; the final one always goes through.
    pub fn record_bytes(&self, bytes: u64) {
        let sent = self.sent_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let Some(fraction) = progress_fraction(sent, self.total_bytes) else {
            return;
        };

        if fraction < 1.0 {
            let mut last = match self.last_report.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            if matches!(*last, Some(at) if now.duration_since(at) < MIN_REPORT_INTERVAL) {
                return;
            }
            *last = Some(now);
        }

        self.renderer.render_upload_progress(fraction);
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }
}
