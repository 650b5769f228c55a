use std::collections::HashMap;
use std::time::Instant;

/// How a single request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Detection ran; carries the number of faces found.
    Detected(usize),
    EmptyPath,
    Failed,
}

/// Observer for request-processing events.
///
/// Keeps the use case free of any particular reporting mechanism.
pub trait RequestLogger: Send {
    /// Record how long a named stage (`load`, `detect`, `encode`) took.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record the end of one request.
    fn outcome(&mut self, outcome: RequestOutcome);

    /// Emit a summary of everything recorded so far. Default: no-op.
    fn summary(&self) {}
}

/// Discards every event. Used in tests and when reporting is unwanted.
pub struct NullRequestLogger;

impl RequestLogger for NullRequestLogger {
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn outcome(&mut self, _outcome: RequestOutcome) {}
}

/// Running totals for one stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StageTiming {
    pub count: usize,
    pub total_ms: f64,
}

impl StageTiming {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// `log`-backed logger that keeps per-stage timings and outcome counts,
/// and writes a summary at `info` every `summary_every` requests.
pub struct LogRequestLogger {
    label: String,
    summary_every: usize,
    timings: HashMap<String, StageTiming>,
    start_time: Instant,
    requests: usize,
    empty: usize,
    failed: usize,
    faces: usize,
}

impl LogRequestLogger {
    /// `summary_every == 0` disables the periodic summary.
    pub fn new(label: impl Into<String>, summary_every: usize) -> Self {
        Self {
            label: label.into(),
            summary_every,
            timings: HashMap::new(),
            start_time: Instant::now(),
            requests: 0,
            empty: 0,
            failed: 0,
            faces: 0,
        }
    }

    /// Returns the formatted summary string, or `None` if nothing was
    /// recorded yet.
    pub fn summary_string(&self) -> Option<String> {
        if self.requests == 0 {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = Vec::new();
        lines.push(format!(
            "{} summary ({} requests, {} failed, {} empty, {} faces, {:.1}s):",
            self.label,
            self.requests,
            self.failed,
            self.empty,
            self.faces,
            elapsed_ms / 1000.0
        ));

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let timing = self.timings[stage];
            let avg_ms = timing.avg_ms();
            let total_ms = timing.total_ms;
            lines.push(format!(
                "  {stage:8}: avg {avg_ms:6.1}ms  total {total_ms:7.0}ms"
            ));
        }

        if elapsed_ms > 0.0 {
            let rate = self.requests as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {rate:.1} req/s"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<StageTiming> {
        self.timings.get(stage).copied()
    }

    pub fn requests(&self) -> usize {
        self.requests
    }
}

impl RequestLogger for LogRequestLogger {
    fn timing(&mut self, stage: &str, duration_ms: f64) {
        let timing = self.timings.entry(stage.to_string()).or_default();
        timing.count += 1;
        timing.total_ms += duration_ms;
    }

    fn outcome(&mut self, outcome: RequestOutcome) {
        self.requests += 1;
        match outcome {
            RequestOutcome::Detected(count) => self.faces += count,
            RequestOutcome::EmptyPath => self.empty += 1,
            RequestOutcome::Failed => self.failed += 1,
        }
        if self.summary_every > 0 && self.requests % self.summary_every == 0 {
            self.summary();
        }
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("{text}");
        }
    }
}
