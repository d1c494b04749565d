use std::sync::atomic::{AtomicU32, Ordering};

/// Receives the fraction of frames processed, in `[0, 1]`, after every frame.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, fraction: f64);
}

impl<F> ProgressObserver for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, fraction: f64) {
        self(fraction)
    }
}

pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _fraction: f64) {}
}

/// Logs progress whenever it crosses another `step_percent` boundary.
pub struct ProgressLogger {
    step_percent: u32,
    last_logged: AtomicU32,
}

impl ProgressLogger {
    pub fn new(step_percent: u32) -> Self {
        Self {
            step_percent: step_percent.clamp(1, 100),
            last_logged: AtomicU32::new(0),
        }
    }

    fn crossed_step(&self, fraction: f64) -> Option<u32> {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u32;
        let step = percent - percent % self.step_percent;
        let previous = self.last_logged.fetch_max(step, Ordering::SeqCst);
        (step > previous).then_some(step)
    }
}

impl ProgressObserver for ProgressLogger {
    fn on_progress(&self, fraction: f64) {
        if let Some(percent) = self.crossed_step(fraction) {
            tracing::info!(progress = percent, "Processing video: {}%", percent);
        }
    }
}
