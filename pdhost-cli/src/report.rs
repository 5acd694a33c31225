//! Periodic audio callback health reports.

use pdhost_audio::{AudioCallback, TelemetrySummary};

/// Watches one instance's callback telemetry between polls.
pub struct CallbackReport {
    name: String,
    callback: AudioCallback,
    last: TelemetrySummary,
}

impl CallbackReport {
    pub fn new(name: impl Into<String>, callback: AudioCallback) -> Self {
        Self {
            name: name.into(),
            callback,
            last: TelemetrySummary::default(),
        }
    }

    /// Log what went wrong since the previous poll, or the timings if nothing did.
    pub fn poll(&mut self) {
        let now = self.callback.take_telemetry();
        match problems(&self.last, &now) {
            Some(problem) => log::warn!(target: "pd::audio", "{}: {}", self.name, problem),
            None => log::debug!(
                target: "pd::audio",
                "{}: avg {}us, p95 {}us, max {}us",
                self.name,
                now.avg_us,
                now.p95_us,
                now.max_us
            ),
        }
        self.last = now;
    }
}

/// Describe the failures counted between two cumulative summaries.
pub fn problems(prev: &TelemetrySummary, now: &TelemetrySummary) -> Option<String> {
    let mut parts = Vec::new();
    let errors = now.native_errors.saturating_sub(prev.native_errors);
    if errors > 0 {
        parts.push(format!("{} native process errors", errors));
    }
    let partial = now.partial_samples.saturating_sub(prev.partial_samples);
    if partial > 0 {
        parts.push(format!("{} samples left unprocessed in partial chunks", partial));
    }
    let overruns = now.overruns.saturating_sub(prev.overruns);
    if overruns > 0 {
        parts.push(format!("{} callbacks over budget (max {}us)", overruns, now.max_us));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_window_reports_nothing() {
        let prev = TelemetrySummary { processed: 10, native_errors: 2, ..Default::default() };
        let now = TelemetrySummary { processed: 50, native_errors: 2, ..Default::default() };
        assert_eq!(problems(&prev, &now), None);
    }

    #[test]
    fn only_new_failures_are_reported() {
        let prev = TelemetrySummary { native_errors: 2, partial_samples: 10, ..Default::default() };
        let now = TelemetrySummary {
            native_errors: 5,
            partial_samples: 10,
            overruns: 1,
            max_us: 9000,
            ..Default::default()
        };
        assert_eq!(
            problems(&prev, &now).as_deref(),
            Some("3 native process errors, 1 callbacks over budget (max 9000us)")
        );
    }

    #[test]
    fn partial_chunks_are_reported() {
        let now = TelemetrySummary { partial_samples: 64, ..Default::default() };
        assert_eq!(
            problems(&TelemetrySummary::default(), &now).as_deref(),
            Some("64 samples left unprocessed in partial chunks")
        );
    }
}
