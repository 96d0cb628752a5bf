//! Run-time knobs for submission, polling and cleanup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::retry::BackoffPolicy;
use crate::report::ReportSettings;

/// Whether remote resources are released when a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Delete every task, bucket and job the run created.
    #[default]
    Always,
    /// Leave everything on the service for inspection.
    Never,
}

/// Settings for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Sleep between polling rounds.
    pub poll_interval: Duration,
    /// Bound passed to each remote `wait` call.
    pub wait_timeout: Duration,
    /// Overall deadline for the poll loop; `None` waits forever.
    pub max_wait: Option<Duration>,
    /// Retry policy for transient status failures.
    pub backoff: BackoffPolicy,
    pub cleanup: CleanupPolicy,
    /// Console page pointed to when a task fails.
    pub diagnostics_url: Option<String>,
    pub report: ReportSettings,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            wait_timeout: Duration::from_millis(100),
            max_wait: None,
            backoff: BackoffPolicy::default(),
            cleanup: CleanupPolicy::Always,
            diagnostics_url: None,
            report: ReportSettings::default(),
        }
    }
}

impl RunSettings {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cleanup(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    pub fn with_diagnostics_url(mut self, url: impl Into<String>) -> Self {
        self.diagnostics_url = Some(url.into());
        self
    }

    pub fn with_report(mut self, report: ReportSettings) -> Self {
        self.report = report;
        self
    }

    /// Pointer printed alongside a task failure.
    pub fn diagnostics(&self) -> String {
        match &self.diagnostics_url {
            Some(url) => format!("See {} for more info", url),
            None => "Inspect the task on the service console for more info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RunSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.wait_timeout, Duration::from_millis(100));
        assert_eq!(settings.cleanup, CleanupPolicy::Always);
        assert!(settings.max_wait.is_none());
    }

    #[test]
    fn test_diagnostics_pointer() {
        let settings = RunSettings::default().with_diagnostics_url("https://console.example.com/tasks");
        assert_eq!(
            settings.diagnostics(),
            "See https://console.example.com/tasks for more info"
        );
        assert!(RunSettings::default().diagnostics().contains("console"));
    }

    #[test]
    fn test_cleanup_policy_yaml_names() {
        let policy: CleanupPolicy = serde_yaml::from_str("never").unwrap();
        assert_eq!(policy, CleanupPolicy::Never);
        assert_eq!(serde_yaml::to_string(&CleanupPolicy::Always).unwrap().trim(), "always");
    }
}
