//! Per-run accounting of which (year, season) combinations made it into a
//! metric and which were skipped, and why.

use serde::Serialize;
use tracing::{info, warn};

use crate::clean::CleaningReport;
use crate::error::PipelineError;
use crate::season::Period;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Skipped {
    pub period: Period,
    /// Pipeline stage that gave up, e.g. `load` or `prepare`.
    pub stage: String,
    /// Error kind label, see [`PipelineError::kind`].
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub succeeded: Vec<Period>,
    pub skipped: Vec<Skipped>,
    pub cleaning: CleaningReport,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(&mut self, period: Period) {
        if !self.succeeded.contains(&period) {
            self.succeeded.push(period);
        }
    }

    pub fn skip(&mut self, period: Period, stage: &str, error: &PipelineError) {
        warn!(%period, stage, kind = error.kind(), error = %error, "Skipping combination");
        self.succeeded.retain(|p| *p != period);
        self.skipped.push(Skipped {
            period,
            stage: stage.to_string(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
        });
    }

    pub fn is_skipped(&self, period: Period) -> bool {
        self.skipped.iter().any(|s| s.period == period)
    }

    /// Logs a one-line summary of the run.
    pub fn log_summary(&self) {
        info!(
            succeeded = self.succeeded.len(),
            skipped = self.skipped.len(),
            rows_dropped = self.cleaning.dropped(),
            "Run summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::season::Season;
    use crate::table::TableName;

    #[test]
    fn test_skip_overrides_success() {
        let fall = Period::new(2023, Season::Fall);
        let mut report = RunReport::new();
        report.succeed(fall);
        report.succeed(fall);
        assert_eq!(report.succeeded, vec![fall]);

        report.skip(
            fall,
            "prepare",
            &PipelineError::TableNotFound {
                table: TableName::StopTimes,
            },
        );
        assert!(report.succeeded.is_empty());
        assert!(report.is_skipped(fall));
        assert_eq!(report.skipped[0].kind, "table_not_found");
    }

    #[test]
    fn test_serializes_to_json() {
        let mut report = RunReport::new();
        report.succeed(Period::new(2024, Season::Spring));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["succeeded"][0]["season"], "Spring");
        assert_eq!(json["succeeded"][0]["year"], 2024);
    }
}
