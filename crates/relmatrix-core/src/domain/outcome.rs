//! Aggregated matrix outcome.

use serde::{Deserialize, Serialize};

use super::error::{MatrixError, MatrixResult};
use super::release::ReleaseTarget;
use super::stage::StageOutcome;

/// Overall verdict of a matrix run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    Failure,
}

/// Stage outcomes of one release, in the order they were recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReleaseOutcome {
    pub release: String,
    pub stages: Vec<StageOutcome>,
}

impl ReleaseOutcome {
    /// Whether every recorded stage of this release passed.
    pub fn passed(&self) -> bool {
        self.stages.iter().all(StageOutcome::passed)
    }
}

/// Success/failure record across all releases and stages of a run.
///
/// Built incrementally while pipelines report; the overall status is
/// Failure iff any recorded stage failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregatedOutcome {
    pub releases: Vec<ReleaseOutcome>,
}

impl AggregatedOutcome {
    /// Create an empty aggregate with one slot per release, in config order.
    pub fn new(releases: &[ReleaseTarget]) -> Self {
        Self {
            releases: releases
                .iter()
                .map(|r| ReleaseOutcome {
                    release: r.name.clone(),
                    stages: Vec::new(),
                })
                .collect(),
        }
    }

    /// Append one stage outcome to its release.
    pub fn record(&mut self, outcome: StageOutcome) {
        match self
            .releases
            .iter_mut()
            .find(|r| r.release == outcome.release)
        {
            Some(slot) => slot.stages.push(outcome),
            None => self.releases.push(ReleaseOutcome {
                release: outcome.release.clone(),
                stages: vec![outcome],
            }),
        }
    }

    /// Append a batch of outcomes.
    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = StageOutcome>) {
        for outcome in outcomes {
            self.record(outcome);
        }
    }

    /// Outcomes recorded for `release`, empty if none.
    pub fn stages_for(&self, release: &str) -> &[StageOutcome] {
        self.releases
            .iter()
            .find(|r| r.release == release)
            .map(|r| r.stages.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `stage` was recorded for `release`.
    pub fn ran(&self, release: &str, stage: &str) -> bool {
        self.stages_for(release).iter().any(|s| s.stage == stage)
    }

    /// Failure iff any stage anywhere failed.
    pub fn overall(&self) -> OverallStatus {
        if self.releases.iter().all(ReleaseOutcome::passed) {
            OverallStatus::Success
        } else {
            OverallStatus::Failure
        }
    }

    /// `<release>-<stage>` contexts of failed stages.
    pub fn failed_contexts(&self) -> Vec<String> {
        self.all_stages()
            .filter(|s| !s.passed())
            .map(StageOutcome::context)
            .collect()
    }

    /// Earliest-finishing failed stage across all releases.
    pub fn first_failure(&self) -> Option<&StageOutcome> {
        self.all_stages()
            .filter(|s| !s.passed())
            .min_by_key(|s| s.finished_at)
    }

    pub fn passed_count(&self) -> usize {
        self.all_stages().filter(|s| s.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.all_stages().filter(|s| !s.passed()).count()
    }

    /// Surface a failed matrix as `MatrixFailed`.
    pub fn to_result(&self) -> MatrixResult<()> {
        match self.overall() {
            OverallStatus::Success => Ok(()),
            OverallStatus::Failure => Err(MatrixError::MatrixFailed {
                failed: self.failed_contexts(),
            }),
        }
    }

    fn all_stages(&self) -> impl Iterator<Item = &StageOutcome> {
        self.releases.iter().flat_map(|r| r.stages.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn releases() -> Vec<ReleaseTarget> {
        vec![ReleaseTarget::new("f32"), ReleaseTarget::primary("pip")]
    }

    #[test]
    fn test_empty_aggregate_is_success() {
        let agg = AggregatedOutcome::new(&releases());
        assert_eq!(agg.overall(), OverallStatus::Success);
        assert!(agg.to_result().is_ok());
        assert_eq!(agg.releases.len(), 2);
    }

    #[test]
    fn test_single_failure_fails_overall() {
        let mut agg = AggregatedOutcome::new(&releases());
        agg.record(StageOutcome::success("pip", "build", Utc::now()));
        agg.record(StageOutcome::failure(
            "f32",
            "build",
            &MatrixError::RemoteExecution {
                exit_code: 2,
                stderr: String::new(),
            },
            Utc::now(),
        ));

        assert_eq!(agg.overall(), OverallStatus::Failure);
        assert_eq!(agg.failed_contexts(), vec!["f32-build".to_string()]);
        assert_eq!(agg.passed_count(), 1);
        assert_eq!(agg.failed_count(), 1);
        assert_eq!(agg.first_failure().map(|s| s.context()), Some("f32-build".to_string()));
        assert!(matches!(agg.to_result(), Err(MatrixError::MatrixFailed { .. })));
    }

    #[test]
    fn test_record_preserves_order_per_release() {
        let mut agg = AggregatedOutcome::new(&releases());
        agg.extend(vec![
            StageOutcome::success("pip", "build", Utc::now()),
            StageOutcome::success("pip", "integration-build", Utc::now()),
        ]);
        let names: Vec<_> = agg.stages_for("pip").iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["build", "integration-build"]);
        assert!(agg.ran("pip", "build"));
        assert!(!agg.ran("f32", "build"));
    }

    #[test]
    fn test_unknown_release_gets_its_own_slot() {
        let mut agg = AggregatedOutcome::default();
        agg.record(StageOutcome::success("rawhide", "docs", Utc::now()));
        assert_eq!(agg.stages_for("rawhide").len(), 1);
    }
}
