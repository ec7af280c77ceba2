//! Test-report publication from the pulled artifacts directory.

use std::path::Path;

use async_trait::async_trait;
use relmatrix_core::{MatrixError, MatrixResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// What a publisher found in the results directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSummary {
    pub files: usize,
    pub test_cases: usize,
    pub failures: usize,
}

impl ReportSummary {
    pub fn is_empty(&self) -> bool {
        self.files == 0
    }
}

#[async_trait]
pub trait ReportPublisher: Send + Sync {
    /// Publish results found under `dir`. A missing or empty directory is an
    /// empty summary, not an error.
    async fn publish(&self, dir: &Path) -> MatrixResult<ReportSummary>;
}

/// Publishes JUnit XML files by tallying their test cases and failures.
#[derive(Debug, Default, Clone)]
pub struct JunitDirectoryPublisher;

fn tally(xml: &str) -> (usize, usize) {
    let cases = xml.matches("<testcase").count();
    let failures = xml.matches("<failure").count() + xml.matches("<error").count();
    (cases, failures)
}

fn unreadable(path: &Path, err: std::io::Error) -> MatrixError {
    MatrixError::Report(format!("cannot scan {}: {err}", path.display()))
}

#[async_trait]
impl ReportPublisher for JunitDirectoryPublisher {
    async fn publish(&self, dir: &Path) -> MatrixResult<ReportSummary> {
        let mut summary = ReportSummary::default();

        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(unreadable(&current, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| unreadable(&current, e))?
            {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| unreadable(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().map(|e| e == "xml").unwrap_or(false) {
                    match tokio::fs::read_to_string(&path).await {
                        Ok(xml) => {
                            let (cases, failures) = tally(&xml);
                            summary.files += 1;
                            summary.test_cases += cases;
                            summary.failures += failures;
                        }
                        Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable report"),
                    }
                }
            }
        }

        if summary.is_empty() {
            info!(dir = %dir.display(), "no test reports to publish");
        } else {
            info!(
                event = "reports.published",
                files = summary.files,
                test_cases = summary.test_cases,
                failures = summary.failures,
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_directory_is_empty_summary() {
        let dir = tempdir().unwrap();
        let summary = JunitDirectoryPublisher
            .publish(&dir.path().join("absent"))
            .await
            .unwrap();
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn test_tallies_nested_xml_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("pip");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            dir.path().join("unit.xml"),
            r#"<testsuite><testcase name="a"/><testcase name="b"><failure/></testcase></testsuite>"#,
        )
        .unwrap();
        std::fs::write(
            nested.join("integration.xml"),
            r#"<testsuite><testcase name="c"/></testsuite>"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "<testcase").unwrap();

        let summary = JunitDirectoryPublisher.publish(dir.path()).await.unwrap();
        assert_eq!(
            summary,
            ReportSummary {
                files: 2,
                test_cases: 3,
                failures: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_results_path_that_is_a_file_fails() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("test_results");
        std::fs::write(&file, "not a directory").unwrap();

        let err = JunitDirectoryPublisher.publish(&file).await.unwrap_err();
        assert!(matches!(err, MatrixError::Report(ref m) if m.contains("test_results")));
    }
}
