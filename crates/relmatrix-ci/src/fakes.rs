//! In-memory fakes for the external collaborators (testing only)
//!
//! `FakeGateway`, `FakePool`, `RecordingNotifier` and `RecordingPublisher`
//! satisfy the collaborator traits without a network or a remote host, and
//! record every call for assertions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use relmatrix_core::{MatrixError, MatrixResult, NodeLease};

use crate::gateway::{CommandOutput, RemoteGateway};
use crate::notify::{NotifyStatus, StatusNotifier};
use crate::pool::{PoolAllocation, PoolApi, PoolRequest};
use crate::report::{ReportPublisher, ReportSummary};

// ---------------------------------------------------------------------------
// FakeGateway
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Rule {
    /// Fail the next `n` matching commands with exit code 1.
    Fail(u32),
    /// Never complete.
    Hang,
    /// Complete after a delay.
    Delay(Duration),
    /// Panic inside the calling task.
    Panic,
}

/// Gateway whose behaviour is scripted by substring rules on the command.
#[derive(Debug, Default)]
pub struct FakeGateway {
    rules: Mutex<Vec<(String, Rule)>>,
    executed: Mutex<Vec<String>>,
    pushed: Mutex<Vec<PathBuf>>,
    pulled: Mutex<Vec<PathBuf>>,
    fail_pull: Mutex<bool>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` commands containing `pattern`.
    pub fn fail_times(&self, pattern: &str, times: u32) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Rule::Fail(times)));
    }

    /// Commands containing `pattern` never return.
    pub fn hang(&self, pattern: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Rule::Hang));
    }

    /// Commands containing `pattern` succeed after `delay`.
    pub fn delay(&self, pattern: &str, delay: Duration) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Rule::Delay(delay)));
    }

    /// Commands containing `pattern` panic, taking their task down.
    pub fn panic_on(&self, pattern: &str) {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Rule::Panic));
    }

    /// Make every `pull` fail.
    pub fn fail_pulls(&self) {
        *self.fail_pull.lock().unwrap() = true;
    }

    /// Every command executed, in call order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Number of executed commands containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    pub fn pushed(&self) -> Vec<PathBuf> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<PathBuf> {
        self.pulled.lock().unwrap().clone()
    }

    fn matching_rule(&self, command: &str) -> Option<Rule> {
        let mut rules = self.rules.lock().unwrap();
        for (pattern, rule) in rules.iter_mut() {
            if !command.contains(pattern.as_str()) {
                continue;
            }
            match rule {
                Rule::Fail(0) => continue,
                Rule::Fail(n) => {
                    if *n != u32::MAX {
                        *n -= 1;
                    }
                    return Some(Rule::Fail(1));
                }
                other => return Some(other.clone()),
            }
        }
        None
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn execute(&self, _lease: &NodeLease, command: &str) -> MatrixResult<CommandOutput> {
        self.executed.lock().unwrap().push(command.to_string());

        match self.matching_rule(command) {
            Some(Rule::Fail(_)) => Err(MatrixError::RemoteExecution {
                exit_code: 1,
                stderr: format!("scripted failure: {command}"),
            }),
            Some(Rule::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending future completed")
            }
            Some(Rule::Panic) => panic!("scripted panic: {command}"),
            Some(Rule::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(CommandOutput::default())
            }
            None => Ok(CommandOutput::default()),
        }
    }

    async fn push(&self, _lease: &NodeLease, path: &Path) -> MatrixResult<()> {
        self.pushed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn pull(&self, lease: &NodeLease, path: &Path) -> MatrixResult<()> {
        self.pulled.lock().unwrap().push(path.to_path_buf());
        if *self.fail_pull.lock().unwrap() {
            return Err(MatrixError::TransientRemote {
                host: lease.host_id.clone(),
                detail: "scripted pull failure".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakePool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PoolState {
    acquire_calls: u32,
    release_calls: u32,
    released: Vec<String>,
}

/// Pool that fails or hands out host-less sessions for its first calls.
#[derive(Debug, Default)]
pub struct FakePool {
    failures: u32,
    hostless: u32,
    fail_release: Mutex<bool>,
    state: Mutex<PoolState>,
}

impl FakePool {
    /// Fail the first `failures` acquisitions, then succeed.
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Return sessions without hosts for the first `count` acquisitions.
    pub fn hostless_first(count: u32) -> Self {
        Self {
            hostless: count,
            ..Self::default()
        }
    }

    /// Make every release call fail.
    pub fn fail_release(&self) {
        *self.fail_release.lock().unwrap() = true;
    }

    pub fn acquire_calls(&self) -> u32 {
        self.state.lock().unwrap().acquire_calls
    }

    pub fn release_calls(&self) -> u32 {
        self.state.lock().unwrap().release_calls
    }

    /// Session ids passed to `release`, in call order.
    pub fn released_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().released.clone()
    }
}

#[async_trait]
impl PoolApi for FakePool {
    async fn acquire(&self, request: &PoolRequest) -> MatrixResult<PoolAllocation> {
        let mut state = self.state.lock().unwrap();
        state.acquire_calls += 1;
        let call = state.acquire_calls;

        if call <= self.failures {
            return Err(MatrixError::Pool(format!(
                "pool {} has no capacity (call {call})",
                request.pool
            )));
        }

        let hosts = if call <= self.hostless {
            Vec::new()
        } else {
            vec![format!("node-{call}.{}", request.pool)]
        };
        Ok(PoolAllocation {
            session_id: format!("session-{call}"),
            hosts,
        })
    }

    async fn release(&self, session_id: &str) -> MatrixResult<()> {
        let mut state = self.state.lock().unwrap();
        state.release_calls += 1;
        if *self.fail_release.lock().unwrap() {
            return Err(MatrixError::Pool(format!("cannot release {session_id}")));
        }
        state.released.push(session_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Notifier that records every status it is given.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    statuses: Mutex<Vec<(String, NotifyStatus)>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record, then fail, every notification.
    pub fn fail_all(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn statuses(&self) -> Vec<(String, NotifyStatus)> {
        self.statuses.lock().unwrap().clone()
    }

    /// Last status posted per context.
    pub fn final_statuses(&self) -> HashMap<String, NotifyStatus> {
        self.statuses.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn notify(&self, context: &str, status: NotifyStatus) -> MatrixResult<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((context.to_string(), status));
        if *self.fail.lock().unwrap() {
            return Err(MatrixError::Notification("sink unavailable".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingPublisher
// ---------------------------------------------------------------------------

/// Publisher that records the directories it was asked to publish.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PathBuf>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PathBuf> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportPublisher for RecordingPublisher {
    async fn publish(&self, dir: &Path) -> MatrixResult<ReportSummary> {
        self.published.lock().unwrap().push(dir.to_path_buf());
        Ok(ReportSummary::default())
    }
}
