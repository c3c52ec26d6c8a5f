//! Concurrent fan-out of one batch to the three analysis branches.
//!
//! Each branch runs in its own task, takes a slot from the shared worker
//! pool and has its own deadline. A branch that errors, panics or times out
//! yields an empty section and a failed `BranchReport`; the others are
//! unaffected. The fan-out always waits for all three.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::AnalysisError;
use crate::pipeline::types::{
    Analyzer, Branch, ClassificationResult, Classifier, OrganizationResult, Organizer, Record,
    Responder, ResponseCandidate,
};

/// The three analysis collaborators.
#[derive(Clone)]
pub struct Analyzers {
    pub classifier: Arc<Classifier>,
    pub organizer: Arc<Organizer>,
    pub responder: Arc<Responder>,
}

/// Outcome of one branch, as recorded in the workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchReport {
    pub branch: Branch,
    pub success: bool,
    /// Results the branch produced.
    pub items: usize,
    pub elapsed_secs: f64,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl BranchReport {
    fn from_result<T>(branch: Branch, elapsed: Duration, result: &Result<Vec<T>, AnalysisError>) -> Self {
        match result {
            Ok(items) => Self {
                branch,
                success: true,
                items: items.len(),
                elapsed_secs: elapsed.as_secs_f64(),
                error_kind: None,
                error: None,
            },
            Err(e) => Self {
                branch,
                success: false,
                items: 0,
                elapsed_secs: elapsed.as_secs_f64(),
                error_kind: Some(e.kind().to_string()),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Merged output of all branches.
#[derive(Debug, Clone, Default)]
pub struct FanOut {
    pub classifications: Vec<ClassificationResult>,
    pub organizations: Vec<OrganizationResult>,
    pub responses: Vec<ResponseCandidate>,
    /// In `Branch::ALL` order.
    pub reports: Vec<BranchReport>,
}

impl FanOut {
    pub fn all_failed(&self) -> bool {
        !self.reports.is_empty() && self.reports.iter().all(|r| !r.success)
    }

    pub fn report(&self, branch: Branch) -> Option<&BranchReport> {
        self.reports.iter().find(|r| r.branch == branch)
    }
}

/// Run every branch over `records` and wait for all of them.
pub async fn fan_out(
    analyzers: &Analyzers,
    records: Arc<[Record]>,
    pool: Arc<Semaphore>,
    timeout: Duration,
) -> FanOut {
    let (classifications, organizations, responses) = tokio::join!(
        run_branch(
            Branch::Classification,
            analyzers.classifier.clone(),
            records.clone(),
            pool.clone(),
            timeout,
        ),
        run_branch(
            Branch::Organization,
            analyzers.organizer.clone(),
            records.clone(),
            pool.clone(),
            timeout,
        ),
        run_branch(
            Branch::Response,
            analyzers.responder.clone(),
            records,
            pool,
            timeout,
        ),
    );

    FanOut {
        reports: vec![
            classifications.report,
            organizations.report,
            responses.report,
        ],
        classifications: classifications.items,
        organizations: organizations.items,
        responses: responses.items,
    }
}

struct BranchOutcome<T> {
    report: BranchReport,
    items: Vec<T>,
}

async fn run_branch<A>(
    branch: Branch,
    analyzer: Arc<A>,
    records: Arc<[Record]>,
    pool: Arc<Semaphore>,
    timeout: Duration,
) -> BranchOutcome<A::Output>
where
    A: Analyzer + ?Sized + 'static,
{
    let started = Instant::now();

    let task = tokio::spawn(async move {
        let _permit = pool
            .acquire_owned()
            .await
            .map_err(|e| AnalysisError::Connectivity {
                branch: branch.to_string(),
                reason: format!("worker pool closed: {e}"),
            })?;
        match tokio::time::timeout(timeout, analyzer.analyze(&records)).await {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout {
                branch: branch.to_string(),
                timeout,
            }),
        }
    });

    let result = match task.await {
        Ok(result) => result,
        Err(e) => Err(AnalysisError::Panicked {
            branch: branch.to_string(),
            reason: e.to_string(),
        }),
    };

    let report = BranchReport::from_result(branch, started.elapsed(), &result);
    match result {
        Ok(items) => {
            debug!(branch = %branch, items = items.len(), "Analysis branch completed");
            BranchOutcome { report, items }
        }
        Err(e) => {
            warn!(branch = %branch, kind = e.kind(), error = %e, "Analysis branch failed");
            BranchOutcome {
                report,
                items: Vec::new(),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Analyzer returning a fixed result after an optional delay.
    pub(crate) struct Fixed<T> {
        pub result: Result<Vec<T>, AnalysisError>,
        pub delay: Duration,
    }

    impl<T> Fixed<T> {
        pub(crate) fn ok(items: Vec<T>) -> Self {
            Self {
                result: Ok(items),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn failing(branch: &str) -> Self {
            Self {
                result: Err(AnalysisError::Connectivity {
                    branch: branch.to_string(),
                    reason: "connection refused".into(),
                }),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn slow(items: Vec<T>, delay: Duration) -> Self {
            Self {
                result: Ok(items),
                delay,
            }
        }
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> Analyzer for Fixed<T> {
        type Output = T;

        async fn analyze(&self, _records: &[Record]) -> Result<Vec<T>, AnalysisError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.clone()
        }
    }

    struct Panicking;

    #[async_trait]
    impl Analyzer for Panicking {
        type Output = ResponseCandidate;

        async fn analyze(&self, _records: &[Record]) -> Result<Vec<ResponseCandidate>, AnalysisError> {
            panic!("responder blew up");
        }
    }

    pub(crate) fn classification(record_id: &str, category: &str, confidence: f64) -> ClassificationResult {
        ClassificationResult {
            record_id: record_id.into(),
            category: Some(category.into()),
            priority_score: Some(3.0),
            sentiment: None,
            keywords: vec![],
            confidence,
        }
    }

    fn records() -> Arc<[Record]> {
        vec![Record::new("r1", "a@x.com", "hello")].into()
    }

    #[tokio::test]
    async fn one_failing_branch_keeps_the_others() {
        let analyzers = Analyzers {
            classifier: Arc::new(Fixed::ok(vec![classification("r1", "work", 0.9)])),
            organizer: Arc::new(Fixed::<OrganizationResult>::failing("organization")),
            responder: Arc::new(Fixed::<ResponseCandidate>::ok(vec![])),
        };
        let out = fan_out(&analyzers, records(), Arc::new(Semaphore::new(3)), Duration::from_secs(30)).await;

        assert_eq!(out.classifications.len(), 1);
        assert!(out.organizations.is_empty());
        assert!(!out.all_failed());
        let org = out.report(Branch::Organization).unwrap();
        assert!(!org.success);
        assert_eq!(org.error_kind.as_deref(), Some("connectivity"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_branch_times_out_alone() {
        let analyzers = Analyzers {
            classifier: Arc::new(Fixed::slow(
                vec![classification("r1", "work", 0.9)],
                Duration::from_secs(60),
            )),
            organizer: Arc::new(Fixed::<OrganizationResult>::ok(vec![])),
            responder: Arc::new(Fixed::<ResponseCandidate>::ok(vec![])),
        };
        let out = fan_out(&analyzers, records(), Arc::new(Semaphore::new(3)), Duration::from_secs(30)).await;

        assert!(out.classifications.is_empty());
        let report = out.report(Branch::Classification).unwrap();
        assert_eq!(report.error_kind.as_deref(), Some("timeout"));
        assert!(out.report(Branch::Organization).unwrap().success);
    }

    #[tokio::test]
    async fn panicking_branch_is_contained() {
        let analyzers = Analyzers {
            classifier: Arc::new(Fixed::<ClassificationResult>::failing("classification")),
            organizer: Arc::new(Fixed::<OrganizationResult>::failing("organization")),
            responder: Arc::new(Panicking),
        };
        let out = fan_out(&analyzers, records(), Arc::new(Semaphore::new(3)), Duration::from_secs(30)).await;

        assert!(out.all_failed());
        assert_eq!(
            out.report(Branch::Response).unwrap().error_kind.as_deref(),
            Some("panicked")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn single_slot_pool_runs_branches_in_turn() {
        let delay = Duration::from_secs(10);
        let analyzers = Analyzers {
            classifier: Arc::new(Fixed::<ClassificationResult>::slow(vec![], delay)),
            organizer: Arc::new(Fixed::<OrganizationResult>::slow(vec![], delay)),
            responder: Arc::new(Fixed::<ResponseCandidate>::slow(vec![], delay)),
        };
        let started = Instant::now();
        let out = fan_out(&analyzers, records(), Arc::new(Semaphore::new(1)), Duration::from_secs(15)).await;

        assert!(out.reports.iter().all(|r| r.success));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
