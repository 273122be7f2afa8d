use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};

use crate::error::{GradeError, StoreError};
use crate::executor::{ExecutionLimits, ExecutorRegistry};
use crate::runner::TestRunner;
use crate::store::Store;
use crate::types::{
    ActivityEntry, GradingConfig, Language, Problem, SandboxConfig, SolveRecord,
    SubmissionRequest, SubmissionRunSummary, Verdict,
};

pub struct GradingService {
    store: Arc<dyn Store>,
    executors: Arc<ExecutorRegistry>,
    runner: TestRunner,
    config: GradingConfig,
}

impl GradingService {
    pub fn new(
        store: Arc<dyn Store>,
        executors: Arc<ExecutorRegistry>,
        sandbox: &SandboxConfig,
        config: GradingConfig,
    ) -> Self {
        let runner = TestRunner::new(ExecutionLimits::from_config(sandbox))
            .with_budget(config.submission_budget_ms.map(Duration::from_millis));
        Self {
            store,
            executors,
            runner,
            config,
        }
    }

    pub async fn submit_solution(
        &self,
        request: SubmissionRequest,
    ) -> Result<SubmissionRunSummary, GradeError> {
        let started = Instant::now();
        validate(&request)?;

        let problem = self
            .with_retry("load_problem", || self.store.load_problem(&request.problem_id))
            .await?
            .ok_or_else(|| GradeError::ProblemNotFound(request.problem_id.clone()))?;

        let language: Language = request.language.parse()?;
        let executor = self.executors.get(language)?;

        let cases = problem.test_cases();
        tracing::info!(
            problem_id = %problem.id,
            user_id = %request.user_id,
            %language,
            test_count = cases.len(),
            "grading submission"
        );

        let report = self.runner.run(executor.as_ref(), &request.code, &cases).await?;
        let accepted = report.verdict == Verdict::Accepted;

        self.with_retry("increment_submission_stats", || {
            self.store.increment_submission_stats(&problem.id, accepted)
        })
        .await?;

        if accepted {
            self.record_acceptance(&request, &problem, language).await?;
        }

        counter!("submissions_total", "verdict" => report.verdict.as_str()).increment(1);
        histogram!("grading_duration_ms").record(started.elapsed().as_millis() as f64);
        tracing::info!(
            problem_id = %problem.id,
            verdict = report.verdict.as_str(),
            passed = report.passed_count,
            total = report.total_count,
            elapsed_ms = report.elapsed_ms,
            "submission graded"
        );

        Ok(report.into())
    }

    async fn record_acceptance(
        &self,
        request: &SubmissionRequest,
        problem: &Problem,
        language: Language,
    ) -> Result<(), GradeError> {
        let now = Utc::now();
        let solve = SolveRecord {
            problem_id: problem.id.clone(),
            language,
            code: request.code.clone(),
            points: problem.points,
            solved_on: now.date_naive(),
        };

        let entry = ActivityEntry::problem_solved(problem, now);

        let first_solve = self
            .with_retry("record_solve", || {
                self.store.record_solve(
                    &request.user_id,
                    &solve,
                    &entry,
                    self.config.max_recent_activity,
                )
            })
            .await?;
        if !first_solve {
            tracing::debug!(user_id = %request.user_id, problem_id = %problem.id, "already solved");
        }
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, GradeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.persistence_retries => {
                    attempt += 1;
                    tracing::warn!(operation, attempt, "store call failed, retrying: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn validate(request: &SubmissionRequest) -> Result<(), GradeError> {
    if request.code.trim().is_empty() || request.language.trim().is_empty() {
        return Err(GradeError::InvalidSubmission(
            "code and language are required".to_string(),
        ));
    }
    if request.user_id.trim().is_empty() {
        return Err(GradeError::InvalidSubmission(
            "user id is required".to_string(),
        ));
    }
    Ok(())
}
