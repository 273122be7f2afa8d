use std::time::{Duration, Instant};

use crate::error::{ExecutionError, GradeError};
use crate::executor::{ExecutionLimits, Executor};
use crate::types::{RunReport, TestCase, TestOutcome, Verdict};

enum Abort {
    // `limit` is the per-test limit the executor actually ran with
    Timeout { test_number: usize, limit: Duration },
    BudgetSpent { test_number: usize },
    Fault(String),
}

/// Evaluates test cases one after another against a single executor.
#[derive(Clone, Debug)]
pub struct TestRunner {
    limits: ExecutionLimits,
    budget: Option<Duration>,
}

impl TestRunner {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            limits,
            budget: None,
        }
    }

    /// Caps the total wall time of one submission. Each test's limit shrinks to
    /// what is left, so the sandbox kill enforces the budget too.
    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    fn limits_for(&self, started: Instant) -> Option<ExecutionLimits> {
        match self.budget {
            None => Some(self.limits),
            Some(budget) => {
                let remaining = budget.checked_sub(started.elapsed())?;
                if remaining.is_zero() {
                    return None;
                }
                Some(self.limits.with_time_limit(remaining.min(self.limits.time_limit)))
            }
        }
    }

    pub async fn run(
        &self,
        executor: &dyn Executor,
        code: &str,
        cases: &[TestCase],
    ) -> Result<RunReport, GradeError> {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(cases.len());
        let mut passed_count = 0;
        let mut abort = None;

        for (index, case) in cases.iter().enumerate() {
            let test_number = index + 1;

            let applied = self.limits_for(started);
            let result = match &applied {
                Some(limits) => executor.execute(code, &case.input, limits).await,
                None => Err(ExecutionError::Timeout),
            };

            match result {
                Ok(actual) => {
                    let passed = actual.trim() == case.expected_output.trim();
                    if passed {
                        passed_count += 1;
                    }
                    outcomes.push(outcome(test_number, case, passed, actual, None));

                    if !passed && !case.is_hidden {
                        tracing::debug!(test_number, "visible test failed, stopping");
                        break;
                    }
                }
                Err(ExecutionError::Timeout) => {
                    outcomes.push(outcome(
                        test_number,
                        case,
                        false,
                        "Time Limit Exceeded".to_string(),
                        Some(ExecutionError::Timeout.to_string()),
                    ));
                    abort = Some(match applied {
                        Some(limits) => Abort::Timeout {
                            test_number,
                            limit: limits.time_limit,
                        },
                        None => Abort::BudgetSpent { test_number },
                    });
                    break;
                }
                Err(ExecutionError::RuntimeFault(message)) => {
                    outcomes.push(outcome(
                        test_number,
                        case,
                        false,
                        "Runtime Error".to_string(),
                        Some(message.clone()),
                    ));
                    abort = Some(Abort::Fault(message));
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let total_count = cases.len();

        let (verdict, message) = match abort {
            Some(Abort::Timeout { test_number, limit }) => (
                Verdict::TimeLimitExceeded,
                format!(
                    "Time Limit Exceeded: test {} exceeded {} ms",
                    test_number,
                    limit.as_millis()
                ),
            ),
            Some(Abort::BudgetSpent { test_number }) => (
                Verdict::TimeLimitExceeded,
                format!(
                    "Time Limit Exceeded: submission budget spent before test {}",
                    test_number
                ),
            ),
            Some(Abort::Fault(message)) => {
                (Verdict::RuntimeError, format!("Runtime Error: {}", message))
            }
            None if passed_count == total_count => {
                (Verdict::Accepted, "All test cases passed!".to_string())
            }
            None => (Verdict::WrongAnswer, "Some test cases failed".to_string()),
        };

        tracing::debug!(
            verdict = verdict.as_str(),
            passed_count,
            total_count,
            elapsed_ms,
            "run finished"
        );

        Ok(RunReport {
            verdict,
            passed_count,
            total_count,
            elapsed_ms,
            outcomes,
            message,
        })
    }
}

fn outcome(
    test_number: usize,
    case: &TestCase,
    passed: bool,
    actual_output: String,
    error: Option<String>,
) -> TestOutcome {
    TestOutcome {
        test_number,
        passed,
        is_hidden: case.is_hidden,
        input: case.input.clone(),
        expected_output: case.expected_output.clone(),
        actual_output,
        error,
    }
}
