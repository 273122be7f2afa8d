use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::grader::GradingService;

/// Placeholder written over every hidden test field before it leaves the grader.
pub const REDACTED: &str = "Hidden";

#[derive(Deserialize, Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub redis_url: String,
    pub base_code_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Problem set for the memory backend: a JSON array file or a directory
    /// of one-problem JSON files.
    #[serde(default)]
    pub problems_path: Option<String>,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub grading: GradingConfig,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_monitor_interval_secs() -> u64 {
    5
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SandboxConfig {
    pub time_limit_ms: u64,              // per test case
    pub memory_limit_kb: u64,            // address space / heap cap
    pub output_limit_bytes: usize,       // captured stdout cap
    pub languages: Vec<LanguageConfig>,  // enabled interpreters
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            time_limit_ms: 3000,
            memory_limit_kb: 256 * 1024,
            output_limit_bytes: 64 * 1024,
            languages: vec![LanguageConfig {
                language: Language::JavaScript,
                program: "/usr/bin/node".to_string(),
            }],
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct LanguageConfig {
    pub language: Language,
    pub program: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GradingConfig {
    pub submission_budget_ms: Option<u64>,
    pub max_recent_activity: usize,
    pub persistence_retries: u32,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            submission_budget_ms: None,
            max_recent_activity: 50,
            persistence_retries: 1,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub grader: Arc<GradingService>,
    pub prometheus_handle: PrometheusHandle,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    JavaScript,
    Python,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::Python => "python",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ExecutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "python" | "py" | "python3" => Ok(Language::Python),
            other => Err(ExecutionError::UnsupportedLanguage(other.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SampleTestCase {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HiddenTestCase {
    pub input: String,
    pub output: String,
}

/// Problem record as owned by the content service. Only the fields the grader
/// reads are modelled; anything else in the stored document is ignored.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Problem {
    pub id: String,
    pub title: String,
    #[serde(default = "default_points")]
    pub points: u64,
    #[serde(default)]
    pub sample_test_cases: Vec<SampleTestCase>,
    #[serde(default)]
    pub hidden_test_cases: Vec<HiddenTestCase>,
}

fn default_points() -> u64 {
    10
}

impl Problem {
    /// Samples first, then hidden cases, each in stored order.
    pub fn test_cases(&self) -> Vec<TestCase> {
        let samples = self.sample_test_cases.iter().map(|tc| TestCase {
            input: tc.input.clone(),
            expected_output: tc.output.clone(),
            is_hidden: false,
        });
        let hidden = self.hidden_test_cases.iter().map(|tc| TestCase {
            input: tc.input.clone(),
            expected_output: tc.output.clone(),
            is_hidden: true,
        });
        samples.chain(hidden).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    pub is_hidden: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub test_number: usize,
    pub passed: bool,
    pub is_hidden: bool,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestOutcome {
    fn redacted(mut self) -> Self {
        if self.is_hidden {
            self.input = REDACTED.to_string();
            self.expected_output = REDACTED.to_string();
            self.actual_output = REDACTED.to_string();
        }
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong-answer",
            Verdict::RuntimeError => "runtime-error",
            Verdict::TimeLimitExceeded => "time-limit-exceeded",
        }
    }
}

/// Unredacted result of one runner pass. Never serialized.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub verdict: Verdict,
    pub passed_count: usize,
    pub total_count: usize,
    pub elapsed_ms: u64,
    pub outcomes: Vec<TestOutcome>,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRunSummary {
    pub verdict: Verdict,
    pub passed_count: usize,
    pub total_count: usize,
    pub elapsed_ms: u64,
    pub outcomes: Vec<TestOutcome>,
    pub message: String,
}

impl From<RunReport> for SubmissionRunSummary {
    fn from(report: RunReport) -> Self {
        Self {
            verdict: report.verdict,
            passed_count: report.passed_count,
            total_count: report.total_count,
            elapsed_ms: report.elapsed_ms,
            outcomes: report
                .outcomes
                .into_iter()
                .map(TestOutcome::redacted)
                .collect(),
            message: report.message,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SubmissionRequest {
    pub problem_id: String,
    pub user_id: String,
    pub code: String,
    pub language: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProblemStats {
    pub total_submissions: u64,
    pub successful_submissions: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SolveRecord {
    pub problem_id: String,
    pub language: Language,
    pub code: String,
    pub points: u64,
    pub solved_on: NaiveDate,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SolvedProblem {
    pub language: Language,
    pub code: String,
    pub attempts: u32,
    pub solved_on: NaiveDate,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ActivityEntry {
    pub kind: String,
    pub item_id: String,
    pub description: String,
    pub at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn problem_solved(problem: &Problem, at: DateTime<Utc>) -> Self {
        Self {
            kind: "problem_solved".to_string(),
            item_id: problem.id.clone(),
            description: format!("Solved: {}", problem.title),
            at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(test_number: usize, is_hidden: bool, passed: bool) -> TestOutcome {
        TestOutcome {
            test_number,
            passed,
            is_hidden,
            input: "10 20".to_string(),
            expected_output: "30".to_string(),
            actual_output: "31".to_string(),
            error: None,
        }
    }

    #[test]
    fn problem_lists_samples_before_hidden_cases() {
        let problem = Problem {
            id: "p1".to_string(),
            title: "Sum".to_string(),
            points: 10,
            sample_test_cases: vec![SampleTestCase {
                input: "2 3".to_string(),
                output: "5".to_string(),
                explanation: None,
            }],
            hidden_test_cases: vec![
                HiddenTestCase {
                    input: "10 20".to_string(),
                    output: "30".to_string(),
                },
                HiddenTestCase {
                    input: "1 1".to_string(),
                    output: "2".to_string(),
                },
            ],
        };

        let cases = problem.test_cases();
        assert_eq!(cases.len(), 3);
        assert!(!cases[0].is_hidden);
        assert_eq!(cases[1].input, "10 20");
        assert!(cases[1].is_hidden && cases[2].is_hidden);
    }

    #[test]
    fn problem_defaults_points_when_missing() {
        let problem: Problem =
            serde_json::from_str(r#"{"id":"p","title":"t","sample_test_cases":[]}"#).unwrap();
        assert_eq!(problem.points, 10);
        assert!(problem.hidden_test_cases.is_empty());
    }

    #[test]
    fn summary_redacts_hidden_outcomes_only() {
        let report = RunReport {
            verdict: Verdict::WrongAnswer,
            passed_count: 1,
            total_count: 3,
            elapsed_ms: 4,
            outcomes: vec![outcome(1, false, true), outcome(2, true, true), outcome(3, true, false)],
            message: "Some test cases failed".to_string(),
        };

        let summary = SubmissionRunSummary::from(report);
        assert_eq!(summary.outcomes[0].actual_output, "31");
        for hidden in &summary.outcomes[1..] {
            assert_eq!(hidden.input, REDACTED);
            assert_eq!(hidden.expected_output, REDACTED);
            assert_eq!(hidden.actual_output, REDACTED);
        }
    }

    #[test]
    fn verdict_serializes_kebab_case() {
        let json = serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"time-limit-exceeded\"");
    }

    #[test]
    fn memory_backend_config_carries_problem_set() {
        let config: AppConfig = serde_json::from_str(
            r#"{"port":8080,"redis_url":"redis://127.0.0.1/","base_code_path":"/tmp/gradebox",
                "storage":"memory","problems_path":"problems.json"}"#,
        )
        .unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.problems_path.as_deref(), Some("problems.json"));
        assert_eq!(config.grading.max_recent_activity, 50);
    }

    #[test]
    fn language_parses_aliases_and_rejects_unknown() {
        assert_eq!("JS".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!("python3".parse::<Language>().unwrap(), Language::Python);
        assert_eq!(
            "cobol".parse::<Language>(),
            Err(ExecutionError::UnsupportedLanguage("cobol".to_string()))
        );
    }
}
