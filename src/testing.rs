use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ExecutionError;
use crate::executor::{ExecutionLimits, Executor};
use crate::types::{HiddenTestCase, Language, Problem, SampleTestCase};

type Script = dyn Fn(&str, &str) -> Result<String, ExecutionError> + Send + Sync;

/// In-process stand-in for a sandboxed executor. Records every input it sees.
pub struct ScriptedExecutor {
    language: Language,
    script: Box<Script>,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new<F>(language: Language, script: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            language,
            script: Box::new(script),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// A JavaScript "interpreter" that understands just enough to grade a+b:
    /// `throw` faults, `while (true)` times out, `return 4` prints 4 and
    /// anything else sums the whitespace separated integers of the input.
    pub fn sum() -> Self {
        Self::new(Language::JavaScript, |code, input| {
            if code.contains("throw") {
                return Err(ExecutionError::RuntimeFault("Error: boom".to_string()));
            }
            if code.contains("while (true)") {
                return Err(ExecutionError::Timeout);
            }
            if code.contains("return 4") {
                return Ok("4".to_string());
            }
            let total: i64 = input
                .split_whitespace()
                .filter_map(|t| t.parse::<i64>().ok())
                .sum();
            Ok(total.to_string())
        })
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn language(&self) -> Language {
        self.language
    }

    async fn execute(
        &self,
        code: &str,
        input: &str,
        _limits: &ExecutionLimits,
    ) -> Result<String, ExecutionError> {
        self.inputs.lock().unwrap().push(input.to_string());
        (self.script)(code, input)
    }
}

pub const SUM_SOLUTION: &str = "function solution(a, b) { return a + b; }";

/// Sample `2 3 -> 5`, hidden `10 20 -> 30`.
pub fn sum_problem() -> Problem {
    Problem {
        id: "sum".to_string(),
        title: "Sum of Two Numbers".to_string(),
        points: 10,
        sample_test_cases: vec![SampleTestCase {
            input: "2 3".to_string(),
            output: "5".to_string(),
            explanation: None,
        }],
        hidden_test_cases: vec![HiddenTestCase {
            input: "10 20".to_string(),
            output: "30".to_string(),
        }],
    }
}
