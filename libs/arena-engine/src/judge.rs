/// Judge - hidden-test verdicts
///
/// **Comparison Rules:**
/// - Exact byte comparison of raw stdout against the stored hidden output
/// - No trimming, no line-ending normalization, no partial credit
/// - Sanitation never touches the compared bytes
///
/// A program that fails to compile, crashes or times out gets
/// `RuntimeOrCompileError`. Only infrastructure faults are returned as `Err`,
/// since they say nothing about the submission.

use crate::error::EngineError;
use crate::pipeline::Pipeline;
use arena_common::types::{Job, Problem, Verdict};
use std::sync::Arc;
use tracing::{info, warn};

/// Verdict plus what the submitter is allowed to see about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgement {
    pub verdict: Verdict,
    /// Compiler/runtime/timeout message for `RuntimeOrCompileError`
    pub detail: Option<String>,
    pub runtime_seconds: Option<f64>,
}

/// Compare captured output with the expected output
pub fn evaluate(actual: &[u8], expected: &[u8]) -> Verdict {
    if actual == expected {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

#[derive(Clone)]
pub struct Judge {
    pipeline: Arc<Pipeline>,
}

impl Judge {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Run `submission` against the problem's hidden input and grade it.
    ///
    /// The submission's own stdin lines are ignored.
    #[tracing::instrument(skip(self, problem, submission), fields(problem_id = problem.id, job_id = %submission.id))]
    pub async fn judge(&self, problem: &Problem, submission: &Job) -> Result<Judgement, EngineError> {
        let job = Job {
            stdin_lines: vec![problem.hidden_input.clone()],
            ..submission.clone()
        };

        match self.pipeline.execute(&job).await {
            Ok(result) => {
                let verdict = evaluate(&result.output, problem.hidden_output.as_bytes());
                info!(verdict = %verdict, runtime_s = result.runtime_seconds, "Submission judged");
                Ok(Judgement {
                    verdict,
                    detail: None,
                    runtime_seconds: Some(result.runtime_seconds),
                })
            }
            Err(e) if e.is_infrastructure() => Err(e),
            // Bad requests are the caller's problem, not a verdict
            Err(e @ EngineError::Validation(_)) => Err(e),
            Err(e) => {
                warn!(error = %e, "Submission failed to run");
                Ok(Judgement {
                    verdict: Verdict::RuntimeOrCompileError,
                    detail: Some(e.to_string()),
                    runtime_seconds: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfigManager;
    use crate::sandbox::scripted::{RunBehaviour, ScriptedSandbox};
    use arena_common::config::ExecutorSettings;
    use arena_common::types::{Language, NewProblem};

    fn problem(hidden_input: &str, hidden_output: &str) -> Problem {
        NewProblem {
            name: "Echo".to_string(),
            hidden_input: hidden_input.to_string(),
            hidden_output: hidden_output.to_string(),
            ..Default::default()
        }
        .into_problem(1)
    }

    fn judge_with(sandbox: Arc<ScriptedSandbox>) -> Judge {
        let pipeline = Pipeline::new(sandbox, LanguageConfigManager::builtin(), &ExecutorSettings::default());
        Judge::new(Arc::new(pipeline))
    }

    fn submission() -> Job {
        Job::new("int main(){}", vec!["ignored".to_string()], Language::Cpp)
    }

    #[test]
    fn test_evaluate_is_exact() {
        assert_eq!(evaluate(b"3\n", b"3\n"), Verdict::Accepted);
        assert_eq!(evaluate(b"3", b"3\n"), Verdict::WrongAnswer);
        assert_eq!(evaluate(b"3\r\n", b"3\n"), Verdict::WrongAnswer);
        assert_eq!(evaluate(b" 3\n", b"3\n"), Verdict::WrongAnswer);
    }

    #[tokio::test]
    async fn test_invalid_utf8_never_matches_replacement_text() {
        let sandbox = Arc::new(ScriptedSandbox::new().compiles_ok().then_run(RunBehaviour::Exit {
            stdout: vec![0xff, 0xfe, b'\n'],
            stderr: Vec::new(),
            exit_code: 0,
        }));
        let judgement = judge_with(sandbox)
            .judge(&problem("", "\u{FFFD}\u{FFFD}\n"), &submission())
            .await
            .unwrap();
        assert_eq!(judgement.verdict, Verdict::WrongAnswer);
    }

    #[tokio::test]
    async fn test_hidden_input_replaces_submission_stdin() {
        let sandbox = Arc::new(ScriptedSandbox::new().then_run(RunBehaviour::Echo));
        judge_with(sandbox.clone()).judge(&problem("4 5", "9\n"), &submission()).await.unwrap();
        assert_eq!(sandbox.file("input.txt").unwrap(), b"4 5");
    }

    #[tokio::test]
    async fn test_stored_output_verbatim_is_accepted() {
        let expected = "line one\nline two\n\n";
        let sandbox = Arc::new(ScriptedSandbox::new().prints(expected));
        let judgement = judge_with(sandbox).judge(&problem("", expected), &submission()).await.unwrap();
        assert_eq!(judgement.verdict, Verdict::Accepted);
        assert!(judgement.detail.is_none());
    }

    #[tokio::test]
    async fn test_missing_trailing_newline_is_wrong_answer() {
        let sandbox = Arc::new(ScriptedSandbox::new().prints("42"));
        let judgement = judge_with(sandbox).judge(&problem("", "42\n"), &submission()).await.unwrap();
        assert_eq!(judgement.verdict, Verdict::WrongAnswer);
    }

    #[tokio::test]
    async fn test_compile_error_verdict_keeps_diagnostics() {
        let sandbox = Arc::new(ScriptedSandbox::new().compile_fails("main.cpp:1: error: 'x' was not declared"));
        let judgement = judge_with(sandbox).judge(&problem("", "1\n"), &submission()).await.unwrap();
        assert_eq!(judgement.verdict, Verdict::RuntimeOrCompileError);
        assert!(judgement.detail.unwrap().contains("'x' was not declared"));
    }

    #[tokio::test]
    async fn test_crash_is_runtime_or_compile_error() {
        let sandbox = Arc::new(ScriptedSandbox::new().compiles_ok().then_run(RunBehaviour::Exit {
            stdout: b"1\n".to_vec(),
            stderr: Vec::new(),
            exit_code: 134,
        }));
        let judgement = judge_with(sandbox).judge(&problem("", "1\n"), &submission()).await.unwrap();
        assert_eq!(judgement.verdict, Verdict::RuntimeOrCompileError);
    }

    #[tokio::test]
    async fn test_infrastructure_fault_is_not_a_verdict() {
        let sandbox = Arc::new(ScriptedSandbox {
            broken: true,
            ..ScriptedSandbox::new()
        });
        let result = judge_with(sandbox).judge(&problem("", ""), &submission()).await;
        assert!(result.unwrap_err().is_infrastructure());
    }
}
