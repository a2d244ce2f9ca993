/// Compile-Run-Extract Pipeline
///
/// **Stages (strictly in order, any failure aborts the rest):**
/// 1. Uploading  - pack source + input file, copy into the working directory
/// 2. Compiling  - run the language's compiler; exit status decides success
/// 3. Running    - run the binary under `timeout`, stdin/stdout redirected to files
/// 4. Extracting - copy the output file back and unpack it
/// 5. Done
///
/// **Deadlines:**
/// The run bound is enforced twice: by `timeout` inside the container, which
/// kills the program, and by comparing the measured wall-clock time against
/// the same bound afterwards. Every other call into the container gets its
/// own step deadline so an unresponsive daemon cannot hang a request.
///
/// **Sharing:**
/// All jobs use the one executor container and the same working directory,
/// so executions are serialized by `exec_lock`.

use crate::archive;
use crate::config::LanguageConfigManager;
use crate::environment::EnvironmentHandle;
use crate::error::EngineError;
use crate::sandbox::Sandbox;
use arena_common::config::{ExecutorSettings, LanguageConfig};
use arena_common::types::{Job, PipelineResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Safety limits to prevent pathological inputs from reaching Docker
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

pub const INPUT_FILE: &str = "input.txt";
pub const OUTPUT_FILE: &str = "output.txt";

/// Exit status of coreutils `timeout` when the bound was hit
const TIMEOUT_EXIT_CODE: i64 = 124;

/// Slack on top of an in-container bound before the host-side deadline fires
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uploading,
    Compiling,
    Running,
    Extracting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Uploading => "uploading",
            Stage::Compiling => "compiling",
            Stage::Running => "running",
            Stage::Extracting => "extracting",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

pub struct Pipeline {
    sandbox: Arc<dyn Sandbox>,
    languages: LanguageConfigManager,
    work_dir: String,
    run_timeout: Duration,
    step_timeout: Duration,
    exec_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(sandbox: Arc<dyn Sandbox>, languages: LanguageConfigManager, settings: &ExecutorSettings) -> Self {
        Self {
            sandbox,
            languages,
            work_dir: settings.work_dir.clone(),
            run_timeout: settings.run_timeout,
            step_timeout: settings.step_timeout,
            exec_lock: Mutex::new(()),
        }
    }

    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    /// Compile and run one job, returning its raw captured stdout.
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, language = %job.language))]
    pub async fn execute(&self, job: &Job) -> Result<PipelineResult, EngineError> {
        validate(job)?;
        let language = self
            .languages
            .get_config(&job.language)
            .map_err(|e| EngineError::Validation(e.to_string()))?;

        let env = self
            .within(Stage::Uploading, self.sandbox.acquire())
            .await?;

        let _exclusive = self.exec_lock.lock().await;
        let started = Instant::now();

        debug!(stage = %Stage::Uploading, container_id = %env.id, "Pipeline stage");
        self.upload(&env, job, language).await?;

        debug!(stage = %Stage::Compiling, "Pipeline stage");
        self.compile(&env, language).await?;

        debug!(stage = %Stage::Running, "Pipeline stage");
        let memory_before = self.sandbox.memory_usage(&env).await;
        let (runtime, stderr) = self.run(&env, language).await?;
        let memory_after = self.sandbox.memory_usage(&env).await;

        debug!(stage = %Stage::Extracting, "Pipeline stage");
        let output = self.extract(&env).await?;

        let memory_usage_bytes = match (memory_before, memory_after) {
            (Some(before), Some(after)) => Some(after.saturating_sub(before)),
            _ => None,
        };

        info!(
            stage = %Stage::Done,
            runtime_ms = runtime.as_millis() as u64,
            output_bytes = output.len(),
            total_ms = started.elapsed().as_millis() as u64,
            "Execution completed"
        );

        Ok(PipelineResult {
            output,
            runtime_seconds: runtime.as_secs_f64(),
            error: (!stderr.trim().is_empty()).then_some(stderr),
            memory_usage_bytes,
        })
    }

    async fn upload(&self, env: &EnvironmentHandle, job: &Job, language: &LanguageConfig) -> Result<(), EngineError> {
        let tar = archive::pack(&[
            (language.source_file.as_str(), job.source_code.as_bytes()),
            (INPUT_FILE, job.stdin().as_bytes()),
        ])
        .await?;

        self.within(Stage::Uploading, self.sandbox.upload(env, &self.work_dir, tar))
            .await
    }

    async fn compile(&self, env: &EnvironmentHandle, language: &LanguageConfig) -> Result<(), EngineError> {
        // Stale artifacts from the previous job must not survive a failed step.
        // The compiler is killed inside the container so it cannot outlive exec_lock.
        let command = format!(
            "rm -f {} {}; {}",
            language.binary_name,
            OUTPUT_FILE,
            bounded(self.step_timeout, &language.compile_command)
        );

        let deadline = self.step_timeout + DEADLINE_GRACE;
        let result = match tokio::time::timeout(deadline, self.sandbox.run(env, &self.work_dir, &command)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(limit_s = self.step_timeout.as_secs(), "Compilation exceeded host-side deadline");
                return Err(self.compile_timeout());
            }
        };

        if result.exit_code == Some(TIMEOUT_EXIT_CODE) {
            warn!(limit_s = self.step_timeout.as_secs(), "Compilation timed out");
            return Err(self.compile_timeout());
        }

        if result.success() {
            return Ok(());
        }

        let diagnostics = result.text();
        warn!(
            exit_code = ?result.exit_code,
            error_preview = diagnostics.lines().next().unwrap_or(""),
            "Compilation failed"
        );
        Err(EngineError::Compile { diagnostics })
    }

    fn compile_timeout(&self) -> EngineError {
        EngineError::Compile {
            diagnostics: format!("compilation did not finish within {}s", self.step_timeout.as_secs()),
        }
    }

    /// Run the binary; returns wall-clock runtime and captured stderr.
    async fn run(&self, env: &EnvironmentHandle, language: &LanguageConfig) -> Result<(Duration, String), EngineError> {
        let command = format!(
            "timeout --signal=KILL {:.3} ./{} < {} > {}",
            self.run_timeout.as_secs_f64(),
            language.binary_name,
            INPUT_FILE,
            OUTPUT_FILE
        );

        let start = Instant::now();
        let deadline = self.run_timeout + DEADLINE_GRACE;
        let outcome = tokio::time::timeout(deadline, self.sandbox.run(env, &self.work_dir, &command)).await;
        let runtime = start.elapsed();

        let result = match outcome {
            Ok(result) => result?,
            Err(_) => {
                warn!(runtime_ms = runtime.as_millis() as u64, "Execution exceeded host-side deadline");
                return Err(EngineError::Timeout { limit: self.run_timeout });
            }
        };

        if result.exit_code == Some(TIMEOUT_EXIT_CODE) || runtime > self.run_timeout {
            warn!(
                runtime_ms = runtime.as_millis() as u64,
                limit_ms = self.run_timeout.as_millis() as u64,
                exit_code = ?result.exit_code,
                "Execution timed out"
            );
            return Err(EngineError::Timeout { limit: self.run_timeout });
        }

        match result.exit_code {
            Some(0) => Ok((runtime, result.text())),
            Some(exit_code) => {
                warn!(exit_code, "Execution had runtime error");
                Err(EngineError::Runtime {
                    exit_code,
                    stderr: result.text(),
                })
            }
            None => Err(EngineError::Infrastructure("no exit status reported for program run".to_string())),
        }
    }

    async fn extract(&self, env: &EnvironmentHandle) -> Result<Vec<u8>, EngineError> {
        let path = format!("{}/{}", self.work_dir.trim_end_matches('/'), OUTPUT_FILE);
        let tar = self
            .within(Stage::Extracting, self.sandbox.download(env, &path))
            .await?;
        Ok(archive::unpack(&tar, OUTPUT_FILE).await?)
    }

    async fn within<T, F>(&self, stage: Stage, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        tokio::time::timeout(self.step_timeout, fut).await.map_err(|_| {
            EngineError::Infrastructure(format!(
                "{} stage did not finish within {}s",
                stage,
                self.step_timeout.as_secs()
            ))
        })?
    }
}

/// Wrap a shell command so coreutils `timeout` kills it after `limit`.
fn bounded(limit: Duration, command: &str) -> String {
    format!(
        "timeout --signal=KILL {:.3} bash -c '{}'",
        limit.as_secs_f64(),
        command.replace('\'', r"'\''")
    )
}

fn validate(job: &Job) -> Result<(), EngineError> {
    if job.source_code.trim().is_empty() {
        return Err(EngineError::Validation("Code is required".to_string()));
    }
    if job.source_code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(EngineError::Validation(format!(
            "Source code exceeds maximum size of {} bytes",
            MAX_SOURCE_CODE_BYTES
        )));
    }
    let input_bytes: usize = job.stdin_lines.iter().map(|l| l.len() + 1).sum();
    if input_bytes > MAX_INPUT_BYTES {
        return Err(EngineError::Validation(format!(
            "Input exceeds maximum size of {} bytes",
            MAX_INPUT_BYTES
        )));
    }
    Ok(())
}
