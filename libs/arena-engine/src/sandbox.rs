/// Sandbox - the seam between the pipeline and the container runtime
///
/// The pipeline only ever needs five things from the execution environment:
/// find-or-create it, copy an archive in, copy one back out, run a shell
/// command and sample memory. Production uses `DockerSandbox`; tests plug in
/// a scripted implementation.

use crate::environment::EnvironmentHandle;
use crate::error::EngineError;
use async_trait::async_trait;

/// Combined stdout/stderr of a shell command and its exit status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    /// `None` when the runtime could not report a status
    pub exit_code: Option<i64>,
}

impl CommandOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Find the shared environment, creating it if absent.
    async fn acquire(&self) -> Result<EnvironmentHandle, EngineError>;

    /// Extract a tar archive into `dir` inside the environment.
    async fn upload(&self, env: &EnvironmentHandle, dir: &str, archive: Vec<u8>) -> Result<(), EngineError>;

    /// Fetch `path` from the environment as a tar archive.
    async fn download(&self, env: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, EngineError>;

    /// Run `command` through `bash -c` in `working_dir` and collect its
    /// combined output until the stream closes. Setup faults are `Err`; a
    /// command that ran and failed is `Ok` with a non-zero exit code.
    async fn run(&self, env: &EnvironmentHandle, working_dir: &str, command: &str) -> Result<CommandOutput, EngineError>;

    /// Current memory usage of the environment in bytes, if available.
    async fn memory_usage(&self, env: &EnvironmentHandle) -> Option<u64>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod scripted {
    //! In-process stand-in for the executor container.

    use super::*;
    use crate::archive;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    /// What the fake does when the pipeline runs the compiled binary.
    #[derive(Debug, Clone)]
    pub enum RunBehaviour {
        /// Write `stdout` to the output file and exit with `exit_code`
        Exit { stdout: Vec<u8>, stderr: Vec<u8>, exit_code: i64 },
        /// Echo the uploaded input file to the output file
        Echo,
        /// Sleep, then report the given exit status
        Sleep { duration: Duration, exit_code: i64 },
    }

    pub struct ScriptedSandbox {
        pub compile: Mutex<VecDeque<CommandOutput>>,
        pub run: Mutex<VecDeque<RunBehaviour>>,
        pub files: Mutex<HashMap<String, Vec<u8>>>,
        pub commands: Mutex<Vec<String>>,
        pub memory: Mutex<VecDeque<u64>>,
        pub broken: bool,
    }

    impl ScriptedSandbox {
        pub fn new() -> Self {
            Self {
                compile: Mutex::new(VecDeque::new()),
                run: Mutex::new(VecDeque::new()),
                files: Mutex::new(HashMap::new()),
                commands: Mutex::new(Vec::new()),
                memory: Mutex::new(VecDeque::new()),
                broken: false,
            }
        }

        pub fn compiles_ok(self) -> Self {
            self.compile.lock().unwrap().push_back(CommandOutput {
                output: Vec::new(),
                exit_code: Some(0),
            });
            self
        }

        pub fn compile_fails(self, diagnostics: &str) -> Self {
            self.compile.lock().unwrap().push_back(CommandOutput {
                output: diagnostics.as_bytes().to_vec(),
                exit_code: Some(1),
            });
            self
        }

        pub fn then_run(self, behaviour: RunBehaviour) -> Self {
            self.run.lock().unwrap().push_back(behaviour);
            self
        }

        pub fn prints(self, stdout: &str) -> Self {
            self.compiles_ok().then_run(RunBehaviour::Exit {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                exit_code: 0,
            })
        }

        pub fn file(&self, name: &str) -> Option<Vec<u8>> {
            self.files.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        async fn acquire(&self) -> Result<EnvironmentHandle, EngineError> {
            if self.broken {
                return Err(EngineError::Infrastructure("daemon unreachable".to_string()));
            }
            Ok(EnvironmentHandle::new("scripted", "cpp-executor"))
        }

        async fn upload(&self, _env: &EnvironmentHandle, _dir: &str, archive: Vec<u8>) -> Result<(), EngineError> {
            for name in ["main.c", "main.cpp", "input.txt"] {
                if let Ok(content) = archive::unpack(&archive, name).await {
                    self.files.lock().unwrap().insert(name.to_string(), content);
                }
            }
            Ok(())
        }

        async fn download(&self, _env: &EnvironmentHandle, path: &str) -> Result<Vec<u8>, EngineError> {
            let name = path.rsplit('/').next().unwrap_or(path).to_string();
            let content = self
                .file(&name)
                .ok_or_else(|| EngineError::Infrastructure(format!("no such file: {}", path)))?;
            Ok(archive::pack(&[(name, content)]).await?)
        }

        async fn run(&self, _env: &EnvironmentHandle, _dir: &str, command: &str) -> Result<CommandOutput, EngineError> {
            self.commands.lock().unwrap().push(command.to_string());

            if command.contains("gcc") || command.contains("g++") {
                let next = self.compile.lock().unwrap().pop_front();
                return Ok(next.unwrap_or(CommandOutput { output: Vec::new(), exit_code: Some(0) }));
            }

            let behaviour = self.run.lock().unwrap().pop_front().unwrap_or(RunBehaviour::Echo);
            match behaviour {
                RunBehaviour::Exit { stdout, stderr, exit_code } => {
                    self.files.lock().unwrap().insert("output.txt".to_string(), stdout);
                    Ok(CommandOutput { output: stderr, exit_code: Some(exit_code) })
                }
                RunBehaviour::Echo => {
                    let input = self.file("input.txt").unwrap_or_default();
                    self.files.lock().unwrap().insert("output.txt".to_string(), input);
                    Ok(CommandOutput { output: Vec::new(), exit_code: Some(0) })
                }
                RunBehaviour::Sleep { duration, exit_code } => {
                    tokio::time::sleep(duration).await;
                    self.files.lock().unwrap().insert("output.txt".to_string(), Vec::new());
                    Ok(CommandOutput { output: Vec::new(), exit_code: Some(exit_code) })
                }
            }
        }

        async fn memory_usage(&self, _env: &EnvironmentHandle) -> Option<u64> {
            self.memory.lock().unwrap().pop_front()
        }
    }
}
