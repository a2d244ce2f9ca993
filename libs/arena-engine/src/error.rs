use crate::archive::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Failure of one pipeline run. Any variant aborts the remaining stages.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    /// Compiler diagnostics are surfaced verbatim
    #[error("Compilation failed:\n{diagnostics}")]
    Compile { diagnostics: String },

    #[error("Runtime error (exit code {exit_code}){}", format_stderr(.stderr))]
    Runtime { exit_code: i64, stderr: String },

    #[error("Time limit exceeded: execution took longer than {}s", .limit.as_secs_f64())]
    Timeout { limit: Duration },

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("execution environment: {0}")]
    Infrastructure(String),
}

fn format_stderr(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(":\n{}", stderr)
    }
}

impl EngineError {
    /// True when the fault lies with the execution environment rather than
    /// the submitted program.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EngineError::Transport(_) | EngineError::Infrastructure(_))
    }

    pub fn infrastructure(context: &str, err: impl std::fmt::Display) -> Self {
        EngineError::Infrastructure(format!("{}: {}", context, err))
    }
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        EngineError::Infrastructure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_carries_diagnostics() {
        let err = EngineError::Compile {
            diagnostics: "main.c:1:1: error: expected ';'".to_string(),
        };
        assert!(err.to_string().contains("expected ';'"));
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_runtime_error_without_stderr() {
        let err = EngineError::Runtime {
            exit_code: 139,
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Runtime error (exit code 139)");
    }

    #[test]
    fn test_timeout_message_names_limit() {
        let err = EngineError::Timeout {
            limit: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_transport_is_infrastructure() {
        let err = EngineError::from(TransportError::NotFound("output.txt".to_string()));
        assert!(err.is_infrastructure());
    }
}
