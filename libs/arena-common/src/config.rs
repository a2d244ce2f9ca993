// Process and language configuration shared by the server, engine and CLI

use crate::types::Language;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// How one language is compiled inside the executor container.
///
/// `compile_command` is run through `bash -c` in the working directory and
/// must leave an executable named `binary_name` next to the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub source_file: String,
    pub binary_name: String,
    pub compile_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagesFile {
    pub languages: Vec<LanguageConfig>,
}

impl LanguageConfig {
    pub fn builtin(language: Language) -> Self {
        match language {
            Language::C => Self {
                name: "c".to_string(),
                version: "gcc".to_string(),
                source_file: "main.c".to_string(),
                binary_name: "main".to_string(),
                compile_command: "gcc -O2 -o main main.c -lm 2>&1".to_string(),
            },
            Language::Cpp => Self {
                name: "cpp".to_string(),
                version: "g++".to_string(),
                source_file: "main.cpp".to_string(),
                binary_name: "main".to_string(),
                compile_command: "g++ -O2 -std=c++17 -o main main.cpp 2>&1".to_string(),
            },
        }
    }
}

impl Default for LanguagesFile {
    fn default() -> Self {
        Self {
            languages: Language::all().into_iter().map(LanguageConfig::builtin).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Settings for the shared execution container.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub image: String,
    pub container_name: String,
    pub work_dir: String,
    /// Wall-clock bound for the Running stage
    pub run_timeout: Duration,
    /// Deadline for every other blocking call against the container
    pub step_timeout: Duration,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    pub languages_file: PathBuf,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            image: "arena-executor:latest".to_string(),
            container_name: "cpp-executor".to_string(),
            work_dir: "/code".to_string(),
            run_timeout: Duration::from_secs(10),
            step_timeout: Duration::from_secs(30),
            memory_limit_mb: 512,
            cpu_limit: 1.0,
            languages_file: PathBuf::from("config/languages.json"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub redis_url: String,
    pub store: StoreBackend,
    pub executor: ExecutorSettings,
    pub pairing_timeout: Duration,
    /// How long a battle stays open without a winner
    pub duel_timeout: Duration,
    pub duel_problem_ids: RangeInclusive<u32>,
    /// Hide infrastructure diagnostics from HTTP clients
    pub hardened: bool,
    pub json_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = ExecutorSettings::default();

        let store = match env_or("ARENA_STORE", "redis").to_lowercase().as_str() {
            "redis" => StoreBackend::Redis,
            "memory" => StoreBackend::Memory,
            other => return Err(format!("Unknown ARENA_STORE '{}': expected redis or memory", other)),
        };

        let executor = ExecutorSettings {
            image: env_or("ARENA_EXECUTOR_IMAGE", &defaults.image),
            container_name: env_or("ARENA_CONTAINER_NAME", &defaults.container_name),
            work_dir: env_or("ARENA_WORK_DIR", &defaults.work_dir),
            run_timeout: Duration::from_secs(parse_env("ARENA_RUN_TIMEOUT_SECS", 10)?),
            step_timeout: Duration::from_secs(parse_env("ARENA_STEP_TIMEOUT_SECS", 30)?),
            memory_limit_mb: parse_env("ARENA_MEMORY_LIMIT_MB", defaults.memory_limit_mb)?,
            cpu_limit: parse_env("ARENA_CPU_LIMIT", defaults.cpu_limit)?,
            languages_file: PathBuf::from(env_or(
                "ARENA_LANGUAGES_FILE",
                &defaults.languages_file.to_string_lossy(),
            )),
        };

        Ok(Self {
            bind_addr: env_or("ARENA_BIND_ADDR", "0.0.0.0:3333"),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            store,
            executor,
            pairing_timeout: Duration::from_secs(parse_env("ARENA_PAIRING_TIMEOUT_SECS", 300)?),
            duel_timeout: Duration::from_secs(parse_env("ARENA_DUEL_TIMEOUT_SECS", 1800)?),
            duel_problem_ids: parse_range(&env_or("ARENA_DUEL_PROBLEMS", "1-5"))?,
            hardened: parse_env("ARENA_HARDENED", false)?,
            json_logs: env_or("ARENA_LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("Invalid value '{}' for {}", raw, key)),
        Err(_) => Ok(default),
    }
}

/// Parse an inclusive id range such as `1-5`.
pub fn parse_range(raw: &str) -> Result<RangeInclusive<u32>, String> {
    let invalid = || format!("Invalid problem id range '{}': expected <low>-<high>", raw);
    let (low, high) = raw.split_once('-').ok_or_else(invalid)?;
    let low: u32 = low.trim().parse().map_err(|_| invalid())?;
    let high: u32 = high.trim().parse().map_err(|_| invalid())?;
    if low > high {
        return Err(invalid());
    }
    Ok(low..=high)
}
