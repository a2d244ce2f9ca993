// CLI commands for provisioning the Arena executor
use anyhow::{bail, Context, Result};
use arena_common::config::LanguagesFile;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

const LANGUAGES_PATH: &str = "config/languages.json";
const DOCKERFILE_PATH: &str = "dockerfiles/executor/Dockerfile";

/// Load languages configuration, falling back to the built-in gcc/g++ set
fn load_languages_config(path: &Path) -> Result<LanguagesFile> {
    if !path.exists() {
        return Ok(LanguagesFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Executor image: compilers plus coreutils `timeout`, idling so the API can exec into it
pub fn generate_executor_dockerfile(gcc_version: &str) -> String {
    format!(
        r#"# GENERATED BY arena-cli
# C/C++ Execution Environment
FROM gcc:{}

WORKDIR /code

# Create non-root user for submissions
RUN useradd -m -u 1000 arena && \
    chown -R arena:arena /code

USER arena

# Kept alive; every job runs through docker exec
CMD ["sleep", "infinity"]
"#,
        gcc_version
    )
}

pub async fn init_project(path: &str, gcc_version: &str) -> Result<()> {
    println!("🚀 Initializing Arena project at: {}", path);

    let project_path = Path::new(path);

    for dir in ["config", "dockerfiles/executor"] {
        fs::create_dir_all(project_path.join(dir))
            .with_context(|| format!("Failed to create directory: {}", dir))?;
        println!("  ✅ Created: {}", dir);
    }

    let languages_path = project_path.join(LANGUAGES_PATH);
    if languages_path.exists() {
        println!("  ⏭️  Kept existing: {}", LANGUAGES_PATH);
    } else {
        let json_content = serde_json::to_string_pretty(&LanguagesFile::default())?;
        fs::write(&languages_path, json_content)
            .with_context(|| format!("Failed to write {}", LANGUAGES_PATH))?;
        println!("  ✅ Created: {}", LANGUAGES_PATH);
    }

    let dockerfile_path = project_path.join(DOCKERFILE_PATH);
    if dockerfile_path.exists() {
        println!("  ⏭️  Kept existing: {}", DOCKERFILE_PATH);
    } else {
        fs::write(&dockerfile_path, generate_executor_dockerfile(gcc_version))
            .with_context(|| format!("Failed to write {}", DOCKERFILE_PATH))?;
        println!("  ✅ Created: {}", DOCKERFILE_PATH);
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Build the executor image: arena-cli build-image");
    println!("  2. Start Redis and run arena-api");

    Ok(())
}

pub async fn list_languages(config: &str) -> Result<()> {
    let languages = load_languages_config(Path::new(config))?;

    println!("📋 Configured Languages:\n");
    println!("{:<8} {:<10} {:<12} {:<50}", "Name", "Version", "Source", "Compile command");
    println!("{}", "─".repeat(84));

    for lang in &languages.languages {
        println!(
            "{:<8} {:<10} {:<12} {:<50}",
            lang.name, lang.version, lang.source_file, lang.compile_command
        );
    }

    println!("\n✅ Total: {} language(s)", languages.languages.len());

    Ok(())
}

pub async fn build_executor_image(tag: &str, no_cache: bool) -> Result<()> {
    println!("🐳 Building executor image: {}", tag);

    let dockerfile_path = Path::new(DOCKERFILE_PATH);
    if !dockerfile_path.exists() {
        bail!("Dockerfile not found at {}. Generate it first with the init command.", DOCKERFILE_PATH);
    }

    let mut docker_args = vec![
        "build".to_string(),
        "-t".to_string(),
        tag.to_string(),
        "-f".to_string(),
        DOCKERFILE_PATH.to_string(),
    ];

    if no_cache {
        docker_args.push("--no-cache".to_string());
    }

    docker_args.push(".".to_string());

    println!("\n🔨 Running: docker {}", docker_args.join(" "));

    let status = Command::new("docker")
        .args(&docker_args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("Failed to execute docker build. Is Docker installed and running?")?;

    if !status.success() {
        bail!("Docker build failed with exit code: {:?}", status.code());
    }

    println!("\n✅ Executor image built successfully!");
    println!("   Point ARENA_EXECUTOR_IMAGE at {} if you used a custom tag.", tag);

    Ok(())
}
