//! Container-isolated retry loop for AI-generated animation scripts.
//!
//! `exec` runs a script file through the bounded execute-and-repair loop,
//! `generate` asks a configured provider for a new script, and `status`
//! reports the container target's state.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use renderloop::core::types::{InvalidInputError, RunOutcome, ScriptInput};
use renderloop::debug::DebugClient;
use renderloop::exit_codes;
use renderloop::generate::generate_script;
use renderloop::io::config::{RenderConfig, load_config};
use renderloop::io::container::{ContainerRuntime, DockerCli};
use renderloop::provider::ProviderRegistry;
use renderloop::provider::prompt::PromptEngine;
use renderloop::run::{ExecuteEnv, ExecuteParams, execute};
use renderloop::sink::{NoScriptStore, RunLogSink};

#[derive(Parser)]
#[command(
    name = "renderloop",
    version,
    about = "Execute AI-generated animation scripts in a container with automatic repair"
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "renderloop.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script file through the execute-and-repair loop.
    Exec {
        /// Path to the script file.
        script: PathBuf,
        /// Override the configured attempt budget.
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Generate a script from a description using the configured providers.
    Generate {
        /// Plain-language description of the animation.
        prompt: String,
        /// Write the generated script to this path instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Execute the generated script immediately.
        #[arg(long)]
        execute: bool,
        /// Override the configured attempt budget (with --execute).
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Report whether the container target is running.
    Status,
}

fn main() -> ExitCode {
    renderloop::logging::init();
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Command::Exec {
            script,
            max_attempts,
        } => cmd_exec(&cfg, &script, max_attempts),
        Command::Generate {
            prompt,
            out,
            execute,
            max_attempts,
        } => cmd_generate(&cfg, &prompt, out.as_deref(), execute, max_attempts),
        Command::Status => cmd_status(&cfg),
    }
}

fn cmd_exec(cfg: &RenderConfig, script_path: &std::path::Path, max_attempts: Option<u32>) -> Result<i32> {
    let content = fs::read_to_string(script_path)
        .with_context(|| format!("read script {}", script_path.display()))?;
    run_loop(cfg, ScriptInput::Text(content), max_attempts)
}

fn cmd_generate(
    cfg: &RenderConfig,
    prompt: &str,
    out: Option<&std::path::Path>,
    execute_after: bool,
    max_attempts: Option<u32>,
) -> Result<i32> {
    let registry = ProviderRegistry::from_config(&cfg.providers, cfg.provider_timeout());
    let engine = PromptEngine::new();
    let script = generate_script(&registry, &engine, prompt)?;

    match out {
        Some(path) => {
            fs::write(path, &script.content)
                .with_context(|| format!("write script {}", path.display()))?;
            println!("wrote script {} to {}", script.id, path.display());
        }
        None => println!("{}", script.content),
    }

    if !execute_after {
        return Ok(exit_codes::OK);
    }
    run_loop(
        cfg,
        ScriptInput::Payload {
            content: script.content,
            id: Some(script.id),
        },
        max_attempts,
    )
}

fn cmd_status(cfg: &RenderConfig) -> Result<i32> {
    let runtime = DockerCli::new(cfg.output_limit_bytes);
    let target = cfg.target();
    if runtime.is_running(&target) {
        println!("container '{}' is running", target.name);
    } else {
        println!("container '{}' is not running", target.name);
    }
    Ok(exit_codes::OK)
}

fn run_loop(cfg: &RenderConfig, input: ScriptInput, max_attempts: Option<u32>) -> Result<i32> {
    let runtime = DockerCli::new(cfg.output_limit_bytes);
    let registry = ProviderRegistry::from_config(&cfg.providers, cfg.provider_timeout());
    let debugger = DebugClient::new(&registry);
    let sink = RunLogSink::new(cfg.media_root.join("runs"));
    let env = ExecuteEnv {
        runtime: &runtime,
        debugger: &debugger,
        store: &NoScriptStore,
        sink: &sink,
    };
    let params = ExecuteParams::new(max_attempts.unwrap_or(cfg.max_attempts_default));

    let result = match execute(&env, cfg, input, &params) {
        Ok(result) => result,
        Err(err) => {
            if let Some(invalid) = err.downcast_ref::<InvalidInputError>() {
                eprintln!("{invalid}");
                return Ok(exit_codes::INVALID);
            }
            return Err(err);
        }
    };

    if result.success {
        match &result.output_path {
            Some(path) => println!("rendered {} in {} attempt(s)", path.display(), result.attempts_used),
            None => println!("rendered in {} attempt(s)", result.attempts_used),
        }
        return Ok(exit_codes::OK);
    }

    eprintln!(
        "run {} failed after {} attempt(s): {}",
        result.run.run_id,
        result.attempts_used,
        result.error.as_deref().unwrap_or("unknown error")
    );
    Ok(match result.run.outcome {
        Some(RunOutcome::Cancelled) => exit_codes::CANCELLED,
        _ => exit_codes::EXHAUSTED,
    })
}
