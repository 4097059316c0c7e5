//! `ironloop run` — Execute one agent run for a task.

use ironloop_agent::{AgentLoop, RunConfig, RunObservers, RunStatus};
use ironloop_config::AppConfig;
use ironloop_core::cancel::CancelToken;
use ironloop_core::provider::Provider;
use ironloop_core::tool::ToolRegistry;
use ironloop_providers::OpenAiCompatProvider;
use ironloop_tools::{safe_shell_commands, FileReadTool, FinishTool, ShellTool, TodoWriteTool};
use std::io::Write;
use std::sync::Arc;
use tracing::warn;

pub async fn run(
    task: String,
    model: Option<String>,
    no_plan: bool,
    approve: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = build_provider(&config)?;
    let registry = Arc::new(build_registry(&config));

    let cwd = std::env::current_dir().unwrap_or_default();
    let mut run_config = RunConfig::new(model.unwrap_or_else(|| config.model.clone()));
    run_config.temperature = config.temperature;
    run_config.max_iterations = config.agent.max_iterations;
    run_config.max_messages = config.agent.max_messages;
    run_config.enable_planning = config.agent.enable_planning && !no_plan;
    run_config.require_approval = approve || config.agent.require_approval;
    run_config.is_git_repo = cwd.join(".git").exists();
    run_config.working_directory = cwd;

    let agent = AgentLoop::new(provider, registry, run_config);

    // Ctrl+C requests a graceful abort via the cancel token.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling run...");
                cancel.cancel();
            }
        });
    }

    let observers = RunObservers::new()
        .on_tool_call_started(|call| {
            eprintln!("  -> {}({})", call.name, preview(&call.arguments, 80));
        })
        .on_tool_result(|result| {
            let marker = if result.success { "ok" } else { "failed" };
            eprintln!("     {} {}", marker, preview(&result.output, 120));
        })
        .on_todo_update(|todos| {
            if !todos.is_empty() {
                eprintln!("{}", todos.render());
            }
        })
        .on_ask_user(|call| {
            eprint!("  Allow '{}' call? [y/N] ", call.name);
            let _ = std::io::stderr().flush();
            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim(), "y" | "Y" | "yes")
        });

    let result = agent.run(&task, &[], observers, cancel).await?;

    match result.status {
        RunStatus::Completed => {
            println!("{}", result.final_text);
            Ok(())
        }
        RunStatus::Aborted => {
            eprintln!("Run cancelled.");
            Ok(())
        }
        RunStatus::Failed => {
            let reason = result.error.unwrap_or_else(|| "unknown failure".into());
            warn!(iterations = result.iterations, "Run failed");
            Err(format!("Run failed: {reason}").into())
        }
    }
}

fn build_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, Box<dyn std::error::Error>> {
    let needs_key = config.provider != "ollama";
    if needs_key && !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY   (recommended)");
        eprintln!("    OPENAI_API_KEY");
        eprintln!("    IRONLOOP_API_KEY");
        eprintln!();
        eprintln!(
            "  Or add it to your config file: {}",
            AppConfig::config_dir().join("config.toml").display()
        );
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let api_key = config.api_key.clone().unwrap_or_default();
    let provider: Arc<dyn Provider> = match config.provider.as_str() {
        "openrouter" => Arc::new(OpenAiCompatProvider::openrouter(api_key)),
        "openai" => Arc::new(OpenAiCompatProvider::openai(api_key)),
        "ollama" => Arc::new(OpenAiCompatProvider::ollama(config.base_url.as_deref())),
        name => {
            let base_url = config.base_url.clone().ok_or_else(|| {
                format!("Provider '{name}' requires base_url to be set in the config")
            })?;
            Arc::new(OpenAiCompatProvider::new(name.to_string(), base_url, api_key))
        }
    };
    Ok(provider)
}

fn build_registry(config: &AppConfig) -> ToolRegistry {
    let allowlist = if config.tools.shell_allowlist.is_empty() {
        safe_shell_commands()
    } else {
        config.tools.shell_allowlist.clone()
    };

    let file_read = if config.tools.allowed_roots.is_empty() {
        FileReadTool::new()
    } else {
        FileReadTool::with_roots(config.tools.allowed_roots.clone())
    };

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ShellTool::new(allowlist)));
    registry.register(Box::new(file_read));
    registry.register(Box::new(TodoWriteTool));
    registry.register(Box::new(FinishTool));
    registry
}

/// First `max` characters on a single line.
fn preview(text: &str, max: usize) -> String {
    let one_line = text.replace('\n', " ");
    let mut out: String = one_line.chars().take(max).collect();
    if one_line.chars().count() > max {
        out.push_str("...");
    }
    out
}
