// crates/relaycli/src/main.rs

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use relaycore::{
    AgentSpec, EngineError, EventDecl, ExtractError, LlmService, StepDecl, WorkflowDefinition,
    WorkflowEvent, WORKFLOW_START, WORKFLOW_STOP,
};
use relaydurable::{DurableClient, StartWorkflowParams, WorkerDeps};
use relayruntime::{
    handler_fn, HandlerRegistry, InMemoryAgentStore, InProcessRuntime, StepOutcome, ToolRegistry,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay workflow engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Engine {
    /// Run synchronously inside this process
    Inprocess,
    /// Run on the durable engine with retryable activities
    Durable,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition file
    Run {
        /// Path to definition JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Execution engine
        #[arg(short, long, value_enum, default_value_t = Engine::Inprocess)]
        engine: Engine,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow definition file
    Validate {
        /// Path to definition JSON file
        file: PathBuf,
    },

    /// List available tools
    Tools,

    /// Create the example workflow definition
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            engine,
            verbose,
        } => {
            if verbose {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::DEBUG)
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_max_level(tracing::Level::INFO)
                    .init();
            }

            run_workflow(file, input, engine).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Tools => {
            list_tools();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

/// Stand-in LLM backend for local runs: completions echo the prompt tail and
/// extraction parses JSON. Deployments wire a real service here.
struct EchoLlm;

#[async_trait]
impl LlmService for EchoLlm {
    async fn invoke(
        &self,
        prompt: &str,
        _tool_names: &[String],
        _caller_id: Option<&str>,
    ) -> Result<String, EngineError> {
        Ok(prompt.lines().last().unwrap_or_default().to_string())
    }

    async fn extract_to_shape(
        &self,
        text: &str,
        _shape: &BTreeMap<String, String>,
    ) -> Result<Value, ExtractError> {
        serde_json::from_str(text).map_err(|e| ExtractError::Malformed(e.to_string()))
    }
}

const EXAMPLE_DEFINITION_ID: &str = "example-time-report";

fn build_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    relaytools::register_all(&mut registry);
    Arc::new(registry)
}

/// Compiled handlers for the example definition written by `relay init`.
/// Definitions with other ids need their handlers registered here before
/// `relay run` can execute them.
fn build_handlers() -> Arc<HandlerRegistry> {
    let handlers = HandlerRegistry::new();

    handlers.register(
        EXAMPLE_DEFINITION_ID,
        WORKFLOW_START,
        handler_fn(|event, mut context, caps| async move {
            let now = caps.tool("currentTime")?.invoke(json!({})).await?;
            context["started_at"] = now["iso"].clone();
            Ok(StepOutcome::next(
                WorkflowEvent::new(
                    "BUILD_REPORT",
                    json!({ "subject": event.data["subject"], "time": now }),
                ),
                context,
            ))
        }),
    );

    handlers.register(
        EXAMPLE_DEFINITION_ID,
        "BUILD_REPORT",
        handler_fn(|event, context, caps| async move {
            let echoed = caps.tool("echo")?.invoke(event.data.clone()).await?;
            let report = format!(
                "report on {} generated at {}",
                echoed["subject"].as_str().unwrap_or("unknown"),
                echoed["time"]["formatted"].as_str().unwrap_or("?"),
            );
            Ok(StepOutcome::next(
                WorkflowEvent::stop(json!({ "report": report })),
                context,
            ))
        }),
    );

    Arc::new(handlers)
}

fn load_definition(file: &PathBuf) -> Result<WorkflowDefinition> {
    let definition_json = std::fs::read_to_string(file)?;
    let definition: WorkflowDefinition = serde_json::from_str(&definition_json)?;
    Ok(definition)
}

fn parse_input(input: Option<String>) -> Result<Value> {
    match input {
        Some(text) => {
            let value: Value = serde_json::from_str(&text)?;
            if !value.is_object() {
                return Err(anyhow::anyhow!("Input must be a JSON object"));
            }
            Ok(value)
        }
        None => Ok(json!({})),
    }
}

async fn run_workflow(file: PathBuf, input: Option<String>, engine: Engine) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let definition = load_definition(&file)?;
    println!("📋 Workflow: {} ({})", definition.name, definition.version);
    println!("   Tools: {}", definition.tools.len());
    println!("   Agents: {}", definition.agents.len());
    println!("   Steps: {}", definition.steps.len());
    println!();

    let input = parse_input(input)?;
    let registry = build_registry();
    let handlers = build_handlers();
    let store = Arc::new(InMemoryAgentStore::new());
    let llm = Arc::new(EchoLlm);

    match engine {
        Engine::Inprocess => {
            let runtime = InProcessRuntime::new(handlers, registry, store, llm);

            // Print bus traffic while the workflow runs.
            let mut events = runtime.subscribe_events();
            let event_task = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    println!("  ⚡ {}", event.event_type);
                }
            });

            let result = runtime.execute(definition, input, None).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            event_task.abort();

            match result {
                Ok(output) => {
                    println!();
                    println!("✨ Workflow completed");
                    println!("📤 Output: {}", serde_json::to_string_pretty(&output)?);
                }
                Err(err) => {
                    println!();
                    println!("💥 Workflow failed: {}", err);
                }
            }
        }

        Engine::Durable => {
            let client = DurableClient::new(WorkerDeps {
                registry,
                store,
                llm,
                handlers,
            });

            let started = client.start(StartWorkflowParams {
                definition_id: definition.id.clone(),
                dsl: definition,
                input,
                caller_id: None,
                context: json!({}),
            })?;
            println!("▶️  Durable execution: {}", started.durable_execution_id);
            println!("   Run id: {}", started.run_id);

            // Poll progress until the run closes.
            let mut last_step = String::new();
            let result = loop {
                if let Ok(progress) = client.progress(&started.durable_execution_id) {
                    if progress.current_step != last_step && !progress.current_step.is_empty() {
                        println!(
                            "  ⚡ {} ({}/{})",
                            progress.current_step,
                            progress.completed_steps.len(),
                            progress.total_steps
                        );
                        last_step = progress.current_step;
                    }
                }
                let info = client.status(&started.durable_execution_id)?;
                if info.close_time.is_some() {
                    break client.result(&started.durable_execution_id);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            };

            let info = client.status(&started.durable_execution_id)?;
            println!();
            println!("📊 Status: {}", info.status);
            match result {
                Ok(output) => {
                    println!("📤 Output: {}", serde_json::to_string_pretty(&output)?)
                }
                Err(err) => println!("💥 {}", err),
            }
        }
    }

    Ok(())
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let definition = load_definition(&file)?;
    definition.validate()?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", definition.name);
    println!("   Events: {}", definition.events.len());
    println!("   Steps: {}", definition.steps.len());
    if !definition.input_schema().is_empty() {
        println!(
            "   Input schema: {}",
            serde_json::to_string(&definition.input_schema())?
        );
    }

    Ok(())
}

fn list_tools() {
    println!("📦 Available Tools:");
    println!();

    let registry = build_registry();
    let mut names = registry.list_tools();
    names.sort();
    for name in names {
        if let Some(metadata) = registry.get_metadata(&name) {
            println!("  • {} ({})", name, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", name);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let definition = WorkflowDefinition::new(EXAMPLE_DEFINITION_ID, "Time report")
        .with_description("Reads the clock and produces a short report on the given subject")
        .with_tool("currentTime")
        .with_tool("echo")
        .with_agent(
            AgentSpec::new(
                "Reporter",
                "You turn timestamps and a subject into a one-line report.",
            )
            .with_output_field("report", "string"),
        )
        .with_event(EventDecl::new(WORKFLOW_START).with_field("subject", "string"))
        .with_event(EventDecl::new("BUILD_REPORT"))
        .with_event(EventDecl::new(WORKFLOW_STOP).with_field("report", "string"))
        .with_step(StepDecl::new(
            WORKFLOW_START,
            "read currentTime, forward subject to BUILD_REPORT",
        ))
        .with_step(StepDecl::new(
            "BUILD_REPORT",
            "echo the data and stop with the assembled report",
        ));

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  relay run --file {} --input '{{\"subject\": \"markets\"}}'",
        output.display()
    );

    Ok(())
}
