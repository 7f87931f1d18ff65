mod presenter;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use parking_lot::RwLock;
use parley_core::factories::ClientRegistry;
use parley_core::functions::FunctionRegistry;
use parley_core::models::{
    AppEvent, Attachment, AttachmentKind, DiagnosticsStore, EventKind, RunRecord, ScheduledTask,
};
use parley_core::repositories::ThreadJsonRepository;
use parley_core::services::ErrorCollectorLayer;
use parley_core::settings::{
    AssistantConfig, AssistantKind, ClientType, SettingsJsonRepository, SettingsRepository,
};
use parley_core::{
    EventBus, Orchestrator, OrchestratorContext, ScheduleSpec, SubmitRequest, TaskScheduler,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use presenter::{Presenter, render_conversation};

/// Talk to several assistants in shared conversation threads.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase log verbosity (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Backend to use for this and later invocations (e.g. OPEN_AI,
    /// AZURE_OPEN_AI, "OpenAI Realtime").
    #[arg(long, global = true, value_parser = parse_client_type)]
    client_type: Option<ClientType>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message to one or more assistants.
    Chat(ChatArgs),
    /// Manage conversation threads.
    #[command(subcommand)]
    Threads(ThreadsCommand),
    /// Manage assistant configurations.
    #[command(subcommand)]
    Assistants(AssistantsCommand),
    /// Run a request on a timer and wait for the schedule to finish.
    Schedule(ScheduleArgs),
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Assistants to ask, in order.
    #[arg(short, long = "assistant", required = true)]
    assistants: Vec<String>,

    /// Thread to continue; a new one is created when omitted.
    #[arg(short, long)]
    thread: Option<String>,

    /// Files for the code interpreter.
    #[arg(long = "code-file")]
    code_files: Vec<PathBuf>,

    /// Files for file search.
    #[arg(long = "search-file")]
    search_files: Vec<PathBuf>,

    #[arg(long = "image")]
    images: Vec<PathBuf>,

    /// Extra instructions for the runs on this thread.
    #[arg(long)]
    instructions: Option<String>,

    /// Print the run traces when done.
    #[arg(long)]
    show_runs: bool,

    text: String,
}

#[derive(Subcommand, Debug)]
enum ThreadsCommand {
    /// List threads; the displayed one is marked.
    List,
    /// Print the transcript of a thread.
    Show {
        name: String,
        /// Only the last N text messages.
        #[arg(long)]
        last: Option<usize>,
    },
    New {
        name: Option<String>,
    },
    Rename {
        old_name: String,
        new_name: String,
    },
    Delete {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum AssistantsCommand {
    List,
    /// Print one configuration as JSON.
    Show { name: String },
    /// Add or replace an assistant.
    Add(AddAssistantArgs),
}

#[derive(Args, Debug)]
struct AddAssistantArgs {
    name: String,

    #[arg(short, long)]
    model: String,

    #[arg(long, default_value = "")]
    instructions: String,

    /// Local functions the assistant may call.
    #[arg(long = "function")]
    functions: Vec<String>,

    #[arg(long, value_enum, default_value_t = KindArg::Assistant)]
    kind: KindArg,

    #[arg(long, value_parser = parse_client_type)]
    backend: Option<ClientType>,

    #[arg(long)]
    code_interpreter: bool,

    #[arg(long)]
    file_search: bool,

    /// Where generated files are downloaded.
    #[arg(long)]
    output_folder: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Assistant,
    Chat,
    Realtime,
}

impl From<KindArg> for AssistantKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Assistant => AssistantKind::Assistant,
            KindArg::Chat => AssistantKind::Chat,
            KindArg::Realtime => AssistantKind::Realtime,
        }
    }
}

#[derive(Args, Debug)]
struct ScheduleArgs {
    /// Assistant owning the schedule.
    #[arg(short, long)]
    assistant: String,

    /// Seconds between recurrences.
    #[arg(long, default_value_t = 0)]
    every: u64,

    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Seconds to wait before the first recurrence.
    #[arg(long)]
    start_in: Option<i64>,

    /// `ASSISTANT=REQUEST` pairs; turns the schedule into a multi-assistant
    /// task.
    #[arg(long = "for", value_parser = parse_target)]
    targets: Vec<(String, String)>,

    /// One request runs as a basic task, several as a batch.
    requests: Vec<String>,
}

impl ScheduleArgs {
    fn task(&self) -> Result<ScheduledTask> {
        if !self.targets.is_empty() {
            return Ok(ScheduledTask::Multi {
                requests: self.targets.clone(),
            });
        }
        match self.requests.as_slice() {
            [] => bail!("a schedule needs at least one request"),
            [request] => Ok(ScheduledTask::Basic {
                request: request.clone(),
            }),
            requests => Ok(ScheduledTask::Batch {
                requests: requests.to_vec(),
            }),
        }
    }

    fn spec(&self) -> ScheduleSpec {
        let spec = ScheduleSpec::every(Duration::from_secs(self.every), self.count);
        match self.start_in {
            Some(seconds) => {
                spec.starting_at(chrono::Local::now() + chrono::Duration::seconds(seconds))
            }
            None => spec,
        }
    }
}

fn parse_client_type(value: &str) -> Result<ClientType, String> {
    ClientType::parse(value).ok_or_else(|| format!("unknown client type '{value}'"))
}

fn parse_target(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(assistant, request)| (assistant.trim().to_string(), request.to_string()))
        .filter(|(assistant, _)| !assistant.is_empty())
        .ok_or_else(|| format!("expected ASSISTANT=REQUEST, got '{value}'"))
}

/// Console output plus the collector layer feeding the diagnostics store.
fn init_logging(verbose: bool, diagnostics: &Arc<DiagnosticsStore>) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let (collector, receiver) = ErrorCollectorLayer::new();
    diagnostics.collect_from(receiver);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(collector)
        .init();
}

async fn build_orchestrator(cli: &Cli) -> Result<Orchestrator> {
    let settings_repository = Arc::new(
        SettingsJsonRepository::new().context("Failed to locate the settings file")?,
    );
    let settings = settings_repository
        .load()
        .await
        .with_context(|| format!("Failed to load {}", settings_repository.storage_path()))?;

    let diagnostics = Arc::new(DiagnosticsStore::new(settings.general.diagnostics_capacity));
    init_logging(cli.verbose, &diagnostics);
    info!(settings = %settings_repository.storage_path(), "Settings loaded");

    // Environment credentials are used for this process only and never
    // written back to the settings file.
    let mut providers = settings.providers.clone();
    providers.apply_env_overrides(|key| std::env::var(key).ok());
    let clients = Arc::new(ClientRegistry::from_providers(
        &providers,
        settings.general.connection_timeout(),
    ));

    let orchestrator = Orchestrator::new(OrchestratorContext {
        settings: Arc::new(RwLock::new(settings)),
        settings_repository,
        clients,
        thread_repository: Arc::new(
            ThreadJsonRepository::new().context("Failed to locate the threads file")?,
        ),
        functions: Arc::new(FunctionRegistry::with_system_functions()),
        bus: Arc::new(EventBus::new()),
        diagnostics,
    });

    if let Some(client_type) = cli.client_type {
        orchestrator.set_active_client_type(client_type).await?;
    }
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let orchestrator = build_orchestrator(&cli).await?;

    let show_transcripts = matches!(cli.command, Command::Threads(_));
    Presenter::attach(&orchestrator.bus(), show_transcripts);

    let result = match cli.command {
        Command::Chat(args) => chat(&orchestrator, args).await,
        Command::Threads(command) => threads(&orchestrator, command).await,
        Command::Assistants(command) => assistants(&orchestrator, command).await,
        Command::Schedule(args) => schedule(&orchestrator, args).await,
    };

    if let Err(e) = orchestrator.shutdown().await {
        warn!(error = %e, "Shutdown did not complete cleanly");
    }
    result
}

async fn chat(orchestrator: &Orchestrator, args: ChatArgs) -> Result<()> {
    let mut attachments: Vec<Attachment> = Vec::new();
    for (paths, kind) in [
        (&args.code_files, AttachmentKind::CodeInterpreter),
        (&args.search_files, AttachmentKind::FileSearch),
        (&args.images, AttachmentKind::Image),
    ] {
        attachments.extend(paths.iter().map(|p| Attachment::new(p.clone(), kind)));
    }

    if let (Some(thread), Some(instructions)) = (&args.thread, &args.instructions) {
        orchestrator
            .set_additional_instructions(thread, Some(instructions.clone()))
            .await?;
    }

    let realtime = args
        .assistants
        .first()
        .and_then(|name| orchestrator.assistant(name))
        .is_some_and(|config| config.is_realtime());
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let bus = orchestrator.bus();
    let subscription = bus.subscribe(&[EventKind::RunEnded], move |event| {
        if let AppEvent::Run(run) = event {
            let _ = ended_tx.send(run.assistant.clone());
        }
    });

    let mut request = SubmitRequest::new(args.text, &[]).with_attachments(attachments);
    request.assistants = args.assistants.clone();
    if let Some(thread) = args.thread {
        request = request.with_thread(thread);
    }

    let handle = orchestrator.submit(request)?;
    let outcome = tokio::select! {
        outcome = handle.wait() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel_all();
            bail!("interrupted");
        }
    };

    if realtime {
        // Replies arrive on the session after the submission returned.
        let mut pending = args.assistants.len();
        while pending > 0 {
            tokio::select! {
                ended = ended_rx.recv() => match ended {
                    Some(_) => pending -= 1,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }
    bus.unsubscribe(subscription);
    println!();

    for run in &outcome.runs {
        if let Some(failure) = &run.failure {
            eprintln!("{} failed: {failure}", run.assistant);
        }
    }
    if args.show_runs {
        for record in orchestrator.diagnostics().runs() {
            print_run(&record);
        }
    }
    Ok(())
}

fn print_run(record: &RunRecord) {
    let state = record
        .state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "running".to_string());
    println!(
        "{} {} on '{}' [{}] {}",
        record.started_at.format("%H:%M:%S"),
        record.assistant,
        record.thread,
        state,
        record.run_id.as_deref().unwrap_or("-"),
    );
    for call in &record.function_calls {
        println!("  {}({}) -> {}", call.name, call.arguments, call.response);
    }
    if let Some(outcome) = &record.outcome {
        println!("  {outcome}");
    }
}

async fn threads(orchestrator: &Orchestrator, command: ThreadsCommand) -> Result<()> {
    match command {
        ThreadsCommand::List => {
            let current = orchestrator.current_thread().await?;
            for name in orchestrator.thread_names().await? {
                let marker = if current.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {name}");
            }
        }
        ThreadsCommand::Show { name, last } => {
            let mut conversation = orchestrator.conversation(&name).await?;
            if let Some(last) = last {
                let skip = conversation.messages.len().saturating_sub(last);
                conversation.messages = conversation.messages.split_off(skip);
            }
            println!("{}", render_conversation(&conversation));
        }
        ThreadsCommand::New { name } => {
            orchestrator.create_thread(name.as_deref()).await?;
        }
        ThreadsCommand::Rename { old_name, new_name } => {
            orchestrator.rename_thread(&old_name, &new_name).await?;
        }
        ThreadsCommand::Delete { name } => {
            orchestrator.delete_thread(&name).await?;
        }
    }
    Ok(())
}

async fn assistants(orchestrator: &Orchestrator, command: AssistantsCommand) -> Result<()> {
    match command {
        AssistantsCommand::List => {
            for name in orchestrator.assistant_names() {
                let Some(config) = orchestrator.assistant(&name) else {
                    continue;
                };
                println!(
                    "{:<20} {:<16} {:<22} {}",
                    config.name,
                    config.model,
                    config.client_type,
                    config.assistant_id.as_deref().unwrap_or("(not created)")
                );
            }
        }
        AssistantsCommand::Show { name } => {
            let config = orchestrator
                .assistant(&name)
                .ok_or_else(|| anyhow!("unknown assistant '{name}'"))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        AssistantsCommand::Add(args) => {
            let mut config = AssistantConfig::new(args.name, args.model)
                .with_kind(args.kind.into())
                .with_client_type(args.backend.unwrap_or(orchestrator.active_client_type()));
            config.instructions = args.instructions;
            config.selected_functions = args.functions;
            config.code_interpreter = args.code_interpreter;
            config.file_search = args.file_search;
            config.output_folder_path = args.output_folder;
            if let Some(existing) = orchestrator.assistant(&config.name) {
                config.assistant_id = existing.assistant_id;
            }
            let name = config.name.clone();
            orchestrator.upsert_assistant(config).await?;
            println!("saved assistant '{name}'");
        }
    }
    Ok(())
}

async fn schedule(orchestrator: &Orchestrator, args: ScheduleArgs) -> Result<()> {
    let task = args.task()?;
    let scheduler = TaskScheduler::new(Arc::new(orchestrator.clone()));
    let id = scheduler.schedule(&args.assistant, task, args.spec());
    println!("scheduled {id}");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if scheduler.schedules().is_empty() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                scheduler.cancel(&id).await;
                break;
            }
        }
    }
    scheduler.shutdown();
    Ok(())
}
