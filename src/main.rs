use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use secrecy::ExposeSecret;
use tokio::io::AsyncBufReadExt;

use jiral_engine::{Session, SessionConfig};
use jiral_llm::OllamaProvider;
use jiral_mcp::{McpToolChannel, ServerCommand};
use jiral_settings::JiralSettings;
use jiral_telemetry::{LogFormat, LogTarget, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "jiral", version, about = "Chat with a local model that can work on your Jira issues")]
struct Cli {
    /// Settings file (defaults to ~/.jiral/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log registered tools and per-query timing.
    #[arg(long, global = true)]
    debug: bool,

    /// Delay between output chunks in milliseconds (0 disables pacing).
    #[arg(long, global = true)]
    chunk_delay_ms: Option<u64>,

    /// Tool server to launch instead of the built-in Jira server.
    #[arg(long, global = true)]
    tool_server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP chat endpoint.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Interactive chat in the terminal.
    Chat,
    /// Answer a single question and exit.
    Ask { query: String },
    /// Run the Jira MCP tool server on stdin/stdout.
    JiraServer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    // stdout belongs to the answer (or the MCP protocol) everywhere but `serve`.
    let (format, target) = match cli.command {
        Command::Serve { .. } => (LogFormat::Json, LogTarget::Stdout),
        _ => (LogFormat::Pretty, LogTarget::Stderr),
    };
    let telemetry = TelemetryConfig {
        format,
        target,
        ..TelemetryConfig::default()
    }
    .with_debug(settings.debug);
    jiral_telemetry::init_telemetry(&telemetry)?;

    match cli.command {
        Command::JiraServer => run_jira_server(&settings).await,
        Command::Serve { host, port } => {
            let session = connect(&settings).await?;
            let config = jiral_server::ServerConfig {
                host: host.unwrap_or_else(|| settings.server.host.clone()),
                port: port.unwrap_or(settings.server.port),
            };
            let handle = jiral_server::start(config, session).await?;
            tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
            tracing::info!("shutting down");
            handle.shutdown().await;
            Ok(())
        }
        Command::Chat => {
            let session = connect(&settings).await?;
            chat(&session).await
        }
        Command::Ask { query } => {
            let session = connect(&settings).await?;
            let mut stream = session.query(&query)?;
            let mut stdout = std::io::stdout();
            while let Some(chunk) = stream.next().await {
                write!(stdout, "{}", chunk?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
            Ok(())
        }
    }
}

/// Defaults, then the settings file, then env, then flags.
fn resolve_settings(cli: &Cli) -> anyhow::Result<JiralSettings> {
    let mut settings = match &cli.config {
        Some(path) => jiral_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => jiral_settings::load_settings().context("loading settings")?,
    };
    if cli.debug {
        settings.debug = true;
    }
    if let Some(ms) = cli.chunk_delay_ms {
        settings.chunk_delay_ms = ms;
    }
    if let Some(path) = &cli.tool_server {
        settings.tools.command = Some(path.clone());
        settings.tools.args.clear();
    }
    Ok(settings)
}

/// The configured tool server, or this executable's own `jira-server`.
/// Jira credentials travel to the child as environment.
fn tool_command(settings: &JiralSettings) -> anyhow::Result<ServerCommand> {
    let mut command = match &settings.tools.command {
        Some(program) if settings.tools.args.is_empty() => ServerCommand::from_path(program),
        Some(program) => ServerCommand::new(program, settings.tools.args.clone()),
        None => ServerCommand::current_exe("jira-server").context("locating the jiral executable")?,
    };
    if let Some(domain) = &settings.jira.domain {
        command = command.env("JIRA_DOMAIN", domain);
    }
    if let Some(email) = &settings.jira.email {
        command = command.env("JIRA_EMAIL", email);
    }
    if let Some(token) = &settings.jira.api_token {
        command = command.env("JIRA_API", token.expose_secret());
    }
    Ok(command)
}

async fn connect(settings: &JiralSettings) -> anyhow::Result<Arc<Session>> {
    let provider = OllamaProvider::new(settings.ollama.base_url.clone())?;
    let command = tool_command(settings)?;
    let channel = McpToolChannel::spawn(&command)
        .await
        .with_context(|| format!("starting tool server `{}`", command.display()))?;
    let session = Session::connect(
        Arc::new(provider),
        Arc::new(channel),
        SessionConfig::from_settings(settings),
    )
    .await
    .context("registering tools")?;
    tracing::info!(tools = session.tool_names().len(), model = %settings.models.primary, "session ready");
    Ok(Arc::new(session))
}

async fn chat(session: &Session) -> anyhow::Result<()> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    println!("Connected with tools: {}", session.tool_names().join(", "));
    println!("Type 'exit' to quit.\n");

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") {
            break;
        }

        write!(stdout, "🤖 ")?;
        let mut stream = session.query(query)?;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                Err(e) => {
                    eprintln!("\n❌ Error: {e}");
                    break;
                }
            }
        }
        writeln!(stdout, "\n")?;
    }
    Ok(())
}

async fn run_jira_server(settings: &JiralSettings) -> anyhow::Result<()> {
    let config = jiral_jira::JiraConfig::from_settings(&settings.jira)?;
    let client = jiral_jira::JiraClient::new(&config)?;
    jiral_jira::serve_stdio(client).await?;
    Ok(())
}
