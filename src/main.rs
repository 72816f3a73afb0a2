use std::time::Duration;

use chatsync::broker::LoopbackBroker;
use chatsync::config::SessionConfig;
use chatsync::session::{ChatSession, SessionHandle, SessionUpdate, spawn_session};
use chatsync::username::{UsernameError, validate_username};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid username: {0}")]
    Username(#[from] UsernameError),
    #[error("session task failed: {0}")]
    Join(#[from] JoinError),
    #[error("session `{0}` stopped accepting commands")]
    SessionClosed(String),
}

#[derive(Parser, Debug)]
#[command(name = "chatsync", about = "Chat session sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a username and print its normalized form.
    CheckUsername { name: String },
    /// Run two sessions against an in-process broker.
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
struct DemoArgs {
    #[arg(long, env = "CHAT_DEMO_FIRST", default_value = "ana")]
    first: String,

    #[arg(long, env = "CHAT_DEMO_SECOND", default_value = "bruno")]
    second: String,

    /// Pause between scripted steps, in milliseconds.
    #[arg(long, env = "CHAT_DEMO_STEP_MS", default_value_t = 800)]
    step_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::CheckUsername { name } => run_check_username(&name),
        Command::Demo(args) => run_demo(args).await,
    }
}

fn run_check_username(name: &str) -> Result<(), CliError> {
    let name = validate_username(name)?;
    println!("{name}");
    Ok(())
}

struct DemoClient {
    name: String,
    handle: SessionHandle,
    task: tokio::task::JoinHandle<ChatSession>,
    printer: tokio::task::JoinHandle<()>,
}

impl DemoClient {
    fn start(broker: &LoopbackBroker, config: SessionConfig, name: &str) -> Self {
        let (transport, events) = broker.transport();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let session = ChatSession::new(config, Box::new(transport), updates_tx);
        let (handle, task) = spawn_session(session, events);
        let printer = tokio::spawn(print_updates(name.to_owned(), updates_rx));
        Self { name: name.to_owned(), handle, task, printer }
    }

    fn ensure(&self, sent: bool) -> Result<(), CliError> {
        if sent { Ok(()) } else { Err(CliError::SessionClosed(self.name.clone())) }
    }

    /// Feed the input box one character at a time.
    async fn type_text(&self, text: &str, per_key: Duration) -> Result<(), CliError> {
        for (typed, _) in text.chars().enumerate() {
            self.ensure(self.handle.input(typed + 1))?;
            tokio::time::sleep(per_key).await;
        }
        Ok(())
    }

    async fn say(&self, text: &str, per_key: Duration) -> Result<(), CliError> {
        self.type_text(text, per_key).await?;
        self.ensure(self.handle.send_message(text))
    }

    async fn finish(self) -> Result<(), CliError> {
        self.ensure(self.handle.shutdown())?;
        let session = self.task.await?;
        info!(
            user = %self.name,
            messages = session.messages().len(),
            state = ?session.state(),
            "demo: session finished"
        );
        drop(session);
        self.printer.await?;
        Ok(())
    }
}

async fn print_updates(name: String, mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::MessageAppended(message) => {
                info!(
                    view = %name,
                    at = %message.clock_label(),
                    from = %message.username,
                    system = message.is_system,
                    "{}",
                    message.text
                );
            }
            other => info!(view = %name, update = ?other, "demo: update"),
        }
    }
}

async fn run_demo(args: DemoArgs) -> Result<(), CliError> {
    let first_name = validate_username(&args.first)?;
    let second_name = validate_username(&args.second)?;
    let step = Duration::from_millis(args.step_ms);
    let per_key = Duration::from_millis(60);

    let broker = LoopbackBroker::new();
    let config = SessionConfig::from_env();
    let first = DemoClient::start(&broker, config, &first_name);
    let second = DemoClient::start(&broker, config, &second_name);

    for client in [&first, &second] {
        client.ensure(client.handle.set_username(&client.name))?;
        client.ensure(client.handle.connect())?;
        tokio::time::sleep(step).await;
    }

    first.say(&format!("hi {second_name}"), per_key).await?;
    tokio::time::sleep(step).await;
    second.say("hey! how is it going?", per_key).await?;
    tokio::time::sleep(step).await;

    // Start typing and walk away: the inactivity timer sends the stop.
    first.type_text("let me think", per_key).await?;
    tokio::time::sleep(config.typing_debounce + config.typing_timeout + step).await;

    first.ensure(first.handle.disconnect())?;
    tokio::time::sleep(step).await;

    first.finish().await?;
    second.finish().await?;
    Ok(())
}
