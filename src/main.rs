use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use logmedic::config::Config;
use logmedic::keyring::{self, Secret};
use logmedic::router::{Agent, Response};
use logmedic::session::SessionContext;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "logmedic",
    about = "Ask about an application's logs, get a diagnosis, ship the fix as a pull request",
    version
)]
struct Cli {
    /// Config file (defaults to ~/.config/logmedic/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive session (default)
    Chat,
    /// Run a single turn and exit
    Ask {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration with secrets hidden
    Config,
    /// Manage credentials stored in the system keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Subcommand, Debug)]
enum SecretAction {
    /// Read a value from stdin and store it
    Set { which: SecretName },
    /// Remove a stored value
    Clear { which: SecretName },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SecretName {
    ModelApiKey,
    SearchPassword,
    GithubToken,
}

impl From<SecretName> for Secret {
    fn from(name: SecretName) -> Self {
        match name {
            SecretName::ModelApiKey => Secret::ModelApiKey,
            SecretName::SearchPassword => Secret::SearchPassword,
            SecretName::GithubToken => Secret::GitHubToken,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logmedic::logging::init(cli.verbose);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let (agent, max_turns) = build_agent(cli.config.as_deref())?;
            run_chat(&agent, max_turns).await
        }
        Commands::Ask { message, json } => {
            let (agent, max_turns) = build_agent(cli.config.as_deref())?;
            let mut session = SessionContext::new(max_turns);
            let response = agent.handle_message(&mut session, &message.join(" ")).await;
            print_response(&response, json)?;
            if matches!(response, Response::Error { .. }) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Config => {
            let config = Config::load(cli.config.as_deref())?;
            println!("# {}", Config::config_location(cli.config.as_deref()));
            print!("{}", config.redacted().to_toml()?);
            Ok(())
        }
        Commands::Secret { action } => run_secret(action),
    }
}

fn build_agent(path: Option<&std::path::Path>) -> Result<(Agent, usize)> {
    let config = Config::load(path)?;
    let agent = Agent::from_config(&config).with_context(|| {
        format!(
            "Could not start with the configuration at {}",
            Config::config_location(path)
        )
    })?;
    Ok((agent, config.conversation.max_turns))
}

async fn run_chat(agent: &Agent, max_turns: usize) -> Result<()> {
    let mut session = SessionContext::new(max_turns);
    tracing::debug!(session = %session.id, "chat session started");
    eprintln!("logmedic ready. Ask about an application, or type `exit` to quit.");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        eprint!("> ");
        io::stderr().flush().ok();

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line.to_ascii_lowercase().as_str(), "exit" | "quit") {
            break;
        }

        let response = agent.handle_message(&mut session, line).await;
        print_response(&response, false)?;
    }
    Ok(())
}

fn print_response(response: &Response, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
    } else {
        println!("{}\n", response.render());
    }
    Ok(())
}

fn run_secret(action: SecretAction) -> Result<()> {
    match action {
        SecretAction::Set { which } => {
            let secret = Secret::from(which);
            eprint!("Enter {}: ", secret.label());
            io::stderr().flush().ok();
            let mut value = String::new();
            io::stdin()
                .read_line(&mut value)
                .context("Failed to read from stdin")?;
            let value = value.trim();
            if value.is_empty() {
                return Err(anyhow!("No value entered; nothing was stored"));
            }
            keyring::set_secret(secret, Some(value)).map_err(|e| anyhow!(e))?;
            eprintln!(
                "Stored {} in {}.",
                secret.label(),
                keyring::credentials_store_label()
            );
        }
        SecretAction::Clear { which } => {
            let secret = Secret::from(which);
            keyring::set_secret(secret, None).map_err(|e| anyhow!(e))?;
            eprintln!(
                "Removed {} from {}.",
                secret.label(),
                keyring::credentials_store_label()
            );
        }
    }
    Ok(())
}
