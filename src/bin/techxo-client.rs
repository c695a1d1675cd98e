use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use techxo_chat::client::{ApiClient, ClientError, ClientSession, FileCredentialStore, ReconnectPolicy, SessionEnd};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "techxo-client", about = "Terminal client for the TechXO chat")]
struct Cli {
    /// Base url of the chat server
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    server: String,
    #[arg(long, default_value = "global")]
    room: String,
    /// Where the login is kept between runs
    #[arg(long, default_value = ".techxo-credentials.json")]
    credentials: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Register {
        username: String,
        email: String,
        password: String,
    },
    Login {
        email: String,
        password: String,
    },
    Logout,
    /// Show who the stored login belongs to
    Whoami,
    /// Join the room; each line on stdin is sent as a message
    Chat,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("techxo_chat=warn")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, ClientError> {
    let api = ApiClient::new(&cli.server)?;
    let store = FileCredentialStore::new(cli.credentials);
    let mut session = ClientSession::new(api, store, cli.room, ReconnectPolicy::default());

    match cli.command {
        Command::Register {
            username,
            email,
            password,
        } => {
            let user = session.register(&username, &email, &password).await?;
            println!("registered as {}", user.username);
        }
        Command::Login { email, password } => {
            let user = session.login(&email, &password).await?;
            println!("logged in as {}", user.username);
        }
        Command::Logout => {
            session.logout()?;
            println!("logged out");
        }
        Command::Whoami => match session.restore().await? {
            true => {
                if let Some(user) = session.identity() {
                    println!("{} <{}>", user.username, user.email);
                }
            }
            false => {
                println!("not logged in");
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::Chat => {
            if !session.restore().await? {
                eprintln!("not logged in, run `techxo-client login` first");
                return Ok(ExitCode::FAILURE);
            }

            let (tx, mut rx) = mpsc::channel(32);
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });

            if session.run(&mut rx, |line| println!("{line}")).await? == SessionEnd::LoginRequired {
                eprintln!("your login is no longer valid, please log in again");
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
