//! One-shot client commands against a running daemon.

use headless_core::{Command, Notification, Response};
use headless_socket::LineClient;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Status,
    Start,
    Stop,
    Restart,
    Watch,
}

impl ClientCommand {
    fn command(self) -> Command {
        match self {
            ClientCommand::Status => Command::GetHeadlessConfig,
            ClientCommand::Start => Command::Start,
            ClientCommand::Stop => Command::Stop,
            ClientCommand::Restart => Command::Restart,
            ClientCommand::Watch => Command::Subscribe,
        }
    }
}

async fn connect(socket: &Path) -> Result<LineClient, Box<dyn std::error::Error>> {
    LineClient::connect(socket).await.map_err(|e| {
        format!(
            "headlessd is not reachable at {} ({}). Is the daemon running?",
            socket.display(),
            e
        )
        .into()
    })
}

/// Send one command and return its response.
pub async fn request(socket: &Path, command: Command) -> Result<Response, Box<dyn std::error::Error>> {
    let mut client = connect(socket).await?;
    Ok(client.request(&command.to_request()).await?)
}

/// Run a client command, printing server output to stdout.
///
/// Returns whether the daemon reported success.
pub async fn run(socket: &Path, command: ClientCommand) -> Result<bool, Box<dyn std::error::Error>> {
    if command == ClientCommand::Watch {
        return watch(socket).await;
    }

    let response = request(socket, command.command()).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.is_ok())
}

async fn watch(socket: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let mut client = connect(socket).await?;
    let ack: Response = client.request(&Command::Subscribe.to_request()).await?;
    if !ack.is_ok() {
        eprintln!("{}", ack.error_message().unwrap_or("subscribe rejected"));
        return Ok(false);
    }

    while let Some(notification) = client.recv::<Notification>().await? {
        println!("{}", serde_json::to_string(&notification)?);
    }
    Ok(true)
}
