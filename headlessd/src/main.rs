use clap::Parser;

use headlessd::cli::{Cli, Commands};
use headlessd::client::{self, ClientCommand};
use headlessd::daemon::{self, DaemonConfig};
use headlessd::{logging, paths};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let home = match cli.home.clone() {
        Some(home) => home,
        None => paths::headlessd_home_dir()?,
    };

    let rt = tokio::runtime::Runtime::new()?;

    let command = match cli.command {
        Commands::Serve(args) => {
            let config = DaemonConfig::resolve(home, cli.socket, &args)?;
            let log_dir = config.log_dir();
            let _log_guard = logging::init(config.log_format, &config.log_level, log_dir.as_deref())?;
            rt.block_on(daemon::run(config))?;
            return Ok(());
        }
        Commands::Status => ClientCommand::Status,
        Commands::Start => ClientCommand::Start,
        Commands::Stop => ClientCommand::Stop,
        Commands::Restart => ClientCommand::Restart,
        Commands::Watch => ClientCommand::Watch,
    };

    logging::init_client();
    let socket = daemon::client_socket_path(&home, cli.socket);
    let ok = rt.block_on(client::run(&socket, command))?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
