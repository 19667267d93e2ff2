use marketgate::auth::AccountDirectory;
use marketgate::config;
use marketgate::repl::{self, Console};
use marketgate::Gateway;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    // Logs go to stderr so they never interleave with console output
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    info!("Starting marketgate...");

    // First argument overrides the default configuration path
    let path = match std::env::args().nth(1).map(PathBuf::from).or_else(config::default_config_path) {
        Some(path) => path,
        None => {
            eprintln!("No configuration file given and no default location available.");
            return ExitCode::FAILURE;
        }
    };

    let config = match config::load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %path.display(), "failed to load configuration");
            eprintln!("Failed to load configuration from {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let accounts = match AccountDirectory::from_config(&config.accounts) {
        Ok(accounts) => accounts,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if accounts.is_empty() {
        eprintln!("Warning: no [[accounts]] configured, nobody will be able to log in.");
    }

    let connector = config.connector();
    let procedure_names = connector.procedures().names().into_iter().map(String::from).collect();
    let function_names = connector.functions().names().into_iter().map(String::from).collect();
    let mut console = Console::new(Gateway::new(connector), config.database.descriptor(), accounts)
        .with_procedure_names(procedure_names)
        .with_function_names(function_names);

    match repl::run_repl(&mut console) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Console stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
