use std::{process::ExitCode, time::Duration};

use log::{error, info};
use snipbox::{logger, Config, Context, Database, SnippetStore, UserStore};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = logger::init(config.log_level) {
        eprintln!("Failed to initialize logging: {}", err);
        return ExitCode::FAILURE;
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Open the database (creating the schema if needed), build both stores and report.
fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting snipbox against {}", config.database.path.display());

    let database = Database::open(&config.database)?;
    let snippets = SnippetStore::new(database.clone());
    let users = UserStore::new(database.clone(), &config.hashing)?;

    let ctx = Context::with_timeout(STARTUP_TIMEOUT);
    let visible = snippets.latest(&ctx)?;
    info!("{} recent snippets visible", visible.len());

    // The stores hold pool handles too; the pool only closes once all are gone.
    drop(users);
    drop(snippets);
    database.close();
    Ok(())
}
