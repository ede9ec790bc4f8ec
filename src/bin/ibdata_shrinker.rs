use clap::Parser;
use colored::Colorize;
use ibdata_shrinker::constants::DEFAULT_PROFILE;
use ibdata_shrinker::{
    load_profile, CancelFlag, Console, MySqlClient, Orchestrator, ShrinkError, ShrinkResult,
    StageOutcome, TerminalConfirmation,
};
use log::{info, warn};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(about = "Shrink the InnoDB system tablespace in two stages")]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Profile to use in the configuration file
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Stage of operation (1=export, 2=import)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=2))]
    stage: u8,

    /// Type the database password interactively
    #[arg(short = 'P', long)]
    password: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(StageOutcome::Completed { run_id, processed }) => {
            info!("Run {} finished, {} tables processed", run_id, processed);
            0
        }
        Ok(StageOutcome::AlreadyComplete { run_id }) => {
            info!("Run {} had nothing left to do", run_id);
            0
        }
        Ok(StageOutcome::Declined) => {
            println!("Exiting now");
            0
        }
        Err(e) => {
            eprintln!("{} {}", "ERROR:".red(), e.user_message());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> ShrinkResult<StageOutcome> {
    let mut profile = load_profile(&cli.config, &cli.profile)?;
    if cli.password {
        let password = rpassword::prompt_password(format!(
            "Enter database password for {} profile: ",
            cli.profile
        ))?;
        profile = profile.with_password(password);
    }

    let confirmation = TerminalConfirmation::stdio();
    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
    let listener = {
        let cancel = Arc::clone(&cancel);
        let prompting = confirmation.waiting_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                if prompting.load(Ordering::SeqCst) {
                    // Interrupting the prompt declines the plan
                    println!("\nExiting now");
                    std::process::exit(0);
                }
                warn!("Interrupt received, stopping after the current table (press Ctrl-C again to abort now)");
                cancel.store(true, Ordering::SeqCst);
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(ShrinkError::Cancelled.exit_code());
            }
        })
    };

    let stage = cli.stage;
    let result = tokio::task::spawn_blocking(move || -> ShrinkResult<StageOutcome> {
        let client = MySqlClient::connect(&profile)?;
        Orchestrator::new(client, profile)
            .with_confirmation(Box::new(confirmation))
            .with_cancel_flag(cancel)
            .with_console(Console::stdout())
            .run_stage(stage)
    })
    .await
    .map_err(|e| ShrinkError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    listener.abort();
    result
}
