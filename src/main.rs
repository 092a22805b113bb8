use std::process::ExitCode;

use bankcore::application::LedgerError;
use bankcore::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.init_logging();

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<LedgerError>()
                .map(LedgerError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
