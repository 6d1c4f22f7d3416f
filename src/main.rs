use clap::error::ErrorKind;
use clap::Parser;

use capns::cli::{self, Cli};
use capns::exit_codes::ExitCode;
use capns::logging;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
                _ => ExitCode::Usage,
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    if let Err(e) = logging::init_tracing(cli.verbose) {
        eprintln!("failed to initialize logging: {e}");
    }

    let code = match cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            cli::error_exit_code(&e)
        }
    };
    std::process::exit(code.as_i32());
}
