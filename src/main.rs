use std::process::ExitCode;

use clap::Parser;
use subscriber_import::configuration::Cli;
use subscriber_import::startup::Application;
use subscriber_import::startup::RunError;
use subscriber_import::telemetry::get_subscriber;
use subscriber_import::telemetry::init_subscriber;

/// 0: everything uploaded (or nothing to upload), 1: a batch or the CSV
/// failed, 2: missing configuration (nothing was sent)
const EXIT_CONFIGURATION: u8 = 2;

// one request in flight at a time
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // stdout is reserved for progress; logs go to stderr, and only warnings
    // and up unless RUST_LOG says otherwise
    let subscriber = get_subscriber("subscriber-import", "warn", std::io::stderr);
    if let Err(e) = init_subscriber(subscriber) {
        eprintln!("could not initialise logging: {e}");
    }

    let app = match Application::build(&cli) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "invalid configuration");
            eprintln!("{e}");
            return ExitCode::from(EXIT_CONFIGURATION);
        }
    };

    match app.run().await {
        Ok(summary) => {
            tracing::info!(?summary, "import finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "import failed");
            match e {
                // the diagnostic already quotes the cause
                RunError::BatchFailed { .. } => eprintln!("{e}"),
                RunError::Import(_) => eprintln!("{e:?}"),
            }
            ExitCode::FAILURE
        }
    }
}
