//! Command line entry point.
//!
//! One invocation runs one operation: the positional JSON payload goes in,
//! the `{success, data, error}` envelope comes out on stdout, and the exit
//! code mirrors the envelope. All logging stays on stderr and the log file.

use clap::Parser;
use civicrag::logging;
use civicrag::ops::ApiResponse;
use civicrag::ops::Operation;
use civicrag::ops::Runner;
use civicrag::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "civicrag")]
#[command(about = "Municipal complaint analysis and retrieval operations")]
#[command(version)]
struct Cli {
    /// Operation to execute
    #[arg(value_enum)]
    operation: Operation,

    /// JSON payload for the operation
    #[arg(default_value = "{}")]
    data: String,

    /// Config file path (defaults to config.toml, then config.example.toml)
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return emit(&ApiResponse::error(e.to_string())),
    };

    let logging_result = if cli.verbose {
        logging::init_logging_with_level("debug")
    } else {
        logging::init_logging_with_config(Some(&config))
    };
    if let Err(e) = logging_result {
        eprintln!("Failed to initialize logging: {e}");
    }

    if let Err(e) = config.validate() {
        return emit(&ApiResponse::error(e.to_string()));
    }

    let data: serde_json::Value = match serde_json::from_str(&cli.data) {
        Ok(value) => value,
        Err(e) => return emit(&ApiResponse::error(format!("Invalid JSON input: {e}"))),
    };

    let runner = match Runner::new(config).await {
        Ok(runner) => runner,
        Err(e) => return emit(&ApiResponse::error(e.to_string())),
    };

    emit(&runner.run(cli.operation, data).await)
}

fn load_config(path: Option<&str>) -> civicrag::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
}

/// Print the envelope to stdout and translate it into an exit code.
fn emit(response: &ApiResponse<serde_json::Value>) -> i32 {
    match serde_json::to_string_pretty(response) {
        Ok(rendered) => {
            println!("{rendered}");
            i32::from(!response.success)
        }
        Err(e) => {
            eprintln!("Failed to render response: {e}");
            1
        }
    }
}
