use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{config::Config, events::Event, server::CaptchaResponse};

/// The command line interface for the serial captcha bridge.
///
/// The environment variables `SERIAL_PATH`, `BAUD` and `PORT`
/// override the configuration file.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Log level for stdout. `RUST_LOG` takes precedence if set.
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log to daily rotated files in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[command(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON event pushed when a captcha arrives.
    CaptchaEvent,

    /// Show an example JSON response of the captcha query endpoint.
    CaptchaQuery,
}

/// Print what the given command asks for.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(example) => match example {
            Examples::Config => println!("{}", Config::example().serialize_pretty()),
            Examples::CaptchaEvent => println!("{}", Event::example_captcha().serialize()),
            Examples::CaptchaQuery => {
                let example = CaptchaResponse {
                    captcha: Some("X7KQ2".into()),
                };
                let serialized =
                    serde_json::to_string_pretty(&example).expect("Serialize should work");
                println!("{serialized}");
            }
        },
    }
}
