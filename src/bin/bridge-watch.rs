use clap::Parser;
use color_eyre::Result;
use serial_captcha_bridge::{client::ClientHandle, events::Event};
use tracing::{error, info, warn, Level};

/// Watches a running bridge.
/// Connects over websocket and logs every event it pushes.
#[derive(Parser, Debug)]
struct Args {
    /// Server address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Server port.
    #[arg(short, long, default_value_t = serial_captcha_bridge::config::DEFAULT_PORT)]
    port: u16,

    /// Only show captchas.
    #[arg(short, long)]
    captcha_only: bool,
}

async fn run(args: Args) -> Result<()> {
    let mut client = ClientHandle::new(&args.address, args.port).await?;

    loop {
        match client.next_event().await? {
            Event::Captcha(captcha) => info!(%captcha, "Captcha"),
            Event::Serial(line) if !args.captcha_only => info!(%line, "Serial"),
            Event::Link(state) => warn!(%state, "Link"),
            Event::Serial(_) => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    serial_captcha_bridge::logging::init(Level::INFO, None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        result = run(args) => {
            error!(?result, "Connection ended");
            result?;
        }
    }

    Ok(())
}
