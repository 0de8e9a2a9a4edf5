#![allow(dead_code)]

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serial_captcha_bridge::{
    client::ClientHandle, config::Config, events::Event, mock::ScriptedConnector,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    net::TcpStream,
    sync::oneshot,
    time::timeout,
};
use tracing::info;

pub const RECONNECT_DELAY_MS: u64 = 100;

#[macro_export]
macro_rules! assert_serial {
    ($event:expr, $line:expr) => {
        assert_eq!(
            $event,
            serial_captcha_bridge::events::Event::Serial($line.into())
        );
    };
}

#[macro_export]
macro_rules! assert_captcha {
    ($event:expr, $captcha:expr) => {
        assert_eq!(
            $event,
            serial_captcha_bridge::events::Event::Captcha($captcha.into())
        );
    };
}

pub struct TestBridge {
    pub port: u16,
    pub connector: ScriptedConnector,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.reconnect.delay_ms = RECONNECT_DELAY_MS;
    config
}

/// Start a bridge whose device cannot be opened until the test pushes one.
pub async fn start_bridge() -> TestBridge {
    let connector = ScriptedConnector::new("test-device");
    let (port_tx, port_rx) = oneshot::channel();

    let server_connector = connector.clone();
    tokio::spawn(async move {
        serial_captcha_bridge::server::run_any_port(test_config(), server_connector, port_tx).await
    });

    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    TestBridge { port, connector }
}

/// Start a bridge with a device which opens right away.
pub async fn start_bridge_with_device() -> (TestBridge, DuplexStream) {
    let connector = ScriptedConnector::new("test-device");
    let device = connector.push_device();
    let (port_tx, port_rx) = oneshot::channel();

    let server_connector = connector.clone();
    tokio::spawn(async move {
        serial_captcha_bridge::server::run_any_port(test_config(), server_connector, port_tx).await
    });

    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    (TestBridge { port, connector }, device)
}

pub async fn connect(port: u16) -> Result<ClientHandle> {
    info!("Connecting to bridge on port {port}");
    Ok(ClientHandle::new("127.0.0.1", port).await?)
}

pub async fn write_line(device: &mut DuplexStream, line: &str) -> Result<()> {
    device.write_all(line.as_bytes()).await?;
    device.write_all(b"\r\n").await?;
    Ok(())
}

pub async fn next_event(client: &mut ClientHandle) -> Result<Event> {
    Ok(timeout(Duration::from_secs(5), client.next_event()).await??)
}

pub async fn next_data_event(client: &mut ClientHandle) -> Result<Event> {
    Ok(timeout(Duration::from_secs(5), client.next_data_event()).await??)
}

/// A websocket client subscribes a little after its handshake completes.
/// Write lines until the client sees one, so later lines are sure to reach it.
///
/// Returns every captcha seen while syncing.
pub async fn sync(client: &mut ClientHandle, device: &mut DuplexStream) -> Result<Vec<String>> {
    let mut captchas = vec![];

    for attempt in 0..100 {
        write_line(device, &format!("sync-{attempt}")).await?;

        match timeout(Duration::from_millis(50), client.next_data_event()).await {
            Ok(Ok(Event::Captcha(captcha))) => captchas.push(captcha),
            Ok(Ok(_)) => {
                write_line(device, "sync-done").await?;

                loop {
                    match next_data_event(client).await? {
                        Event::Serial(line) if line == "sync-done" => return Ok(captchas),
                        Event::Captcha(captcha) => captchas.push(captcha),
                        _ => continue,
                    }
                }
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_elapsed) => continue,
        }
    }

    Err(eyre!("Client never started receiving lines"))
}

/// A plain HTTP/1.1 GET, returning the status code and body.
pub async fn http_get(port: u16, path: &str) -> Result<(u16, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    timeout(Duration::from_secs(5), stream.read_to_string(&mut response)).await??;

    let status = response
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| eyre!("No status in `{response}`"))?
        .parse()?;

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_owned())
        .unwrap_or_default();

    Ok((status, body))
}
