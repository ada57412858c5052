use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use bridge::gateway::{GatewayResponse, InboundMessage, WsFrame, ACTION_PUSH_MESSAGE, ACTION_SEND_MESSAGE};

#[derive(Parser)]
#[command(name = "sms-bridge")]
#[command(about = "Route inbound messages into per-sender Telegram forum topics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration file (with generated signing secrets) and the data directory.
    Init {
        /// Config file path (default: SMS_BRIDGE_CONFIG or ~/.sms-bridge/config.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Thread cache directory, recorded as dataDir in a newly written config
        #[arg(long, value_name = "DIR")]
        data_dir: Option<std::path::PathBuf>,
    },

    /// Run the bridge (HTTP `POST /message` and WebSocket `/ws`).
    Serve {
        /// Config file path (default: SMS_BRIDGE_CONFIG or ~/.sms-bridge/config.yaml)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Thread cache directory (default from config or ~/.sms-bridge/data)
        #[arg(long, value_name = "DIR")]
        data_dir: Option<std::path::PathBuf>,

        /// Serve both transports on this port
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print a signature for a timestamp (default: now, in Unix milliseconds).
    Sign {
        #[arg(long, short)]
        secret: String,

        #[arg(long, short)]
        timestamp: Option<String>,
    },

    /// Send a signed test message to a running bridge.
    Send {
        /// Config file path (secrets and ports are read from it)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        #[arg(long)]
        sender: String,

        #[arg(long)]
        text: String,

        /// Use the WebSocket transport instead of HTTP
        #[arg(long)]
        ws: bool,

        /// With --ws, stay connected and print pushed replies
        #[arg(long, requires = "ws")]
        listen: bool,

        /// Override the target URL (default: 127.0.0.1 and the configured port)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("sms-bridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config, data_dir }) => {
            if let Err(e) = run_init(config, data_dir) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, data_dir, port }) => {
            if let Err(e) = run_serve(config, data_dir, port).await {
                log::error!("serve failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Sign { secret, timestamp }) => {
            let timestamp = timestamp.unwrap_or_else(|| bridge::signature::now_millis().to_string());
            println!("timestamp: {}", timestamp);
            println!("signature: {}", bridge::signature::sign(&timestamp, &secret));
        }
        Some(Commands::Send { config, sender, text, ws, listen, url }) => {
            if let Err(e) = run_send(config, sender, text, ws, listen, url).await {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(
    config_path: Option<std::path::PathBuf>,
    data_dir: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(bridge::config::default_config_path);
    let data_dir = bridge::init::init_config_dir(&path, data_dir.as_deref())?;
    println!("initialized configuration at {}", path.display());
    println!("thread cache directory: {}", data_dir.display());
    println!("set telegram.botToken (or TELEGRAM_BOT_TOKEN) and telegram.targetGroupId before serving");
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    data_dir: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = bridge::config::load_config(config_path)?;
    bridge::init::require_initialized(&path)?;
    if let Some(p) = port {
        config.http.port = p;
        config.ws.port = p;
    }
    let data_dir = config.resolve_data_dir(data_dir);
    log::info!("config {}, thread cache in {}", path.display(), data_dir.display());
    bridge::gateway::run_gateway(config, data_dir).await
}

async fn run_send(
    config_path: Option<std::path::PathBuf>,
    sender: String,
    text: String,
    use_ws: bool,
    listen: bool,
    url: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = bridge::config::load_config(config_path)?;
    let secret = if use_ws { &config.ws.secret_key } else { &config.http.secret_key };
    let timestamp = bridge::signature::now_millis().to_string();
    let msg = InboundMessage {
        signature: bridge::signature::sign(&timestamp, secret),
        timestamp,
        sender,
        text,
    };

    if !use_ws {
        let scheme = if config.http.tls.is_enabled() { "https" } else { "http" };
        let url = url.unwrap_or_else(|| format!("{}://127.0.0.1:{}/message", scheme, config.http.port));
        let res: GatewayResponse = reqwest::Client::new()
            .post(&url)
            .json(&msg)
            .send()
            .await?
            .json()
            .await?;
        println!("{}", serde_json::to_string_pretty(&res)?);
        return Ok(());
    }

    let scheme = if config.ws.tls.is_enabled() { "wss" } else { "ws" };
    let url = url.unwrap_or_else(|| format!("{}://127.0.0.1:{}/ws", scheme, config.ws.port));
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await?;
    let frame = WsFrame {
        action: ACTION_SEND_MESSAGE.to_string(),
        payload: msg,
    };
    ws.send(Message::Text(serde_json::to_string(&frame)?)).await?;

    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else { continue };
        let value: serde_json::Value = serde_json::from_str(&text)?;
        if value.get("action").and_then(|a| a.as_str()) == Some(ACTION_PUSH_MESSAGE) {
            let reply = value
                .get("payload")
                .and_then(|p| p.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("");
            println!("< {}", reply);
            continue;
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        if !listen {
            break;
        }
    }
    let _ = ws.close(None).await;
    Ok(())
}
