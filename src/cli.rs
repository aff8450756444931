use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ddalab_playback::{FileOptions, LiveOptions, LoaderConfig, ServerConfig, StreamOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ddalab-playback",
    version,
    about = "Play back a recorded or live log from a DDALAB log server",
    long_about = "Connects to a log server, buffers data around a moving playhead and logs\n\
                  the frame visible at the playhead. Set RUST_LOG to control log output."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Interval between frame reports, in milliseconds
    #[arg(long, default_value_t = 1000, global = true)]
    pub report_ms: u64,

    /// Playback speed; 0 keeps the playhead still
    #[arg(long, default_value_t = 1.0, global = true)]
    pub rate: f64,

    /// Initial playhead
    #[arg(long, global = true)]
    pub seek: Option<f64>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Play a recorded log over a WebSocket
    Stream(StreamArgs),
    /// Follow a live log over a WebSocket
    Live(LiveArgs),
    /// Play a log served as HTTP chunks
    File(FileArgs),
    /// Load the loader configuration from a JSON file
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ServerArgs {
    /// WebSocket URL of the log server
    #[arg(long, env = "PLAYBACK_SERVER_URL")]
    pub server_url: String,

    /// Log profile
    #[arg(long, default_value = "default")]
    pub profile: String,

    /// Seconds of data to keep buffered around the playhead
    #[arg(long, default_value_t = 30.0)]
    pub buffer_length: f64,

    /// Connection attempts before giving up
    #[arg(long, env = "PLAYBACK_RETRY_ATTEMPTS")]
    pub retry_attempts: Option<u32>,

    /// Extra query parameters as key=value
    #[arg(long = "query", value_parser = parse_key_val, num_args = 1..)]
    pub query: Vec<(String, String)>,
}

impl ServerArgs {
    fn server_config(&self) -> ServerConfig {
        let mut server = ServerConfig::new(self.server_url.clone());
        server.retry_attempts = self.retry_attempts;
        server.query_params = self.query.iter().cloned().collect();
        server
    }
}

#[derive(Args)]
pub struct StreamArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Log identifier
    #[arg(long, env = "PLAYBACK_LOG")]
    pub log: String,

    /// Length of the log view to open, in seconds
    #[arg(long, env = "PLAYBACK_DEFAULT_LOG_LENGTH")]
    pub duration: Option<f64>,

    /// Timestamp to open the log at
    #[arg(long)]
    pub timestamp: Option<f64>,
}

#[derive(Args)]
pub struct LiveArgs {
    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Args)]
pub struct FileArgs {
    /// Base URL of the chunk endpoint
    #[arg(long, env = "PLAYBACK_CHUNK_URL")]
    pub url: String,

    /// Chunk length in seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Anchor of the first chunk
    #[arg(long)]
    pub timestamp: Option<f64>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// JSON file holding a tagged loader configuration
    pub path: PathBuf,
}

impl Command {
    pub fn into_config(self) -> Result<LoaderConfig> {
        let config = match self {
            Command::Stream(args) => {
                let mut options = StreamOptions::new(args.server.server_config(), args.log);
                options.log_profile = args.server.profile;
                options.buffer_length = args.server.buffer_length;
                options.duration = args.duration;
                options.timestamp = args.timestamp;
                LoaderConfig::Stream(options)
            }
            Command::Live(args) => {
                let mut options = LiveOptions::new(args.server.server_config());
                options.log_profile = args.server.profile;
                options.buffer_length = args.server.buffer_length;
                LoaderConfig::Live(options)
            }
            Command::File(args) => LoaderConfig::File(FileOptions {
                url: args.url,
                duration: args.duration,
                timestamp: args.timestamp,
            }),
            Command::Config(args) => {
                let text = std::fs::read_to_string(&args.path)
                    .with_context(|| format!("Failed to read {}", args.path.display()))?;
                serde_json::from_str::<LoaderConfig>(&text)
                    .with_context(|| format!("Invalid loader configuration in {}", args.path.display()))?
            }
        };
        Ok(config)
    }
}

fn parse_key_val(s: &str) -> Result<(String, String)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("expected key=value, got '{}'", s),
    }
}
