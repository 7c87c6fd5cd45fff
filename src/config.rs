use anyhow::Result;
use argh::FromArgs;
use serde::Deserialize;
use std::{fs, path::PathBuf};

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub store: Store,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Server {
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Server { port: 2305 }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Store {
    pub path: PathBuf,
    /// Largest message body accepted, in bytes.
    pub max_message_size: u64,
}

impl Default for Store {
    fn default() -> Self {
        Store {
            path: "mail".into(),
            max_message_size: 256 * 1024,
        }
    }
}

/// MEP2 mail server
#[derive(FromArgs)]
struct Args {
    /// configuration file to use
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
    /// port to listen on
    #[argh(option)]
    port: Option<u16>,
    /// directory holding the mail store
    #[argh(option)]
    store_path: Option<PathBuf>,
}

pub fn load() -> Result<Config> {
    let args: Args = argh::from_env();

    let mut config = match args.config {
        None => Config::default(),
        Some(path) => {
            let data = fs::read_to_string(path)?;
            toml::from_str(&data)?
        }
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Some(path) = args.store_path {
        config.store.path = path;
    }

    Ok(config)
}
