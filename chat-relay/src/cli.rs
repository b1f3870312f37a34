use std::net::SocketAddr;

use clap::Parser;

use crate::hub::{DEFAULT_CHUNK_SIZE, RelayConfig};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Buffer size, in bytes, used when streaming a file to a single user.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_chunk_size)]
    pub chunk_size: usize,
}

impl Cli {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            chunk_size: self.chunk_size,
        }
    }
}

fn parse_chunk_size(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("chunk size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(err) => Err(err.to_string()),
    }
}
