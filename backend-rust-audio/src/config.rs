use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_CHUNK_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Request body limit; bounds the size of one uploaded chunk.
    pub max_chunk_bytes: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = match env::var("AUDIO_HOST") {
            // Windows env vars are easy to set with trailing whitespace.
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("AUDIO_HOST must be an IP address: {e}"))?,
            Err(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };

        let port = match env::var("AUDIO_PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("AUDIO_PORT must be a valid port number: {e}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let max_chunk_bytes = env::var("AUDIO_MAX_CHUNK_BYTES")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_CHUNK_BYTES);

        Ok(Self {
            host,
            port,
            max_chunk_bytes,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
