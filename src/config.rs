use std::path::PathBuf;

use clap::Parser;

/// Expose a Slack workspace as a single-user IRC server.
#[derive(Parser, Debug, Clone)]
#[command(name = "slack-irc-gateway", version, about)]
pub struct ServerConfig {
    /// IP address to listen on.
    #[arg(long, short = 'H', default_value = "127.0.0.1")]
    pub host: String,

    /// Local port to listen on.
    #[arg(long, short = 'p', default_value_t = 6666)]
    pub port: u16,

    /// IRC server name, i.e. the host name presented to clients.
    #[arg(long, short = 's', default_value = "localhost")]
    pub server_name: String,

    /// TLS certificate PEM file. Requires --tls-key.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<String>,

    /// TLS private key PEM file. Requires --tls-cert.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<String>,

    /// Maximum bytes per reply line sent to the client. Only certain reply
    /// types are split; values below 512 disable splitting.
    #[arg(long, default_value_t = 512)]
    pub chunk_size: usize,

    /// Download file attachments into this directory.
    #[arg(long, short = 'd')]
    pub download_location: Option<PathBuf>,

    /// Rewrite attachment URLs with this prefix and the local file name
    /// inside the directory set with --download-location.
    #[arg(long, short = 'l')]
    pub file_prefix: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'L', default_value = "info")]
    pub log_level: String,

    /// Enable debug logging of the Slack API.
    #[arg(long, short = 'D')]
    pub slack_debug: bool,

    /// Pagination value for Slack API listings. 0 uses the server default;
    /// larger values can help on large Slack teams.
    #[arg(long, short = 'P', default_value_t = 0)]
    pub pagination: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6666,
            server_name: "localhost".to_string(),
            tls_cert: None,
            tls_key: None,
            chunk_size: 512,
            download_location: None,
            file_prefix: None,
            log_level: "info".to_string(),
            slack_debug: false,
            pagination: 0,
        }
    }
}

impl ServerConfig {
    /// Returns true if TLS is configured.
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:6666");
        assert_eq!(config.chunk_size, 512);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn tls_requires_both_halves() {
        let config = ServerConfig {
            tls_cert: Some("cert.pem".to_string()),
            ..Default::default()
        };
        assert!(!config.tls_enabled());
    }
}
