use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Secret used when JWT_SECRET is unset; only suitable for local play
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// WebTransport port
    pub port: u16,
    /// Plain HTTP port for /metrics
    pub metrics_port: u16,
    /// HS256 secret shared with the account service
    pub jwt_secret: String,
    /// Directory for the file store; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Path to TLS certificate file (if not using the generated dev cert)
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file (if not using the generated dev cert)
    pub tls_key_path: Option<String>,
    /// Concurrent connection cap
    pub max_connections: usize,
    /// Pending persistence jobs before new ones are dropped
    pub persist_queue_capacity: usize,
    /// Create a fresh account for a valid token whose account is unknown
    pub auto_register: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            metrics_port: 9090,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            data_dir: None,
            tls_cert_path: None,
            tls_key_path: None,
            max_connections: 500,
            persist_queue_capacity: 1024,
            auto_register: true,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, valid: impl Fn(&T) -> bool) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(parsed) if valid(&parsed) => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} '{}' out of range, using default", name, raw);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_env::<IpAddr>("BIND_ADDRESS", |_| true) {
            config.bind_address = addr;
        }
        if let Some(port) = parse_env::<u16>("PORT", |p| *p > 0) {
            config.port = port;
        }
        if let Some(port) = parse_env::<u16>("METRICS_PORT", |p| *p > 0) {
            config.metrics_port = port;
        }
        if let Some(max) = parse_env::<usize>("MAX_CONNECTIONS", |n| (1..=100_000).contains(n)) {
            config.max_connections = max;
        }
        if let Some(cap) = parse_env::<usize>("PERSIST_QUEUE_CAPACITY", |n| (1..=1_000_000).contains(n)) {
            config.persist_queue_capacity = cap;
        }
        if let Some(auto) = parse_env::<bool>("AUTO_REGISTER", |_| true) {
            config.auto_register = auto;
        }

        match std::env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => config.jwt_secret = secret,
            _ => tracing::warn!("JWT_SECRET not set, using the development secret"),
        }

        if let Ok(dir) = std::env::var("DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(cert_path) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }
        if let Ok(key_path) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.port == self.metrics_port {
            return Err("PORT and METRICS_PORT must differ".to_string());
        }
        if self.jwt_secret.is_empty() {
            return Err("JWT_SECRET cannot be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }
        if self.persist_queue_capacity == 0 {
            return Err("persist_queue_capacity must be at least 1".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}
