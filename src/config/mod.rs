use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub room: RoomConfig,
    pub logging: LoggingConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on `POST /classrooms/{id}/events` when set
    pub events_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Http,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "http" => Ok(StoreBackend::Http),
            other => Err(format!("unknown classroom store backend: {}", other)),
        }
    }
}

pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Base URL of the classroom CRUD service, used by the http backend
    pub api_url: Option<String>,
    /// JSON file of classroom records loaded into the memory backend
    pub seed_file: Option<String>,
    pub timeout: Duration,
}

pub struct RoomConfig {
    /// Attendees per page in the member layout
    pub page_size: usize,
}

pub struct LoggingConfig {
    pub json: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("SERVER_PORT", 5001),
                events_token: env::var("CONTENT_EVENTS_TOKEN").ok().filter(|v| !v.is_empty()),
            },
            store: StoreConfig {
                backend: env_or("CLASSROOM_STORE", StoreBackend::Memory),
                api_url: env::var("CLASSROOM_API_URL").ok().filter(|v| !v.is_empty()),
                seed_file: env::var("CLASSROOM_SEED_FILE").ok().filter(|v| !v.is_empty()),
                timeout: Duration::from_millis(env_or("STORE_TIMEOUT_MS", 5000)),
            },
            room: RoomConfig {
                page_size: env_or("MEMBERS_PAGE_SIZE", 9usize).max(1),
            },
            logging: LoggingConfig {
                json: env::var("LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
        }
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

/// Reads and parses an environment variable, falling back to `default`
/// when it is unset or unparseable.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, value = %raw, error = %e, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_host(host: &str, port: u16) -> Config {
        Config {
            server: ServerConfig {
                host: host.to_string(),
                port,
                events_token: None,
            },
            store: StoreConfig {
                backend: StoreBackend::Memory,
                api_url: None,
                seed_file: None,
                timeout: Duration::from_secs(5),
            },
            room: RoomConfig { page_size: 9 },
            logging: LoggingConfig { json: false },
        }
    }

    #[test]
    fn test_parse_localhost() {
        let config = config_with_host("localhost", 5001);
        assert_eq!(config.bind_address(), ([127, 0, 0, 1], 5001));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let config = config_with_host("192.168.1.1", 3000);
        assert_eq!(config.bind_address(), ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_empty_host() {
        let config = config_with_host("", 5001);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 5001));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let config = config_with_host("invalid-hostname", 9000);
        assert_eq!(config.bind_address(), ([0, 0, 0, 0], 9000));
    }

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!(" HTTP ".parse::<StoreBackend>(), Ok(StoreBackend::Http));
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("CLASSROOM_LIVE_TEST_PAGE_SIZE", "nine");
        assert_eq!(env_or("CLASSROOM_LIVE_TEST_PAGE_SIZE", 9usize), 9);

        env::set_var("CLASSROOM_LIVE_TEST_PAGE_SIZE", "12");
        assert_eq!(env_or("CLASSROOM_LIVE_TEST_PAGE_SIZE", 9usize), 12);

        assert_eq!(env_or("CLASSROOM_LIVE_TEST_UNSET_KEY", 7u16), 7);
    }
}
