use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;

/// Runtime knobs, read once at startup from the environment (`.env` is
/// loaded by the binary before this runs).
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the websocket gateway listens.
    pub socket_bind: SocketAddr,
    /// Hard cap on queued tracks per session.
    pub queue_max_len: usize,
    /// How long an idle session keeps its voice connection.
    pub idle_timeout: Duration,
    /// Grace window for a transport to reconnect before teardown.
    pub reconnect_grace: Duration,
    /// Volume applied to sessions that never set one.
    pub default_volume: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_bind: "127.0.0.1:8080".parse().expect("static addr"),
            queue_max_len: 500,
            idle_timeout: Duration::from_secs(300),
            reconnect_grace: Duration::from_millis(3000),
            default_volume: 1.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Self {
            socket_bind: parse_var("SOCKET_BIND", defaults.socket_bind),
            queue_max_len: parse_var("QUEUE_MAX_LEN", defaults.queue_max_len),
            idle_timeout: Duration::from_secs(parse_var(
                "IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            reconnect_grace: Duration::from_millis(parse_var(
                "RECONNECT_GRACE_MS",
                defaults.reconnect_grace.as_millis() as u64,
            )),
            default_volume: parse_var("DEFAULT_VOLUME", defaults.default_volume).clamp(0.0, 1.0),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {name}={raw}");
                default
            }
        },
        Err(_) => default,
    }
}
