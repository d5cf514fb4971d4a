//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::RoomSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret for bearer token verification
    pub jwt_secret: String,
    /// Allowed client origins for CORS, comma separated
    pub client_origin: String,

    /// How long a dropped player's seat is held during play
    pub reconnect_window: Duration,
    /// Pause before the turn passes after a roll with no move
    pub turn_advance_delay: Duration,
    /// Lifetime of a room-code registry entry
    pub room_code_ttl: Duration,
    /// Lifetime of a presence entry
    pub presence_ttl: Duration,
    /// How long an empty waiting room survives
    pub empty_room_grace: Duration,

    /// PostgREST journal, in-memory when absent
    pub supabase: Option<SupabaseConfig>,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let supabase = match (env::var("SUPABASE_URL"), env::var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Ok(url), Ok(service_role_key)) => Some(SupabaseConfig { url, service_role_key }),
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (Err(_), Ok(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
            (Err(_), Err(_)) => None,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            reconnect_window: Duration::from_secs(number_var("RECONNECT_WINDOW_SECS", 20)?),
            turn_advance_delay: Duration::from_millis(number_var("TURN_ADVANCE_DELAY_MS", 900)?),
            room_code_ttl: Duration::from_secs(number_var("ROOM_CODE_TTL_SECS", 3600)?),
            presence_ttl: Duration::from_secs(number_var("PRESENCE_TTL_SECS", 60)?),
            empty_room_grace: Duration::from_secs(number_var("EMPTY_ROOM_GRACE_SECS", 30)?),

            supabase,
        })
    }

    /// Timings handed to every room actor
    pub fn room_settings(&self) -> RoomSettings {
        RoomSettings {
            reconnect_window: self.reconnect_window,
            turn_advance_delay: self.turn_advance_delay,
            empty_room_grace: self.empty_room_grace,
        }
    }

    /// Defaults with an in-memory journal
    #[cfg(test)]
    pub(crate) fn for_tests(jwt_secret: &str) -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: "debug".to_string(),
            jwt_secret: jwt_secret.to_string(),
            client_origin: "http://localhost:5173".to_string(),
            reconnect_window: Duration::from_secs(20),
            turn_advance_delay: Duration::from_millis(900),
            room_code_ttl: Duration::from_secs(3600),
            presence_ttl: Duration::from_secs(60),
            empty_room_grace: Duration::from_secs(30),
            supabase: None,
        }
    }
}

fn number_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    parse_number(name, env::var(name).ok(), default)
}

fn parse_number<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_default_when_unset() {
        assert_eq!(parse_number::<u64>("X", None, 20).unwrap(), 20);
        assert_eq!(parse_number::<u64>("X", Some(" 45 ".into()), 20).unwrap(), 45);
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = parse_number::<u64>("RECONNECT_WINDOW_SECS", Some("soon".into()), 20).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid("RECONNECT_WINDOW_SECS")));
    }
}
