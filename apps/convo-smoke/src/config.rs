//! Environment-backed configuration for `convo-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use convo_core::{DEFAULT_TIMELINE_MAX_ITEMS, ParticipantId};
use url::Url;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_HISTORY_LIMIT: u16 = 50;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Runtime configuration used by the smoke client.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// HTTP origin of the chat service.
    pub base_url: Url,
    /// Explicit live channel origin. Derived from `base_url` when unset.
    pub ws_url: Option<Url>,
    pub self_id: ParticipantId,
    /// Conversation partner; the first CLI argument takes precedence.
    pub peer_id: Option<ParticipantId>,
    /// Entries requested per history load.
    pub history_limit: u16,
    pub timeline_max_items: usize,
    pub http_timeout: Duration,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = parse_url(
            "CONVO_BASE_URL",
            optional_trimmed_env("CONVO_BASE_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
        )?;
        let ws_url = optional_trimmed_env("CONVO_WS_URL", &mut lookup)
            .map(|value| parse_url("CONVO_WS_URL", value))
            .transpose()?;

        let self_id = optional_trimmed_env("CONVO_SELF_ID", &mut lookup)
            .ok_or(ConfigError::Missing {
                key: "CONVO_SELF_ID",
            })
            .and_then(|value| parse_participant("CONVO_SELF_ID", value))?;
        let peer_id = optional_trimmed_env("CONVO_PEER_ID", &mut lookup)
            .map(|value| parse_participant("CONVO_PEER_ID", value))
            .transpose()?;

        let history_limit = parse_with_default::<u16, _>(
            "CONVO_HISTORY_LIMIT",
            DEFAULT_HISTORY_LIMIT,
            &mut lookup,
        )?;
        let timeline_max_items = parse_with_default::<usize, _>(
            "CONVO_TIMELINE_MAX_ITEMS",
            DEFAULT_TIMELINE_MAX_ITEMS,
            &mut lookup,
        )?;
        let http_timeout_ms = parse_with_default::<u64, _>(
            "CONVO_HTTP_TIMEOUT_MS",
            DEFAULT_HTTP_TIMEOUT_MS,
            &mut lookup,
        )?;

        if history_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CONVO_HISTORY_LIMIT",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if timeline_max_items == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CONVO_TIMELINE_MAX_ITEMS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            base_url,
            ws_url,
            self_id,
            peer_id,
            history_limit,
            timeline_max_items,
            http_timeout: Duration::from_millis(http_timeout_ms),
        })
    }

    /// Resolve the peer from the first CLI argument or `CONVO_PEER_ID`.
    pub fn resolve_peer(&self, arg: Option<String>) -> Result<ParticipantId, ConfigError> {
        if let Some(arg) = arg.filter(|value| !value.trim().is_empty()) {
            return parse_participant("CONVO_PEER_ID", arg);
        }
        self.peer_id.clone().ok_or(ConfigError::Missing {
            key: "CONVO_PEER_ID",
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    /// A required environment variable is not set.
    Missing { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
            Self::Missing { key } => write!(f, "{key} must be set"),
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_with_default<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_url(key: &'static str, value: String) -> Result<Url, ConfigError> {
    Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.to_string(),
    })
}

fn parse_participant(key: &'static str, value: String) -> Result<ParticipantId, ConfigError> {
    ParticipantId::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value,
        reason: err.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn parses_required_fields_and_defaults() {
        let cfg = config_from_pairs(&[("CONVO_SELF_ID", "1")]).expect("config should parse");

        assert_eq!(cfg.base_url.as_str(), "http://localhost:8000/");
        assert_eq!(cfg.ws_url, None);
        assert_eq!(cfg.self_id, ParticipantId::Numeric(1));
        assert_eq!(cfg.peer_id, None);
        assert_eq!(cfg.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(cfg.timeline_max_items, DEFAULT_TIMELINE_MAX_ITEMS);
        assert_eq!(cfg.http_timeout, Duration::from_secs(10));
    }

    #[test]
    fn self_id_is_required() {
        let err = config_from_pairs(&[("CONVO_SELF_ID", "  ")]).expect_err("blank self id");
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "CONVO_SELF_ID"
            }
        );
    }

    #[test]
    fn parses_overrides() {
        let cfg = config_from_pairs(&[
            ("CONVO_BASE_URL", "https://chat.example.org/gw"),
            ("CONVO_WS_URL", "wss://live.example.org"),
            ("CONVO_SELF_ID", "alice"),
            ("CONVO_PEER_ID", "7"),
            ("CONVO_HISTORY_LIMIT", "20"),
            ("CONVO_TIMELINE_MAX_ITEMS", "300"),
            ("CONVO_HTTP_TIMEOUT_MS", "2500"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.base_url.as_str(), "https://chat.example.org/gw");
        assert_eq!(
            cfg.ws_url.as_ref().map(Url::as_str),
            Some("wss://live.example.org/")
        );
        assert_eq!(cfg.self_id, ParticipantId::Text("alice".to_owned()));
        assert_eq!(cfg.peer_id, Some(ParticipantId::Numeric(7)));
        assert_eq!(cfg.history_limit, 20);
        assert_eq!(cfg.timeline_max_items, 300);
        assert_eq!(cfg.http_timeout, Duration::from_millis(2_500));
    }

    #[test]
    fn rejects_invalid_numbers_and_urls() {
        let err = config_from_pairs(&[("CONVO_SELF_ID", "1"), ("CONVO_HISTORY_LIMIT", "lots")])
            .expect_err("bad limit");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CONVO_HISTORY_LIMIT",
                ..
            }
        ));

        let err = config_from_pairs(&[("CONVO_SELF_ID", "1"), ("CONVO_HISTORY_LIMIT", "0")])
            .expect_err("zero limit");
        assert!(err.to_string().contains("must be at least 1"));

        let err = config_from_pairs(&[("CONVO_SELF_ID", "1"), ("CONVO_BASE_URL", "not a url")])
            .expect_err("bad url");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CONVO_BASE_URL",
                ..
            }
        ));
    }

    #[test]
    fn cli_argument_overrides_configured_peer() {
        let cfg = config_from_pairs(&[("CONVO_SELF_ID", "1"), ("CONVO_PEER_ID", "2")])
            .expect("config should parse");
        assert_eq!(
            cfg.resolve_peer(Some("9".to_owned())).expect("peer"),
            ParticipantId::Numeric(9)
        );
        assert_eq!(cfg.resolve_peer(None).expect("peer"), ParticipantId::Numeric(2));

        let cfg = config_from_pairs(&[("CONVO_SELF_ID", "1")]).expect("config should parse");
        assert_eq!(
            cfg.resolve_peer(Some(" ".to_owned())),
            Err(ConfigError::Missing {
                key: "CONVO_PEER_ID"
            })
        );
    }
}
