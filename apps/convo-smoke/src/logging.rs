//! stderr tracing for `convo-smoke`; stdout stays reserved for the transcript.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,convo_smoke=debug,convo_runtime=debug,convo_core=info";

/// Filter sources, most specific first. `RUST_LOG` wins over both.
const FILTER_KEYS: [&str; 3] = ["RUST_LOG", "CONVO_SMOKE_LOG", "CONVO_LOG"];

pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter_from_lookup(|key| env::var(key).ok()))
        .try_init();
}

/// First non-blank, parseable directive among `FILTER_KEYS`, else the default.
fn filter_from_lookup<F>(mut lookup: F) -> EnvFilter
where
    F: FnMut(&str) -> Option<String>,
{
    FILTER_KEYS
        .iter()
        .filter_map(|key| lookup(*key))
        .filter(|value| !value.trim().is_empty())
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn filter_for(pairs: &[(&str, &str)]) -> String {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        filter_from_lookup(|key| map.get(key).cloned()).to_string()
    }

    #[test]
    fn rust_log_takes_precedence() {
        assert_eq!(
            filter_for(&[("RUST_LOG", "warn"), ("CONVO_SMOKE_LOG", "trace")]),
            "warn"
        );
    }

    #[test]
    fn blank_values_fall_through_to_the_next_key() {
        assert_eq!(
            filter_for(&[("CONVO_SMOKE_LOG", "  "), ("CONVO_LOG", "error")]),
            "error"
        );
    }

    #[test]
    fn falls_back_to_default_filter() {
        assert_eq!(
            filter_for(&[]),
            EnvFilter::new(DEFAULT_FILTER).to_string()
        );
    }
}
