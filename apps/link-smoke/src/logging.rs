//! Tracing bootstrap for the smoke binary.

use std::env;

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Filter used when neither environment key carries a usable directive.
pub const DEFAULT_FILTER: &str = "info,link_smoke=debug,link_ws=debug,link_core=debug";

/// Keys consulted in order; the first valid directive wins.
const FILTER_KEYS: [&str; 2] = ["RUST_LOG", "SHIPLINK_LOG"];

/// Where the active filter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSource {
    Env(&'static str),
    Default,
}

#[derive(Debug)]
struct ResolvedFilter {
    filter: EnvFilter,
    source: FilterSource,
    /// Keys that were set but did not parse.
    rejected: Vec<&'static str>,
}

/// Install the global subscriber, writing to stderr so stdout stays free for
/// received payloads.
pub fn init() {
    let resolved = resolve_filter(|key| env::var(key).ok());
    let installed = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(resolved.filter)
        .try_init()
        .is_ok();

    if installed {
        for key in resolved.rejected {
            warn!(key, "ignoring unparsable log filter");
        }
        debug!(source = ?resolved.source, "logging initialized");
    }
}

fn resolve_filter<F>(mut lookup: F) -> ResolvedFilter
where
    F: FnMut(&str) -> Option<String>,
{
    let mut rejected = Vec::new();
    for key in FILTER_KEYS {
        let Some(value) = lookup(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        match EnvFilter::try_new(&value) {
            Ok(filter) => {
                return ResolvedFilter {
                    filter,
                    source: FilterSource::Env(key),
                    rejected,
                };
            }
            Err(_) => rejected.push(key),
        }
    }

    ResolvedFilter {
        filter: EnvFilter::new(DEFAULT_FILTER),
        source: FilterSource::Default,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve_from_pairs(pairs: &[(&str, &str)]) -> ResolvedFilter {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        resolve_filter(|key| map.get(key).cloned())
    }

    #[test]
    fn falls_back_to_default_filter() {
        let resolved = resolve_from_pairs(&[("SHIPLINK_LOG", "   ")]);
        assert_eq!(resolved.source, FilterSource::Default);
        assert!(resolved.rejected.is_empty());
    }

    #[test]
    fn rust_log_wins_over_shiplink_log() {
        let resolved = resolve_from_pairs(&[("RUST_LOG", "warn"), ("SHIPLINK_LOG", "trace")]);
        assert_eq!(resolved.source, FilterSource::Env("RUST_LOG"));
    }

    #[test]
    fn unparsable_rust_log_falls_through_to_shiplink_log() {
        let resolved = resolve_from_pairs(&[
            ("RUST_LOG", "link_core=chatty"),
            ("SHIPLINK_LOG", "link_ws=trace"),
        ]);
        assert_eq!(resolved.source, FilterSource::Env("SHIPLINK_LOG"));
        assert_eq!(resolved.rejected, vec!["RUST_LOG"]);
    }

    #[test]
    fn default_filter_parses() {
        EnvFilter::try_new(DEFAULT_FILTER).expect("default filter should parse");
    }
}
