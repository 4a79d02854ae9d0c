use cyclebench_env as cb_env;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LEVEL: &str = "info";

/// Installs the process-wide fmt subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `CYCLEBENCH_LOG_FILTER` (a
/// `target=level,...` list) is combined with `CYCLEBENCH_LOG_LEVEL` as the
/// default directive. Calling this more than once is harmless.
pub fn init_tracing() {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .try_init();
}

/// Same as [`init_tracing`] but routes output through the test writer so
/// `cargo test` captures it.
pub fn init_test_tracing() {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}

fn env_filter() -> EnvFilter {
    if cb_env::rust_log().is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }

    let level = cb_env::cyclebench_log_level().unwrap_or_else(|| DEFAULT_LEVEL.to_owned());
    let directives = cb_env::cyclebench_log_filter()
        .map(|raw| filter_directives(&raw))
        .unwrap_or_default();

    let mut spec = level;
    for directive in directives {
        spec.push(',');
        spec.push_str(&directive);
    }
    EnvFilter::try_new(&spec).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

fn filter_directives(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let target = parts.next()?.trim();
            let level = parts.next()?.trim();
            (!target.is_empty() && !level.is_empty()).then(|| format!("{target}={level}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::filter_directives;

    #[test]
    fn filter_directives_skip_incomplete_pairs() {
        let directives = filter_directives("cyclebench_core=debug, broken ,=warn,tokio= trace");
        assert_eq!(directives, vec!["cyclebench_core=debug", "tokio=trace"]);
    }
}
