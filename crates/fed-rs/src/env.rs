use std::env;
use std::sync::OnceLock;

static FEDRS_PASS_STATS: OnceLock<bool> = OnceLock::new();
static FEDRS_NORMALIZE_MAX_ITERS: OnceLock<usize> = OnceLock::new();

const DEFAULT_NORMALIZE_MAX_ITERS: usize = 8;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_iters(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|iters| *iters > 0)
}

/// Per-pass statistics lines at `info` level.
pub(crate) fn pass_stats_enabled() -> bool {
    *FEDRS_PASS_STATS.get_or_init(|| match env::var("FEDRS_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Iteration bound for the normalization fixed point.
pub(crate) fn normalize_max_iters() -> usize {
    *FEDRS_NORMALIZE_MAX_ITERS.get_or_init(|| {
        env::var("FEDRS_NORMALIZE_MAX_ITERS")
            .ok()
            .and_then(|value| parse_iters(&value))
            .unwrap_or(DEFAULT_NORMALIZE_MAX_ITERS)
    })
}
