pub const REQUEST_TIMEOUT_MS: u32 = 10_000;
pub const LIVENESS_TIMEOUT_MS: u32 = 2_500;
pub const POLL_INTERVAL_MS: u32 = 2_500;
pub const SNAPSHOT_DEBOUNCE_MS: i64 = 300;
pub const REST_TICK_MS: u32 = 500;

/// Well-known local backends, tried after any remembered base.
pub const DEFAULT_BASES: &[&str] = &["http://localhost:8000", "http://127.0.0.1:8000"];

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub default_bases: Vec<String>,
    pub request_timeout_ms: u32,
    pub liveness_timeout_ms: u32,
    pub poll_interval_ms: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut default_bases: Vec<String> = Vec::new();
        // Build-time override, e.g. IRONLOG_API_BASE=https://api.example.com trunk build
        if let Some(base) = option_env!("IRONLOG_API_BASE") {
            default_bases.push(base.to_string());
        }
        default_bases.extend(DEFAULT_BASES.iter().map(|b| b.to_string()));
        Self {
            default_bases,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            liveness_timeout_ms: LIVENESS_TIMEOUT_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

impl AppConfig {
    #[cfg(test)]
    pub fn with_bases(bases: &[&str]) -> Self {
        Self {
            default_bases: bases.iter().map(|b| b.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Ordered candidate list: remembered base first, then defaults, without duplicates.
    pub fn candidate_bases(&self, remembered: Option<&str>) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for base in remembered.into_iter().chain(self.default_bases.iter().map(String::as_str)) {
            let base = normalize_base(base);
            if !base.is_empty() && !out.contains(&base) {
                out.push(base);
            }
        }
        out
    }
}

pub fn normalize_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remembered_base_comes_first_and_is_deduplicated() {
        let cfg = AppConfig::with_bases(&["http://localhost:8000", "http://127.0.0.1:8000/"]);
        let bases = cfg.candidate_bases(Some("http://127.0.0.1:8000/"));
        assert_eq!(bases, vec!["http://127.0.0.1:8000", "http://localhost:8000"]);
    }

    #[test]
    fn blank_remembered_base_is_ignored() {
        let cfg = AppConfig::with_bases(&["http://localhost:8000"]);
        assert_eq!(cfg.candidate_bases(Some("  ")), vec!["http://localhost:8000"]);
    }
}
