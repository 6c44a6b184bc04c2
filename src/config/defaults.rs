use std::path::PathBuf;

pub fn default_version() -> u32 {
    1
}

pub fn default_max_iterations() -> u32 {
    3
}

pub fn default_quality_threshold() -> f64 {
    85.0
}

pub fn default_gap_threshold() -> f64 {
    70.0
}

pub fn default_concurrency() -> usize {
    4
}

pub fn default_unit_timeout_sec() -> u64 {
    120
}

pub fn default_keep_alive_sec() -> u64 {
    15
}

pub fn default_event_buffer() -> usize {
    256
}

pub fn default_session_ttl_sec() -> u64 {
    60 * 60 * 24 // one day
}

pub fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

pub fn default_claude_binary() -> PathBuf {
    // Check common install location first
    if let Some(home) = std::env::var_os("HOME") {
        let local_path = PathBuf::from(home).join(".claude/local/claude");
        if local_path.exists() {
            return local_path;
        }
    }
    // Fall back to PATH lookup
    PathBuf::from("claude")
}

pub fn default_claude_model() -> String {
    "sonnet".to_string()
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_backoff_base_ms() -> u64 {
    1000
}
