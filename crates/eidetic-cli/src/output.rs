use chrono::{DateTime, Utc};
use eidetic::memory::types::TierId;

#[derive(Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Shorten to at most `max_len` characters, marking the cut with "..."
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_tiers<'a>(tiers: impl IntoIterator<Item = &'a TierId>) -> String {
    let names: Vec<&str> = tiers.into_iter().map(|t| t.as_str()).collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
