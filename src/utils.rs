//! Utility functions for Discord Purge

use crate::types::{Result, Snowflake};
use std::collections::HashSet;

/// Parse a list of channel IDs separated by commas and/or whitespace
pub fn parse_channel_list(list: &str) -> Result<HashSet<Snowflake>> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(Snowflake::parse)
        .collect()
}

/// Shorten a token for log output, keeping only its ends
pub fn redact_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}…{}", head, tail)
}
