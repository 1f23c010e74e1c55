//! Merge/dedup engine: one canonical record per token address.
//!
//! Consumes the concatenation of all adapters' normalized lists and folds it
//! keyed by address. Field precedence is "first non-empty value wins, in
//! adapter iteration order", except `first_seen_at` which always resolves to
//! the earliest non-absent candidate. The fold is idempotent: merging an
//! already-merged set with itself changes nothing.

use std::collections::HashMap;

use crate::types::Token;

/// Merge normalized records into one token per distinct address.
///
/// Output preserves first-seen order. Records with an empty address are
/// assumed to have been dropped by adapter normalization already.
pub fn merge_tokens(records: Vec<Token>) -> Vec<Token> {
    let mut by_address: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Token> = Vec::new();

    for record in records {
        match by_address.get(&record.address) {
            None => {
                by_address.insert(record.address.clone(), merged.len());
                merged.push(record);
            }
            Some(&idx) => {
                merge_into(&mut merged[idx], record);
            }
        }
    }

    merged
}

/// Merge `incoming` into the incumbent record for the same address.
fn merge_into(existing: &mut Token, incoming: Token) {
    debug_assert_eq!(existing.address, incoming.address);

    fill_str(&mut existing.name, incoming.name);
    fill_str(&mut existing.symbol, incoming.symbol);
    fill_str(&mut existing.source_url, incoming.source_url);
    fill_opt(&mut existing.website_url, incoming.website_url);
    fill_opt(&mut existing.x_url, incoming.x_url);
    fill_opt(&mut existing.farcaster_url, incoming.farcaster_url);
    fill_opt(&mut existing.telegram_url, incoming.telegram_url);
    fill_opt(&mut existing.creator_address, incoming.creator_address);
    fill_opt(&mut existing.creator_fid, incoming.creator_fid);
    fill_opt(&mut existing.creator_username, incoming.creator_username);

    // Earliest wins; an absent candidate never displaces a known one.
    // Exact ties keep the incumbent.
    existing.first_seen_at = match (existing.first_seen_at, incoming.first_seen_at) {
        (Some(a), Some(b)) => Some(if b < a { b } else { a }),
        (Some(a), None) => Some(a),
        (None, b) => b,
    };
}

/// First non-empty string wins.
fn fill_str(existing: &mut String, incoming: String) {
    if existing.is_empty() && !incoming.is_empty() {
        *existing = incoming;
    }
}

/// First present value wins.
fn fill_opt<T>(existing: &mut Option<T>, incoming: Option<T>) {
    if existing.is_none() {
        *existing = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenSource;
    use chrono::{DateTime, Utc};

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn record(address: &str, source: TokenSource) -> Token {
        Token::new(
            address.to_string(),
            source,
            format!("https://clanker.world/clanker/{}", address),
        )
    }

    #[test]
    fn test_merge_distinct_addresses_pass_through() {
        let a = record("0xaaa", TokenSource::Clanker);
        let b = record("0xbbb", TokenSource::Flaunch);

        let merged = merge_tokens(vec![a.clone(), b.clone()]);

        assert_eq!(merged, vec![a, b]);
    }

    #[test]
    fn test_merge_symbol_precedence_regardless_of_order() {
        let mut empty = record("0xaaa", TokenSource::Clanker);
        empty.first_seen_at = Some(ts("2024-01-01T00:00:00Z"));
        let mut named = record("0xaaa", TokenSource::Flaunch);
        named.symbol = "ABC".to_string();
        named.first_seen_at = Some(ts("2024-01-02T00:00:00Z"));

        let forward = merge_tokens(vec![empty.clone(), named.clone()]);
        let reverse = merge_tokens(vec![named, empty]);

        assert_eq!(forward[0].symbol, "ABC");
        assert_eq!(reverse[0].symbol, "ABC");
        // Earliest timestamp survives either order.
        assert_eq!(forward[0].first_seen_at, Some(ts("2024-01-01T00:00:00Z")));
        assert_eq!(reverse[0].first_seen_at, Some(ts("2024-01-01T00:00:00Z")));
    }

    #[test]
    fn test_merge_first_non_empty_wins_in_iteration_order() {
        let mut first = record("0xaaa", TokenSource::Clanker);
        first.name = "First".to_string();
        let mut second = record("0xaaa", TokenSource::Flaunch);
        second.name = "Second".to_string();

        let merged = merge_tokens(vec![first, second]);

        assert_eq!(merged[0].name, "First");
    }

    #[test]
    fn test_merge_none_never_displaces_some() {
        let mut dated = record("0xaaa", TokenSource::Clanker);
        dated.first_seen_at = Some(ts("2024-03-01T12:00:00Z"));
        let undated = record("0xaaa", TokenSource::Flaunch);

        let merged = merge_tokens(vec![undated, dated]);

        assert_eq!(merged[0].first_seen_at, Some(ts("2024-03-01T12:00:00Z")));
    }

    #[test]
    fn test_merge_idempotent() {
        let mut a = record("0xaaa", TokenSource::Clanker);
        a.symbol = "AAA".to_string();
        a.first_seen_at = Some(ts("2024-01-01T00:00:00Z"));
        let mut b = record("0xaaa", TokenSource::Flaunch);
        b.name = "Token A".to_string();
        b.first_seen_at = Some(ts("2024-01-02T00:00:00Z"));
        let c = record("0xbbb", TokenSource::Flaunch);

        let once = merge_tokens(vec![a, b, c]);
        let twice = merge_tokens(once.clone());

        assert_eq!(once, twice);

        // Merging the merged set with itself changes nothing either.
        let doubled: Vec<Token> = once.iter().chain(once.iter()).cloned().collect();
        assert_eq!(merge_tokens(doubled), once);
    }

    #[test]
    fn test_merge_equal_timestamps_keep_incumbent_source() {
        let mut a = record("0xaaa", TokenSource::Clanker);
        a.first_seen_at = Some(ts("2024-01-01T00:00:00Z"));
        let mut b = record("0xaaa", TokenSource::Flaunch);
        b.first_seen_at = Some(ts("2024-01-01T00:00:00Z"));

        let merged = merge_tokens(vec![a, b]);

        assert_eq!(merged[0].source, TokenSource::Clanker);
        assert_eq!(merged[0].first_seen_at, Some(ts("2024-01-01T00:00:00Z")));
    }

    #[test]
    fn test_merge_progressive_fill_keeps_links() {
        let mut scraped = record("0xaaa", TokenSource::Clanker);
        scraped.x_url = Some("https://x.com/project".to_string());
        let bare = record("0xaaa", TokenSource::Flaunch);

        let merged = merge_tokens(vec![scraped, bare]);

        assert_eq!(merged[0].x_url.as_deref(), Some("https://x.com/project"));
    }
}
