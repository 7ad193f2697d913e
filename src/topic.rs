//! Segment-wise MQTT topic filter matching.
//!
//! Filters and topics are `/`-delimited level sequences. `+` matches exactly
//! one level; `#` matches one or more trailing levels and is only meaningful
//! as the final level of a filter. Matching walks both sequences in lockstep,
//! so per-message cost is proportional to level count, not string length, and
//! no per-message pattern compilation happens.

/// Returns true when `topic` (a concrete published topic) matches `filter`
/// (a subscription pattern, possibly containing wildcards).
///
/// A `#` anywhere but the final level never matches. Matching is
/// case-sensitive and empty levels (`a//b`) are ordinary levels.
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // '#' consumes the rest of the topic, but only as the last level
            // of the filter and only when at least one topic level remains.
            (Some("#"), Some(_)) => return filter_levels.next().is_none(),
            (Some("#"), None) => return false,
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(level)) if expected == level => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
