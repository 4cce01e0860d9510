//! Topic-filter matching.
//!
//! Filters are slash-separated level sequences where `+` matches exactly one
//! level and a trailing `#` matches the remainder of the topic, including
//! zero levels (so `sport/#` matches `sport` itself). A filter prefixed with
//! `$share/<group>/` is a shared subscription; the group name is surfaced so
//! the broker can pick one member per delivery.

use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::{
    string::{String, ToString},
    vec::Vec,
};

/// Outcome of matching a topic name against a subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMatch {
    /// The filter does not match the topic. Also returned for malformed
    /// shared filters (`$share` with no group or no trailing levels).
    Miss,
    /// A plain (non-shared) filter matched.
    Plain,
    /// A shared filter matched; carries the share group name.
    Shared(String),
}

impl FilterMatch {
    pub fn is_match(&self) -> bool {
        !matches!(self, FilterMatch::Miss)
    }
}

impl fmt::Display for FilterMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMatch::Miss => write!(f, "miss"),
            FilterMatch::Plain => write!(f, "match"),
            FilterMatch::Shared(group) => write!(f, "shared match (group `{}`)", group),
        }
    }
}

/// Match `topic` against `filter`, level by level.
///
/// Level comparison is case-insensitive. The topic must cover every filter
/// level (except a trailing `#`), and topic levels beyond the filter only
/// match through a trailing `#`.
pub fn match_filter(topic: &str, filter: &str) -> FilterMatch {
    let filter_levels: Vec<&str> = filter.split('/').collect();

    let (levels, group): (&[&str], Option<&str>) =
        if filter_levels[0].eq_ignore_ascii_case("$share") {
            // A shared filter needs a group name and at least one level after it.
            if filter_levels.len() < 3 || filter_levels[1].is_empty() {
                return FilterMatch::Miss;
            }
            (&filter_levels[2..], Some(filter_levels[1]))
        } else {
            (&filter_levels[..], None)
        };

    let topic_levels: Vec<&str> = topic.split('/').collect();

    for (index, level) in levels.iter().enumerate() {
        if *level == "#" {
            return matched(group);
        }

        match topic_levels.get(index) {
            Some(part) if *level == "+" || level.eq_ignore_ascii_case(part) => {}
            _ => return FilterMatch::Miss,
        }
    }

    if topic_levels.len() == levels.len() {
        matched(group)
    } else {
        FilterMatch::Miss
    }
}

fn matched(group: Option<&str>) -> FilterMatch {
    match group {
        Some(name) => FilterMatch::Shared(name.to_string()),
        None => FilterMatch::Plain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_level_wildcard() {
        assert_eq!(
            match_filter("sport/tennis/player1", "sport/tennis/player1/#"),
            FilterMatch::Plain
        );
        assert_eq!(
            match_filter("sport/tennis/player1/ranking", "sport/tennis/player1/#"),
            FilterMatch::Plain
        );
        assert_eq!(
            match_filter(
                "sport/tennis/player1/score/wimbledon",
                "sport/tennis/player1/#"
            ),
            FilterMatch::Plain
        );
    }

    #[test]
    fn multi_level_wildcard_matches_parent() {
        assert_eq!(match_filter("sport", "sport/#"), FilterMatch::Plain);
    }

    #[test]
    fn single_level_wildcard() {
        assert_eq!(
            match_filter("sport/tennis/player1", "sport/+/player1"),
            FilterMatch::Plain
        );
        assert_eq!(
            match_filter("sport/tennis", "sport/+/player1"),
            FilterMatch::Miss
        );
    }

    #[test]
    fn shared_filters_carry_their_group() {
        assert_eq!(
            match_filter("sport/tennis/player1", "$share/consumer/sport/+/player1"),
            FilterMatch::Shared("consumer".to_string())
        );
        assert_eq!(
            match_filter(
                "sport/tennis/player1/tournaments/schedule",
                "$share/consumer/sport/+/+/#"
            ),
            FilterMatch::Shared("consumer".to_string())
        );
    }

    #[test]
    fn malformed_shared_filter_never_matches() {
        assert_eq!(
            match_filter("sport/tennis", "$share/consumer1"),
            FilterMatch::Miss
        );
        assert_eq!(match_filter("sport", "$share//sport"), FilterMatch::Miss);
    }

    #[test]
    fn exact_topic_matches_itself() {
        for topic in ["a", "a/b/c", "sensors/temperature/room1"] {
            assert_eq!(match_filter(topic, topic), FilterMatch::Plain);
        }
    }

    #[test]
    fn bare_hash_matches_everything() {
        for topic in ["a", "a/b", "sport/tennis/player1/score"] {
            assert_eq!(match_filter(topic, "#"), FilterMatch::Plain);
        }
    }

    #[test]
    fn extra_topic_levels_do_not_match() {
        assert_eq!(
            match_filter("sport/tennis/player1", "sport/tennis"),
            FilterMatch::Miss
        );
        assert_eq!(match_filter("sport/tennis", "sport"), FilterMatch::Miss);
    }

    #[test]
    fn levels_compare_case_insensitively() {
        assert_eq!(
            match_filter("Sport/Tennis", "sport/tennis"),
            FilterMatch::Plain
        );
    }
}
