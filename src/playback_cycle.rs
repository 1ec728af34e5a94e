use std::collections::HashMap;

/// Circular cursors, one per playlist or feed identity.
///
/// A cursor starts at 0 and `advance` always steps before returning, so the
/// first item served from a fresh list is index 1 (index 0 on a single-item
/// list).
#[derive(Debug, Default)]
pub struct PlaybackCycles {
    cursors: HashMap<String, usize>,
}

impl PlaybackCycles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps the cursor for `key` and returns the new position. `None` for an
    /// empty list, leaving the cursor untouched.
    pub fn advance(&mut self, key: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let cursor = self.cursors.entry(key.to_string()).or_insert(0);
        *cursor = (*cursor + 1) % len;
        Some(*cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visits_each_item_once_starting_at_one() {
        let mut cycles = PlaybackCycles::new();
        let visited: Vec<usize> = (0..4)
            .map(|_| cycles.advance("playlist:p", 4).unwrap())
            .collect();
        assert_eq!(visited, vec![1, 2, 3, 0]);

        // Second lap repeats in the same order
        let again: Vec<usize> = (0..4)
            .map(|_| cycles.advance("playlist:p", 4).unwrap())
            .collect();
        assert_eq!(again, visited);
    }

    #[test]
    fn test_identities_are_independent() {
        let mut cycles = PlaybackCycles::new();
        assert_eq!(cycles.advance("a", 3), Some(1));
        assert_eq!(cycles.advance("a", 3), Some(2));
        assert_eq!(cycles.advance("b", 3), Some(1));
        assert_eq!(cycles.advance("a", 3), Some(0));
    }

    #[test]
    fn test_empty_and_shrinking_lists() {
        let mut cycles = PlaybackCycles::new();
        assert_eq!(cycles.advance("a", 0), None);
        // Cursor untouched by the empty list
        assert_eq!(cycles.advance("a", 5), Some(1));

        cycles.advance("a", 5);
        cycles.advance("a", 5);
        // List shrank from 5 to 2 between polls
        assert_eq!(cycles.advance("a", 2), Some(0));
        assert_eq!(cycles.advance("single", 1), Some(0));
    }
}
