use std::collections::VecDeque;
use time::OffsetDateTime;

/// One line of the human-readable connection trail.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusEntry {
    pub at: OffsetDateTime,
    pub message: String,
}

/// Bounded, newest-last log of lifecycle messages.
#[derive(Clone, Debug)]
pub struct StatusTrail {
    entries: VecDeque<StatusEntry>,
    capacity: usize,
}

impl StatusTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(StatusEntry {
            at: OffsetDateTime::now_utc(),
            message: message.into(),
        });
    }

    pub fn last(&self) -> Option<&StatusEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trail_is_bounded() {
        let mut trail = StatusTrail::new(2);
        trail.push("connecting");
        trail.push("connected");
        trail.push("closed");
        assert_eq!(trail.len(), 2);
        let messages: Vec<_> = trail.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["connected", "closed"]);
        assert_eq!(trail.last().map(|e| e.message.as_str()), Some("closed"));
    }
}
