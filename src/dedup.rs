use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::SourceScope;

/// Default number of ids remembered per scope.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Outcome of offering an id to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

#[derive(Debug, Default)]
struct ScopeRegistry {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

/// Exactly-once admission of bet ids within each source scope.
///
/// Scopes never share ids: the same id seen on the network and in the DOM is
/// admitted twice. Each scope keeps at most `capacity` ids, evicting the
/// oldest first. Not persisted.
#[derive(Debug)]
pub struct DedupGate {
    capacity: usize,
    scopes: HashMap<SourceScope, ScopeRegistry>,
}

impl Default for DedupGate {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DedupGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            scopes: HashMap::new(),
        }
    }

    /// Record `id` in `scope`, reporting whether it was new.
    pub fn admit(&mut self, scope: SourceScope, id: &str) -> Admission {
        let registry = self.scopes.entry(scope).or_default();
        if registry.seen.contains(id) {
            return Admission::Duplicate;
        }
        registry.seen.insert(id.to_string());
        registry.order.push_back(id.to_string());
        while registry.order.len() > self.capacity {
            if let Some(oldest) = registry.order.pop_front() {
                registry.seen.remove(&oldest);
            }
        }
        Admission::Accepted
    }

    pub fn contains(&self, scope: SourceScope, id: &str) -> bool {
        self.scopes
            .get(&scope)
            .is_some_and(|r| r.seen.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_admission_is_duplicate() {
        let mut gate = DedupGate::new(8);
        assert_eq!(gate.admit(SourceScope::Plinko, "a"), Admission::Accepted);
        assert_eq!(gate.admit(SourceScope::Plinko, "a"), Admission::Duplicate);
        assert!(gate.contains(SourceScope::Plinko, "a"));
    }

    #[test]
    fn scopes_are_independent() {
        let mut gate = DedupGate::new(8);
        assert_eq!(gate.admit(SourceScope::Plinko, "7"), Admission::Accepted);
        assert_eq!(gate.admit(SourceScope::Keno, "7"), Admission::Accepted);
        assert_eq!(gate.admit(SourceScope::Network, "7"), Admission::Accepted);
        assert!(!gate.contains(SourceScope::Relay, "7"));
    }

    #[test]
    fn oldest_ids_are_evicted_at_capacity() {
        let mut gate = DedupGate::new(2);
        gate.admit(SourceScope::Keno, "1");
        gate.admit(SourceScope::Keno, "2");
        gate.admit(SourceScope::Keno, "3");
        assert!(!gate.contains(SourceScope::Keno, "1"));
        assert!(gate.contains(SourceScope::Keno, "2"));
        assert!(gate.contains(SourceScope::Keno, "3"));
    }
}
