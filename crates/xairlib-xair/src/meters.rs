//! Per-session registry of meter streams to keep alive.
//!
//! The mixer stops streaming a meter about ten seconds after the last
//! `/meters` request for it, so the session resends every registered
//! request on each keep-alive tick.

use std::collections::BTreeMap;

use xairlib_core::OscArg;
use xairlib_osc::meters;

/// Meter id plus optional channel selector.
pub type MeterKey = (u32, Option<i32>);

/// Mapping of enabled meters to the `/meters` arguments that refresh them.
#[derive(Debug, Clone, Default)]
pub struct MeterRegistry {
    entries: BTreeMap<MeterKey, Vec<OscArg>>,
}

impl MeterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register meter `id` (optionally for one channel). Re-enabling is a no-op.
    pub fn enable(&mut self, id: u32, channel: Option<i32>) {
        self.entries
            .insert((id, channel), meters::request_args(id, channel));
    }

    /// Unregister a meter. Returns `false` if it was not enabled.
    pub fn disable(&mut self, id: u32, channel: Option<i32>) -> bool {
        self.entries.remove(&(id, channel)).is_some()
    }

    pub fn contains(&self, id: u32, channel: Option<i32>) -> bool {
        self.entries.contains_key(&(id, channel))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Argument lists of every `/meters` request to send, in key order.
    pub fn requests(&self) -> impl Iterator<Item = &Vec<OscArg>> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registry_is_empty() {
        let registry = MeterRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.requests().count(), 0);
    }

    #[test]
    fn enable_builds_request_args() {
        let mut registry = MeterRegistry::new();
        registry.enable(2, None);
        registry.enable(6, Some(4));

        let requests: Vec<_> = registry.requests().cloned().collect();
        assert_eq!(
            requests,
            vec![
                vec![OscArg::from("/meters/2")],
                vec![OscArg::from("/meters/6"), OscArg::Int(4)],
            ]
        );
    }

    #[test]
    fn channel_distinguishes_entries() {
        let mut registry = MeterRegistry::new();
        registry.enable(6, Some(1));
        registry.enable(6, Some(2));
        registry.enable(6, Some(1));
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(6, Some(2)));
        assert!(!registry.contains(6, None));
    }

    #[test]
    fn disable_removes_only_matching_key() {
        let mut registry = MeterRegistry::new();
        registry.enable(2, None);
        registry.enable(2, Some(0));

        assert!(registry.disable(2, None));
        assert!(!registry.disable(2, None));
        assert!(registry.contains(2, Some(0)));
    }
}
