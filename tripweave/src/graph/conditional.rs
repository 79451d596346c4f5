//! Conditional routing: source node id -> (router, optional path map).
//!
//! After the source node runs, the router is called with the updated state;
//! its return value is the next node id, or a key looked up in the path map.
//! Routers take `&mut S` so routing predicates can maintain retry counters.

use std::collections::HashMap;
use std::sync::Arc;

/// Routing function: inspects (and may update counters on) the state,
/// returns the next node key.
pub type ConditionalRouterFn<S> = Arc<dyn Fn(&mut S) -> String + Send + Sync>;

/// Router plus optional path map for a single source node.
pub struct ConditionalRouter<S> {
    pub path: ConditionalRouterFn<S>,
    pub path_map: Option<HashMap<String, String>>,
}

impl<S> Clone for ConditionalRouter<S> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            path_map: self.path_map.clone(),
        }
    }
}

impl<S> ConditionalRouter<S> {
    pub fn new(path: ConditionalRouterFn<S>, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    /// Resolves the next node id from the state: path-map lookup when a map
    /// is present (falling back to the key itself), else the key directly.
    pub fn resolve_next(&self, state: &mut S) -> String {
        let key = (self.path)(state);
        match &self.path_map {
            Some(map) => map.get(&key).cloned().unwrap_or(key),
            None => key,
        }
    }
}

/// How to pick the next node after a given node id.
pub enum NextEntry<S> {
    Unconditional(String),
    Conditional(ConditionalRouter<S>),
}

impl<S> Clone for NextEntry<S> {
    fn clone(&self) -> Self {
        match self {
            NextEntry::Unconditional(id) => NextEntry::Unconditional(id.clone()),
            NextEntry::Conditional(router) => NextEntry::Conditional(router.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: With a path map, the router key is translated; unknown
    /// keys fall back to the key itself.
    #[test]
    fn resolve_next_uses_path_map_with_fallback() {
        let map: HashMap<String, String> = [("go".to_string(), "target_node".to_string())]
            .into_iter()
            .collect();
        let router: ConditionalRouter<i32> =
            ConditionalRouter::new(Arc::new(|s: &mut i32| if *s > 0 { "go".into() } else { "other".into() }), Some(map));

        let mut positive = 1;
        assert_eq!(router.resolve_next(&mut positive), "target_node");
        let mut negative = -1;
        assert_eq!(router.resolve_next(&mut negative), "other");
    }

    /// **Scenario**: Routers may mutate the state (e.g. retry counters).
    #[test]
    fn router_may_mutate_state() {
        let router: ConditionalRouter<i32> = ConditionalRouter::new(
            Arc::new(|s: &mut i32| {
                *s += 1;
                "next".into()
            }),
            None,
        );
        let mut state = 0;
        router.resolve_next(&mut state);
        assert_eq!(state, 1);
    }
}
