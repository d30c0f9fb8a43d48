//! Read-only graph view over a [`WorkflowConfig`].
//!
//! Edges are the registered transitions plus each state's `on_error` target.
//! Iteration order follows declaration order so results are stable.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::WorkflowConfig;

#[derive(Debug, Clone)]
pub struct StateGraph {
    order: Vec<String>,
    successors: HashMap<String, Vec<String>>,
    predecessors: HashMap<String, Vec<String>>,
}

impl StateGraph {
    pub fn from_config(config: &WorkflowConfig) -> Self {
        let mut graph = Self {
            order: Vec::new(),
            successors: HashMap::new(),
            predecessors: HashMap::new(),
        };
        for state in &config.states {
            if !graph.successors.contains_key(&state.name) {
                graph.order.push(state.name.clone());
                graph.successors.insert(state.name.clone(), Vec::new());
                graph.predecessors.insert(state.name.clone(), Vec::new());
            }
        }
        for t in &config.transitions {
            graph.add_edge(&t.from, &t.to);
        }
        for state in &config.states {
            if let Some(target) = &state.on_error {
                graph.add_edge(&state.name, target);
            }
        }
        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        if let Some(out) = self.successors.get_mut(from) {
            if !out.iter().any(|s| s == to) {
                out.push(to.to_string());
            }
        }
        if let Some(inc) = self.predecessors.get_mut(to) {
            if !inc.iter().any(|s| s == from) {
                inc.push(from.to_string());
            }
        }
    }

    /// State names in declaration order.
    pub fn states(&self) -> &[String] {
        &self.order
    }

    pub fn successors(&self, state: &str) -> &[String] {
        self.successors.get(state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, state: &str) -> &[String] {
        self.predecessors.get(state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every state reachable from `start`, including `start` itself.
    pub fn reachable_from(&self, start: &str) -> HashSet<String> {
        bfs(start, |s| self.successors(s))
    }

    /// Every state from which any of `targets` can be reached.
    pub fn can_reach<'a>(&self, targets: impl IntoIterator<Item = &'a String>) -> HashSet<String> {
        let mut seen = HashSet::new();
        for t in targets {
            seen.extend(bfs(t, |s| self.predecessors(s)));
        }
        seen
    }

    /// States not reachable from `initial`, in declaration order.
    pub fn unreachable_from(&self, initial: &str) -> Vec<String> {
        let reachable = self.reachable_from(initial);
        self.order
            .iter()
            .filter(|s| !reachable.contains(*s))
            .cloned()
            .collect()
    }

    /// Whether `state` lies on a cycle.
    pub fn on_cycle(&self, state: &str) -> bool {
        self.successors(state)
            .iter()
            .any(|next| self.reachable_from(next).contains(state))
    }
}

fn bfs<'g, F>(start: &str, next: F) -> HashSet<String>
where
    F: Fn(&str) -> &'g [String],
{
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    seen.insert(start.to_string());
    queue.push_back(start.to_string());
    while let Some(current) = queue.pop_front() {
        for n in next(&current) {
            if seen.insert(n.clone()) {
                queue.push_back(n.clone());
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActionSpec, StateSpec, TransitionSpec};

    fn config() -> WorkflowConfig {
        let noop = || ActionSpec::new("noop");
        WorkflowConfig::new("g", "a")
            .with_state(StateSpec::new("a", "action").with_action(noop()))
            .with_state(StateSpec::new("b", "action").with_action(noop()).with_on_error("recover"))
            .with_state(StateSpec::new("loop1", "action").with_action(noop()))
            .with_state(StateSpec::new("loop2", "action").with_action(noop()))
            .with_state(StateSpec::new("recover", "action").with_action(noop()))
            .with_state(StateSpec::new("island", "action").with_action(noop()))
            .with_state(StateSpec::new("done", "final"))
            .with_transition(TransitionSpec::always("a", "b"))
            .with_transition(TransitionSpec::when("a", "loop1", "data.spin"))
            .with_transition(TransitionSpec::always("loop1", "loop2"))
            .with_transition(TransitionSpec::always("loop2", "loop1"))
            .with_transition(TransitionSpec::always("b", "done"))
            .with_transition(TransitionSpec::always("recover", "done"))
    }

    #[test]
    fn test_reachability() {
        let g = StateGraph::from_config(&config());
        let reachable = g.reachable_from("a");
        assert!(reachable.contains("recover"));
        assert!(reachable.contains("done"));
        assert!(!reachable.contains("island"));
        assert_eq!(g.unreachable_from("a"), vec!["island"]);
    }

    #[test]
    fn test_can_reach_finals() {
        let config = config();
        let g = StateGraph::from_config(&config);
        let exits = g.can_reach(&config.final_states);
        assert!(exits.contains("a"));
        assert!(exits.contains("recover"));
        assert!(!exits.contains("loop1"));
        assert!(!exits.contains("island"));
    }

    #[test]
    fn test_cycles() {
        let g = StateGraph::from_config(&config());
        assert!(g.on_cycle("loop1"));
        assert!(!g.on_cycle("a"));
    }

    #[test]
    fn test_adding_transition_restores_reachability() {
        let config = config().with_transition(TransitionSpec::always("b", "island"));
        let g = StateGraph::from_config(&config);
        assert!(g.unreachable_from("a").is_empty());
    }
}
