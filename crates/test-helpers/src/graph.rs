//! Seeded event graphs.
//!
//! An [`EventGraph`] is a forest of events: each root runs at a fixed time,
//! and each node, when it runs, schedules its children at a delay relative
//! to its own clock. A delay of zero produces a same-tick follow-up. Because
//! the shape is fixed up front, the set of executions before any horizon is
//! known without running a kernel.

use crate::Recorder;
use pdes_core::{KernelError, Scheduler, SimTime};
use pdes_kernel::LogicalProcess;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Shape parameters for [`EventGraph::generate`].
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub roots: usize,
    /// Root times are drawn from `0..root_span`.
    pub root_span: u64,
    pub max_depth: u32,
    pub max_fanout: usize,
    /// Child delays are drawn from `0..=max_delay`.
    pub max_delay: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            roots: 32,
            root_span: 20,
            max_depth: 4,
            max_fanout: 3,
            max_delay: 6,
        }
    }
}

#[derive(Debug)]
struct Node {
    delay: u64,
    children: Vec<usize>,
}

/// A reproducible forest of events. Node labels are their indices.
#[derive(Debug)]
pub struct EventGraph {
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

impl EventGraph {
    pub fn generate(seed: u64, config: &GraphConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut graph = EventGraph {
            nodes: Vec::new(),
            roots: Vec::new(),
        };

        for _ in 0..config.roots {
            let time = rng.gen_range(0..config.root_span.max(1));
            let root = graph.grow(&mut rng, config, time, 0);
            graph.roots.push(root);
        }
        graph
    }

    fn grow(&mut self, rng: &mut ChaCha8Rng, config: &GraphConfig, delay: u64, depth: u32) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            delay,
            children: Vec::new(),
        });

        if depth < config.max_depth {
            let fanout = rng.gen_range(0..=config.max_fanout);
            for _ in 0..fanout {
                let child_delay = rng.gen_range(0..=config.max_delay);
                let child = self.grow(rng, config, child_delay, depth + 1);
                self.nodes[index].children.push(child);
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Executions a correct kernel performs when run up to `horizon`, sorted.
    pub fn expected(&self, horizon: SimTime) -> Vec<crate::Execution> {
        let mut executions = Vec::new();
        let mut stack: Vec<(usize, SimTime)> = self
            .roots
            .iter()
            .map(|&root| (root, SimTime::new(self.nodes[root].delay)))
            .collect();

        while let Some((index, time)) = stack.pop() {
            if time >= horizon {
                continue;
            }
            executions.push(crate::Execution {
                time,
                label: index as u64,
            });
            for &child in &self.nodes[index].children {
                stack.push((child, time.after(self.nodes[child].delay)));
            }
        }
        executions.sort();
        executions
    }

    /// Submit every root to `kernel`. Executions are logged to `recorder`.
    pub fn seed(
        self: &Arc<Self>,
        kernel: &LogicalProcess,
        recorder: &Arc<Recorder>,
    ) -> Result<(), KernelError> {
        for &root in &self.roots {
            let graph = Arc::clone(self);
            let recorder = Arc::clone(recorder);
            let time = SimTime::new(self.nodes[root].delay);
            kernel.schedule(time, move |scheduler| {
                graph.run_node(root, scheduler, &recorder)
            })?;
        }
        Ok(())
    }

    fn run_node(self: &Arc<Self>, index: usize, scheduler: &dyn Scheduler, recorder: &Arc<Recorder>) {
        recorder.record(scheduler.now(), index as u64);
        for &child in &self.nodes[index].children {
            let graph = Arc::clone(self);
            let recorder = Arc::clone(recorder);
            scheduler
                .schedule_in(self.nodes[child].delay, move |scheduler| {
                    graph.run_node(child, scheduler, &recorder)
                })
                .expect("child events are never scheduled in the past");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_graph() {
        let config = GraphConfig::default();
        let a = EventGraph::generate(11, &config);
        let b = EventGraph::generate(11, &config);
        assert_eq!(a.len(), b.len());
        assert_eq!(a.expected(SimTime::new(40)), b.expected(SimTime::new(40)));
    }

    #[test]
    fn test_expected_respects_horizon() {
        let graph = EventGraph::generate(3, &GraphConfig::default());
        let all = graph.expected(SimTime::MAX);
        assert_eq!(all.len(), graph.len());
        assert!(graph
            .expected(SimTime::new(10))
            .iter()
            .all(|e| e.time < SimTime::new(10)));
    }
}
