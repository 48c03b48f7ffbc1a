use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::txn::TrxId;

use super::manager::LockModule;

/// Base and increment for the adaptive detection interval: grows by
/// one unit after every clean pass, resets to the base the moment a
/// cycle is found, so a busy system doesn't spend all its time
/// scanning the lock table.
const LOCK_WAIT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Node {
    /// Transactions waiting for this one (in-degree).
    waited_on_by: HashSet<TrxId>,
    /// Transactions this one is waiting for (out-degree).
    waiting_for: HashSet<TrxId>,
}

impl Node {
    fn refcount(&self) -> usize {
        self.waited_on_by.len()
    }

    fn outcount(&self) -> usize {
        self.waiting_for.len()
    }
}

type Graph = HashMap<TrxId, Node>;

pub struct DeadlockDetector {
    interval: Duration,
    last_check: Instant,
}

impl DeadlockDetector {
    pub fn new() -> Self {
        DeadlockDetector {
            interval: LOCK_WAIT,
            last_check: Instant::now(),
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.interval
    }

    pub fn ready(&self) -> bool {
        self.last_check.elapsed() >= self.interval
    }

    pub fn reset(&mut self) {
        self.interval = LOCK_WAIT;
        self.last_check = Instant::now();
    }

    pub fn back_off(&mut self) {
        self.interval += LOCK_WAIT;
        self.last_check = Instant::now();
    }

    /// Build the wait-for graph from the live lock table and return the
    /// transactions to abort to break every cycle, worst offender
    /// first. Empty if the table is currently acyclic.
    pub fn find_cycle(&self, modules: &HashMap<super::manager::Hid, LockModule>) -> Vec<TrxId> {
        let mut graph = construct_graph(modules);

        loop {
            if graph.is_empty() {
                return Vec::new();
            }
            let zero = graph.iter().find(|(_, n)| n.refcount() == 0).map(|(id, _)| *id);
            match zero {
                Some(id) => reduce(&mut graph, id),
                None => return choose_victims(graph),
            }
        }
    }
}

fn construct_graph(modules: &HashMap<super::manager::Hid, LockModule>) -> Graph {
    let mut graph = Graph::new();
    for module in modules.values() {
        for waiter in &module.wait {
            let wait_xid = waiter.trxid;
            graph.entry(wait_xid).or_default();
            for runner in &module.run {
                let run_xid = runner.trxid;
                graph.entry(run_xid).or_default().waited_on_by.insert(wait_xid);
                graph.entry(wait_xid).or_default().waiting_for.insert(run_xid);
            }
        }
    }
    graph
}

/// Remove `xid` and recursively remove any neighbor left with no
/// remaining waiters on it.
fn reduce(graph: &mut Graph, xid: TrxId) {
    let (waiting_for, waited_on_by) = match graph.get(&xid) {
        Some(node) => (node.waiting_for.clone(), node.waited_on_by.clone()),
        None => return,
    };

    let mut chained = Vec::new();
    for next_id in &waiting_for {
        if let Some(next) = graph.get_mut(next_id) {
            next.waited_on_by.remove(&xid);
            if next.refcount() == 0 {
                chained.push(*next_id);
            }
        }
    }
    for prev_id in &waited_on_by {
        if let Some(prev) = graph.get_mut(prev_id) {
            prev.waiting_for.remove(&xid);
        }
    }

    graph.remove(&xid);
    for id in chained {
        reduce(graph, id);
    }
}

/// Every remaining node belongs to at least one cycle. Repeatedly pick
/// the transaction with the most waiters (ties broken by how much it is
/// itself waiting on), abort it, and re-reduce until nothing is left.
fn choose_victims(mut graph: Graph) -> Vec<TrxId> {
    let mut victims = Vec::new();
    while !graph.is_empty() {
        let xid = *graph
            .iter()
            .max_by_key(|(_, n)| (n.refcount(), n.outcount()))
            .map(|(id, _)| id)
            .expect("graph is non-empty");
        victims.push(xid);
        reduce(&mut graph, xid);
    }
    victims
}
