//! s-t min cut via Dinic's max-flow

use std::collections::VecDeque;

const EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
struct Edge {
    to: usize,
    cap: f64,
}

/// Flow network over pixel nodes plus a source and a sink
#[derive(Debug, Clone)]
pub struct FlowGraph {
    adjacency: Vec<Vec<usize>>,
    /// Edge `e` and its residual twin `e ^ 1` are stored side by side
    edges: Vec<Edge>,
    source: usize,
    sink: usize,
    level: Vec<i64>,
    cursor: Vec<usize>,
}

impl FlowGraph {
    /// `nodes` pixel nodes, numbered from 0
    pub fn new(nodes: usize) -> Self {
        let total = nodes + 2;
        Self {
            adjacency: vec![Vec::new(); total],
            edges: Vec::new(),
            source: nodes,
            sink: nodes + 1,
            level: vec![-1; total],
            cursor: vec![0; total],
        }
    }

    fn push_pair(&mut self, u: usize, v: usize, forward: f64, backward: f64) {
        self.adjacency[u].push(self.edges.len());
        self.edges.push(Edge { to: v, cap: forward });
        self.adjacency[v].push(self.edges.len());
        self.edges.push(Edge { to: u, cap: backward });
    }

    /// Capacities from the source and to the sink; negative parts are shifted away.
    pub fn add_terminal_weights(&mut self, node: usize, from_source: f64, to_sink: f64) {
        let shift = from_source.min(to_sink);
        let (s, t) = (from_source - shift, to_sink - shift);
        if s > 0.0 {
            self.push_pair(self.source, node, s, 0.0);
        }
        if t > 0.0 {
            self.push_pair(node, self.sink, t, 0.0);
        }
    }

    /// Undirected-style link with independent capacities in each direction
    pub fn add_edge(&mut self, u: usize, v: usize, capacity: f64, reverse: f64) {
        if capacity > 0.0 || reverse > 0.0 {
            self.push_pair(u, v, capacity, reverse);
        }
    }

    fn build_levels(&mut self) -> bool {
        self.level.iter_mut().for_each(|l| *l = -1);
        self.level[self.source] = 0;
        let mut queue = VecDeque::from([self.source]);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adjacency[u] {
                let Edge { to, cap } = self.edges[e];
                if cap > EPS && self.level[to] < 0 {
                    self.level[to] = self.level[u] + 1;
                    queue.push_back(to);
                }
            }
        }
        self.level[self.sink] >= 0
    }

    /// One augmenting path in the level graph, walked without recursion.
    fn augment(&mut self) -> f64 {
        let mut path: Vec<usize> = Vec::new();
        let mut u = self.source;
        loop {
            if u == self.sink {
                let flow = path
                    .iter()
                    .map(|&e| self.edges[e].cap)
                    .fold(f64::INFINITY, f64::min);
                for &e in &path {
                    self.edges[e].cap -= flow;
                    self.edges[e ^ 1].cap += flow;
                }
                return flow;
            }

            let mut advanced = false;
            while self.cursor[u] < self.adjacency[u].len() {
                let e = self.adjacency[u][self.cursor[u]];
                let Edge { to, cap } = self.edges[e];
                if cap > EPS && self.level[to] == self.level[u] + 1 {
                    path.push(e);
                    u = to;
                    advanced = true;
                    break;
                }
                self.cursor[u] += 1;
            }

            if !advanced {
                // dead end
                self.level[u] = -1;
                match path.pop() {
                    Some(e) => {
                        u = self.edges[e ^ 1].to;
                        self.cursor[u] += 1;
                    }
                    None => return 0.0,
                }
            }
        }
    }

    /// Push as much flow as possible from source to sink.
    pub fn max_flow(&mut self) -> f64 {
        let mut total = 0.0;
        while self.build_levels() {
            self.cursor.iter_mut().for_each(|c| *c = 0);
            loop {
                let flow = self.augment();
                if flow <= EPS {
                    break;
                }
                total += flow;
            }
        }
        total
    }

    /// After `max_flow`, whether each pixel node is still reachable from the source
    pub fn source_side(&self) -> Vec<bool> {
        let mut seen = vec![false; self.adjacency.len()];
        seen[self.source] = true;
        let mut queue = VecDeque::from([self.source]);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adjacency[u] {
                let Edge { to, cap } = self.edges[e];
                if cap > EPS && !seen[to] {
                    seen[to] = true;
                    queue.push_back(to);
                }
            }
        }
        seen.truncate(self.source);
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_bottleneck() {
        let mut g = FlowGraph::new(2);
        g.add_terminal_weights(0, 5.0, 0.0);
        g.add_edge(0, 1, 2.0, 0.0);
        g.add_terminal_weights(1, 0.0, 7.0);
        assert!((g.max_flow() - 2.0).abs() < 1e-9);
        assert_eq!(g.source_side(), vec![true, false]);
    }

    #[test]
    fn test_terminal_shift_keeps_cut() {
        let mut g = FlowGraph::new(1);
        // cutting the source link costs more
        g.add_terminal_weights(0, 4.0, 1.0);
        g.max_flow();
        assert_eq!(g.source_side(), vec![true]);

        let mut g = FlowGraph::new(1);
        g.add_terminal_weights(0, -2.0, 1.0);
        g.max_flow();
        assert_eq!(g.source_side(), vec![false]);
    }

    #[test]
    fn test_parallel_paths() {
        // only route is s -> 0 -> 1 -> t
        let mut g = FlowGraph::new(2);
        g.add_terminal_weights(0, 3.0, 1.0);
        g.add_terminal_weights(1, 1.0, 4.0);
        g.add_edge(0, 1, 1.5, 1.5);
        // shifted: s->0 = 2, 1->t = 3
        assert!((g.max_flow() - 1.5).abs() < 1e-9);
        assert_eq!(g.source_side(), vec![true, false]);
    }

    #[test]
    fn test_no_terminals_means_no_flow() {
        let mut g = FlowGraph::new(3);
        g.add_edge(0, 1, 1.0, 1.0);
        g.add_edge(1, 2, 1.0, 1.0);
        assert_eq!(g.max_flow(), 0.0);
        assert_eq!(g.source_side(), vec![false; 3]);
    }
}
