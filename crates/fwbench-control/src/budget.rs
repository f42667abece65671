/// Resource budget validation.
///
/// Computes each node's primary-core demand from the experiment options and
/// compares it with the cores the environment assigns. Labels that share a
/// control endpoint are the same physical node: their demands are summed onto
/// the first label (in F, A, B order) and the others drop out of the check.
///
/// This is the admission gate of a session and runs before any RPC.

use fwbench_protocol::env::{NodeLabel, ServerEnv};
use fwbench_protocol::options::BenchmarkOptions;

use crate::error::Shortfall;

/// Forwarder cores besides RX queues and forwarding threads: TX and crypto.
pub const FORWARDER_OVERHEAD: usize = 2;
/// Generator cores besides RX queues: TX, producer and consumer.
pub const GENERATOR_OVERHEAD: usize = 3;

/// Core demand of one label on its own.
pub fn label_demand(label: NodeLabel, opts: &BenchmarkOptions) -> usize {
    match label {
        NodeLabel::F => opts.face_a_rx_queues + opts.face_b_rx_queues + opts.n_fwds + FORWARDER_OVERHEAD,
        NodeLabel::A => opts.face_a_rx_queues + GENERATOR_OVERHEAD,
        NodeLabel::B => opts.face_b_rx_queues + GENERATOR_OVERHEAD,
    }
}

/// One physical node after collocated labels are merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBudget {
    /// Label the node is checked and reported under
    pub label: NodeLabel,
    pub endpoint: String,
    /// Every label hosted on this endpoint, `label` first
    pub labels: Vec<NodeLabel>,
    pub need: usize,
    pub avail: usize,
}

impl NodeBudget {
    pub fn hosts(&self, label: NodeLabel) -> bool {
        self.labels.contains(&label)
    }

    pub fn is_sufficient(&self) -> bool {
        self.need <= self.avail
    }
}

/// Merge labels by endpoint and total their demands.
pub fn plan(opts: &BenchmarkOptions, env: &ServerEnv) -> Vec<NodeBudget> {
    let mut nodes: Vec<NodeBudget> = Vec::new();
    for label in NodeLabel::ALL {
        let endpoint = env.gqlserver(label);
        let need = label_demand(label, opts);
        match nodes.iter_mut().find(|n| n.endpoint == endpoint) {
            Some(node) => {
                node.need += need;
                node.labels.push(label);
            }
            None => nodes.push(NodeBudget {
                label,
                endpoint: endpoint.to_string(),
                labels: vec![label],
                need,
                avail: env.cores_primary(label).len(),
            }),
        }
    }
    nodes
}

/// Accept the configuration or list every node that is short of cores.
pub fn validate(opts: &BenchmarkOptions, env: &ServerEnv) -> Result<Vec<NodeBudget>, Vec<Shortfall>> {
    let nodes = plan(opts, env);
    let shortfalls: Vec<Shortfall> = nodes
        .iter()
        .filter(|n| !n.is_sufficient())
        .map(|n| Shortfall {
            node: n.label,
            need: n.need,
            avail: n.avail,
        })
        .collect();
    if shortfalls.is_empty() {
        Ok(nodes)
    } else {
        Err(shortfalls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(f: usize, a: usize, b: usize) -> ServerEnv {
        let cores = |n: usize| (0..n as u32).collect::<Vec<_>>();
        ServerEnv {
            f_gqlserver: "http://f:3030/".into(),
            f_cores_primary: cores(f),
            f_cores_secondary: vec![],
            f_port_a: "04:00.0".into(),
            f_vlan_a: None,
            f_hwaddr_a: "02:00:00:00:0f:0a".into(),
            f_port_b: "04:00.1".into(),
            f_vlan_b: None,
            f_hwaddr_b: "02:00:00:00:0f:0b".into(),
            a_gqlserver: "http://a:3030/".into(),
            a_cores_primary: cores(a),
            a_cores_secondary: vec![],
            a_port_f: "05:00.0".into(),
            a_vlan_f: None,
            a_hwaddr_f: "02:00:00:00:0a:0f".into(),
            b_gqlserver: "http://b:3030/".into(),
            b_cores_primary: cores(b),
            b_cores_secondary: vec![],
            b_port_f: "05:00.1".into(),
            b_vlan_f: None,
            b_hwaddr_f: "02:00:00:00:0b:0f".into(),
        }
    }

    #[test]
    fn default_demands() {
        let opts = BenchmarkOptions::default();
        assert_eq!(label_demand(NodeLabel::F, &opts), 8);
        assert_eq!(label_demand(NodeLabel::A, &opts), 4);
        assert_eq!(label_demand(NodeLabel::B, &opts), 4);
    }

    #[test]
    fn accepts_exact_fit() {
        let nodes = validate(&BenchmarkOptions::default(), &env(8, 4, 4)).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes.iter().all(|n| n.need == n.avail));
    }

    #[test]
    fn rejects_forwarder_shortfall_only() {
        let opts = BenchmarkOptions { n_fwds: 6, ..Default::default() };
        let shortfalls = validate(&opts, &env(6, 4, 4)).unwrap_err();
        assert_eq!(shortfalls, vec![Shortfall { node: NodeLabel::F, need: 10, avail: 6 }]);
        assert_eq!(shortfalls[0].to_string(), "need 10 on F but only 6 assigned");
    }

    #[test]
    fn reports_every_short_node() {
        let opts = BenchmarkOptions { face_a_rx_queues: 2, face_b_rx_queues: 3, ..Default::default() };
        let shortfalls = validate(&opts, &env(20, 4, 4)).unwrap_err();
        let labels: Vec<_> = shortfalls.iter().map(|s| s.node).collect();
        assert_eq!(labels, vec![NodeLabel::A, NodeLabel::B]);
    }

    #[test]
    fn collocated_generators_are_summed() {
        let mut e = env(8, 8, 8);
        e.b_gqlserver = e.a_gqlserver.clone();
        let nodes = plan(&BenchmarkOptions::default(), &e);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].label, NodeLabel::A);
        assert_eq!(nodes[1].labels, vec![NodeLabel::A, NodeLabel::B]);
        assert_eq!(nodes[1].need, 8);
        assert!(validate(&BenchmarkOptions::default(), &e).is_ok());

        // B's own core list no longer matters once merged into A
        e.a_cores_primary.truncate(7);
        let shortfalls = validate(&BenchmarkOptions::default(), &e).unwrap_err();
        assert_eq!(shortfalls, vec![Shortfall { node: NodeLabel::A, need: 8, avail: 7 }]);
    }

    #[test]
    fn collocated_forwarder_and_generator() {
        let mut e = env(12, 4, 4);
        e.a_gqlserver = e.f_gqlserver.clone();
        let nodes = validate(&BenchmarkOptions::default(), &e).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].labels, vec![NodeLabel::F, NodeLabel::A]);
        assert_eq!(nodes[0].need, 12);
        assert!(nodes[0].hosts(NodeLabel::A));
        assert!(!nodes[1].hosts(NodeLabel::A));
    }
}
