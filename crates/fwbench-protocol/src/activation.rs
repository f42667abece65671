/// Role activation arguments.
///
/// The engine treats the argument as an opaque JSON blob; the orchestrator
/// only needs to know which role it belongs to. The builders below lay out
/// the forwarder's worker cores in the same order the budget check counts
/// them: RX, TX, CRYPTO, then the forwarding threads.

use serde::Serialize;
use serde_json::{json, Value};

use crate::options::BenchmarkOptions;
use crate::{ROLE_FORWARDER, ROLE_TRAFFICGEN};

/// Engine role a node is activated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Forwarder,
    Trafficgen,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forwarder => ROLE_FORWARDER,
            Self::Trafficgen => ROLE_TRAFFICGEN,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role-tagged activation argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivationArgs {
    Forwarder(Value),
    Trafficgen(Value),
}

impl ActivationArgs {
    pub fn role(&self) -> Role {
        match self {
            Self::Forwarder(_) => Role::Forwarder,
            Self::Trafficgen(_) => Role::Trafficgen,
        }
    }

    pub fn arg(&self) -> &Value {
        match self {
            Self::Forwarder(v) | Self::Trafficgen(v) => v,
        }
    }

    /// Forwarder activation on `cores`.
    pub fn forwarder(cores: &[u32], opts: &BenchmarkOptions) -> Self {
        let mut next = cores.iter().copied();
        let mut take = |n: usize| next.by_ref().take(n).collect::<Vec<u32>>();
        let rx = take(opts.face_a_rx_queues + opts.face_b_rx_queues);
        let tx = take(1);
        let crypto = take(1);
        let fwd = take(opts.n_fwds);

        Self::Forwarder(json!({
            "eal": { "cores": cores },
            "lcoreAlloc": {
                "RX": { "lcores": rx },
                "TX": { "lcores": tx },
                "CRYPTO": { "lcores": crypto },
                "FWD": { "lcores": fwd },
            },
            "mempool": {
                "DIRECT": { "capacity": 1_048_575, "dataroom": 9146 },
                "INDIRECT": { "capacity": 1_048_575 },
            },
            "fib": { "capacity": 65535, "startDepth": 8 },
            "pcct": { "pcctCapacity": 65535, "csMemoryCapacity": 20000, "csIndirectCapacity": 20000 },
        }))
    }

    /// Traffic generator activation on `cores`.
    pub fn trafficgen(cores: &[u32]) -> Self {
        Self::Trafficgen(json!({
            "eal": { "cores": cores },
            "mempool": {
                "DIRECT": { "capacity": 1_048_575, "dataroom": 9146 },
                "INDIRECT": { "capacity": 1_048_575 },
            },
        }))
    }
}
