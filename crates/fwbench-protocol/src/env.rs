/// Environment discovery document.
///
/// Describes where each node's control endpoint lives, which primary cores
/// the node may use, and how its Ethernet ports are wired. The document is
/// produced by the deployment scripts as `env.json` and read once at session
/// start.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Node role label in the benchmark topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeLabel {
    /// Forwarder
    F,
    /// Traffic generator on the A side
    A,
    /// Traffic generator on the B side
    B,
}

impl NodeLabel {
    pub const ALL: [NodeLabel; 3] = [NodeLabel::F, NodeLabel::A, NodeLabel::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::F => "F",
            Self::A => "A",
            Self::B => "B",
        }
    }

    pub fn is_generator(&self) -> bool {
        !matches!(self, Self::F)
    }

    /// The generator on the other side of the forwarder.
    pub fn peer(&self) -> Option<NodeLabel> {
        match self {
            Self::F => None,
            Self::A => Some(Self::B),
            Self::B => Some(Self::A),
        }
    }
}

impl fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "F" => Ok(Self::F),
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            _ => Err(format!("unknown node label '{s}' (expected F, A or B)")),
        }
    }
}

/// One end of a point-to-point Ethernet link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEnd {
    /// PCI address of the port
    pub port: String,
    pub vlan: Option<u16>,
    /// MAC address of the port
    pub hwaddr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ServerEnv {
    pub f_gqlserver: String,
    pub f_cores_primary: Vec<u32>,
    #[serde(default)]
    pub f_cores_secondary: Vec<u32>,
    pub f_port_a: String,
    #[serde(default)]
    pub f_vlan_a: Option<u16>,
    pub f_hwaddr_a: String,
    pub f_port_b: String,
    #[serde(default)]
    pub f_vlan_b: Option<u16>,
    pub f_hwaddr_b: String,

    pub a_gqlserver: String,
    pub a_cores_primary: Vec<u32>,
    #[serde(default)]
    pub a_cores_secondary: Vec<u32>,
    pub a_port_f: String,
    #[serde(default)]
    pub a_vlan_f: Option<u16>,
    pub a_hwaddr_f: String,

    pub b_gqlserver: String,
    pub b_cores_primary: Vec<u32>,
    #[serde(default)]
    pub b_cores_secondary: Vec<u32>,
    pub b_port_f: String,
    #[serde(default)]
    pub b_vlan_f: Option<u16>,
    pub b_hwaddr_f: String,
}

impl ServerEnv {
    /// Control-plane endpoint of a node.
    pub fn gqlserver(&self, label: NodeLabel) -> &str {
        match label {
            NodeLabel::F => &self.f_gqlserver,
            NodeLabel::A => &self.a_gqlserver,
            NodeLabel::B => &self.b_gqlserver,
        }
    }

    /// Primary cores assigned to a node.
    pub fn cores_primary(&self, label: NodeLabel) -> &[u32] {
        match label {
            NodeLabel::F => &self.f_cores_primary,
            NodeLabel::A => &self.a_cores_primary,
            NodeLabel::B => &self.b_cores_primary,
        }
    }

    /// Forwarder side of the link toward generator `gen`.
    pub fn forwarder_end(&self, gen: NodeLabel) -> Option<LinkEnd> {
        match gen {
            NodeLabel::F => None,
            NodeLabel::A => Some(LinkEnd {
                port: self.f_port_a.clone(),
                vlan: self.f_vlan_a,
                hwaddr: self.f_hwaddr_a.clone(),
            }),
            NodeLabel::B => Some(LinkEnd {
                port: self.f_port_b.clone(),
                vlan: self.f_vlan_b,
                hwaddr: self.f_hwaddr_b.clone(),
            }),
        }
    }

    /// Generator side of the link toward the forwarder.
    pub fn generator_end(&self, gen: NodeLabel) -> Option<LinkEnd> {
        match gen {
            NodeLabel::F => None,
            NodeLabel::A => Some(LinkEnd {
                port: self.a_port_f.clone(),
                vlan: self.a_vlan_f,
                hwaddr: self.a_hwaddr_f.clone(),
            }),
            NodeLabel::B => Some(LinkEnd {
                port: self.b_port_f.clone(),
                vlan: self.b_vlan_f,
                hwaddr: self.b_hwaddr_f.clone(),
            }),
        }
    }
}
