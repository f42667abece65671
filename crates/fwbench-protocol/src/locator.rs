/// Face locators.
///
/// `FaceLocator` is the JSON shape accepted by the control-plane `createFace`
/// and `startTrafficGen` mutations. `MgmtLocator` is the older descriptor
/// used by the management JSON-RPC `Face.Create` method.

use serde::{Deserialize, Serialize};

use crate::env::LinkEnd;
use crate::options::FaceScheme;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum FaceLocator {
    Ether {
        local: String,
        remote: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vlan: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<String>,
    },
    Vxlan {
        local: String,
        remote: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vlan: Option<u16>,
        #[serde(rename = "localIP")]
        local_ip: String,
        #[serde(rename = "remoteIP")]
        remote_ip: String,
        vxlan: u32,
        #[serde(rename = "innerLocal")]
        inner_local: String,
        #[serde(rename = "innerRemote")]
        inner_remote: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<String>,
    },
}

impl FaceLocator {
    /// Build the locator for one end of a forwarder-generator link.
    ///
    /// `subnet` distinguishes the A-side and B-side links so VXLAN tunnel
    /// addresses never collide. `local_is_forwarder` picks the host octet.
    pub fn for_link(
        scheme: FaceScheme,
        local: &LinkEnd,
        remote: &LinkEnd,
        subnet: u8,
        local_is_forwarder: bool,
    ) -> Self {
        match scheme {
            FaceScheme::Ether => Self::Ether {
                local: local.hwaddr.clone(),
                remote: remote.hwaddr.clone(),
                vlan: local.vlan,
                port: Some(local.port.clone()),
            },
            FaceScheme::Vxlan => {
                let (lo, hi) = if local_is_forwarder { (1, 2) } else { (2, 1) };
                Self::Vxlan {
                    local: local.hwaddr.clone(),
                    remote: remote.hwaddr.clone(),
                    vlan: local.vlan,
                    local_ip: format!("192.168.{subnet}.{lo}"),
                    remote_ip: format!("192.168.{subnet}.{hi}"),
                    vxlan: 0,
                    inner_local: format!("02:00:00:ff:{subnet:02x}:{lo:02x}"),
                    inner_remote: format!("02:00:00:ff:{subnet:02x}:{hi:02x}"),
                    port: Some(local.port.clone()),
                }
            }
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Ether { .. } => "ether",
            Self::Vxlan { .. } => "vxlan",
        }
    }
}

/// Locator descriptor for the management `Face.Create` method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MgmtLocator {
    pub scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub remote: String,
}
