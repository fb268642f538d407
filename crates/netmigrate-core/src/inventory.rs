//! Source network inventory
//!
//! The raw network description returned by the source tool server. Tool
//! servers answer either in the neutral snake_case shape used here or in the
//! provider's own PascalCase shape (`VpcId`, `VSwitches.VSwitch`,
//! `SecurityGroups.SecurityGroup`, ...), optionally wrapped in a `body`
//! object. Both are accepted.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Raw network description as returned by the source tool server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInventory {
    /// Source network identifier
    #[serde(alias = "VpcId", alias = "vpc_id")]
    pub network_id: String,

    /// Human-readable network name
    #[serde(default, alias = "VpcName", alias = "vpc_name")]
    pub name: String,

    /// Source region
    #[serde(default, alias = "RegionId")]
    pub region: String,

    /// Network addressing block
    #[serde(default, alias = "CidrBlock")]
    pub cidr_block: Option<String>,

    /// Sub-networks
    #[serde(default, alias = "vswitches", deserialize_with = "wrapped_list")]
    pub subnets: Vec<SourceSubnet>,

    /// Security groups and their firewall rules
    #[serde(default, deserialize_with = "wrapped_list")]
    pub security_groups: Vec<SecurityGroup>,
}

/// A source sub-network bound to one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSubnet {
    /// Sub-network identifier
    #[serde(default, alias = "VSwitchId", alias = "vswitch_id")]
    pub id: String,

    /// Sub-network name
    #[serde(default, alias = "VSwitchName")]
    pub name: String,

    /// Address range
    #[serde(alias = "CidrBlock")]
    pub cidr_block: String,

    /// Availability zone identifier
    #[serde(alias = "ZoneId", alias = "availability_zone")]
    pub zone: String,

    /// Whether instances get public addresses; unspecified means public
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
}

/// A named group of firewall rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// Group identifier
    #[serde(default, alias = "SecurityGroupId", alias = "group_id")]
    pub id: String,

    /// Group name
    #[serde(default, alias = "SecurityGroupName")]
    pub name: String,

    /// Optional description
    #[serde(default, alias = "Description")]
    pub description: Option<String>,

    /// Firewall rules in source order
    #[serde(default, alias = "Permissions", deserialize_with = "wrapped_list")]
    pub rules: Vec<FirewallRule>,
}

/// One source firewall rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// Protocol name as the source spells it (`tcp`, `UDP`, `all`, ...)
    #[serde(alias = "IpProtocol")]
    pub protocol: String,

    /// Port or port range (`80`, `80/80`, `-1/-1`)
    #[serde(alias = "PortRange", deserialize_with = "string_or_number")]
    pub port: String,

    /// Source address range
    #[serde(default, alias = "SourceCidrIp")]
    pub source: String,

    /// `ingress` or `egress`; unspecified means ingress
    #[serde(default, alias = "Direction", skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,

    /// Optional description
    #[serde(default, alias = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FirewallRule {
    /// Whether this rule governs inbound traffic
    pub fn is_ingress(&self) -> bool {
        self.direction
            .as_deref()
            .is_none_or(|d| d.eq_ignore_ascii_case("ingress"))
    }
}

/// Network-level record from a describe-networks payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NetworkRecord {
    /// Network identifier
    #[serde(alias = "VpcId", alias = "vpc_id")]
    pub network_id: String,

    /// Network name
    #[serde(default, alias = "VpcName", alias = "vpc_name")]
    pub name: String,

    /// Addressing block
    #[serde(default, alias = "CidrBlock")]
    pub cidr_block: Option<String>,
}

impl SourceInventory {
    /// Assemble an inventory from the three extraction payloads.
    pub fn assemble(
        network: NetworkRecord,
        region: &str,
        subnets: Vec<SourceSubnet>,
        security_groups: Vec<SecurityGroup>,
    ) -> Self {
        Self {
            network_id: network.network_id,
            name: network.name,
            region: region.to_string(),
            cidr_block: network.cidr_block,
            subnets,
            security_groups,
        }
    }

    /// Built-in default inventory used when extraction is skipped or the
    /// source server is unreachable.
    pub fn fallback(region: &str) -> Self {
        let rule = |port: &str| FirewallRule {
            protocol: "tcp".to_string(),
            port: port.to_string(),
            source: "0.0.0.0/0".to_string(),
            direction: Some("ingress".to_string()),
            description: None,
        };
        Self {
            network_id: "vpc-fallback".to_string(),
            name: "demo-vpc".to_string(),
            region: region.to_string(),
            cidr_block: Some("10.0.0.0/16".to_string()),
            subnets: vec![
                SourceSubnet {
                    id: "vsw-fallback-1".to_string(),
                    name: "demo-subnet-1".to_string(),
                    cidr_block: "10.0.1.0/24".to_string(),
                    zone: format!("{region}-a"),
                    public: None,
                },
                SourceSubnet {
                    id: "vsw-fallback-2".to_string(),
                    name: "demo-subnet-2".to_string(),
                    cidr_block: "10.0.2.0/24".to_string(),
                    zone: format!("{region}-b"),
                    public: None,
                },
            ],
            security_groups: vec![SecurityGroup {
                id: "sg-fallback".to_string(),
                name: "demo-sg".to_string(),
                description: Some("Default security group".to_string()),
                rules: vec![rule("80"), rule("443")],
            }],
        }
    }
}

// ============================================================================
// Payload normalization
// ============================================================================

const NETWORK_PATHS: &[&[&str]] = &[&["Vpcs", "Vpc"], &["vpcs"], &["Vpc"], &["networks"]];
const SUBNET_PATHS: &[&[&str]] = &[
    &["VSwitches", "VSwitch"],
    &["vswitches"],
    &["subnets"],
];
const GROUP_PATHS: &[&[&str]] = &[
    &["SecurityGroups", "SecurityGroup"],
    &["security_groups"],
];

/// Pick the network record out of a describe-networks result.
///
/// When `network_id` is given the matching record is returned; otherwise the
/// first one.
pub fn parse_network(payload: &Value, network_id: Option<&str>) -> Result<NetworkRecord> {
    let body = unwrap_body(payload);
    let records: Vec<NetworkRecord> = match find_list(body, NETWORK_PATHS) {
        Some(items) => decode_items("network", items)?,
        // A single bare record
        None if ["VpcId", "vpc_id", "network_id"]
            .iter()
            .any(|key| body.get(*key).is_some()) =>
        {
            vec![decode("network", body)?]
        }
        None => Vec::new(),
    };

    let selected = match network_id {
        Some(id) => records.into_iter().find(|r| r.network_id == id),
        None => records.into_iter().next(),
    };
    selected.ok_or_else(|| Error::MalformedPayload {
        what: "network",
        message: match network_id {
            Some(id) => format!("network '{id}' not present in result"),
            None => "result lists no networks".to_string(),
        },
    })
}

/// Decode the sub-network list from a describe-subnets result.
pub fn parse_subnets(payload: &Value) -> Result<Vec<SourceSubnet>> {
    let body = unwrap_body(payload);
    match find_list(body, SUBNET_PATHS) {
        Some(items) => decode_items("subnets", items),
        None => Err(Error::MalformedPayload {
            what: "subnets",
            message: "no sub-network list in result".to_string(),
        }),
    }
}

/// Decode the security group list from a describe-security-groups result.
pub fn parse_security_groups(payload: &Value) -> Result<Vec<SecurityGroup>> {
    let body = unwrap_body(payload);
    match find_list(body, GROUP_PATHS) {
        Some(items) => decode_items("security groups", items),
        None => Err(Error::MalformedPayload {
            what: "security groups",
            message: "no security group list in result".to_string(),
        }),
    }
}

fn unwrap_body(payload: &Value) -> &Value {
    payload.get("body").unwrap_or(payload)
}

fn find_list<'a>(body: &'a Value, paths: &[&[&str]]) -> Option<&'a Vec<Value>> {
    paths.iter().find_map(|path| {
        let found = path.iter().try_fold(body, |v, key| v.get(*key))?;
        match found {
            Value::Array(items) => Some(items),
            _ => None,
        }
    })
}

fn decode<T: for<'de> Deserialize<'de>>(what: &'static str, item: &Value) -> Result<T> {
    T::deserialize(item).map_err(|e| Error::MalformedPayload {
        what,
        message: e.to_string(),
    })
}

fn decode_items<T: for<'de> Deserialize<'de>>(what: &'static str, items: &[Value]) -> Result<Vec<T>> {
    items.iter().map(|item| decode(what, item)).collect()
}

/// Accept either a plain list or an object wrapping one (`{"Permission": [...]}`).
fn wrapped_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wrapped<T> {
        List(Vec<T>),
        Object(BTreeMap<String, Vec<T>>),
    }

    Ok(match Wrapped::deserialize(deserializer)? {
        Wrapped::List(items) => items,
        Wrapped::Object(map) => map.into_values().flatten().collect(),
    })
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}
