//! Regex-based recognition of Aurora-style cluster/instance/proxy DNS names.
//!
//! Recognizes reader-cluster, writer-cluster, proxy, custom-cluster, and instance endpoints in
//! both the commercial (`amazonaws.com`) and China (`amazonaws.com.cn`) partitions, and
//! extracts the `cluster_id` (the subdomain before `.cluster-…`) and an instance-endpoint
//! `host_pattern` (with the instance id replaced by `?`) that the topology query helper needs.

use once_cell::sync::Lazy;
use regex::Regex;

/// The kind of Aurora endpoint a DNS name matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointKind {
    WriterCluster,
    ReaderCluster,
    CustomCluster,
    Proxy,
    Instance,
}

struct Pattern {
    kind: EndpointKind,
    regex: Regex,
}

// Captures (1) the leading subdomain (cluster name / instance id) and (2) the resource
// identifier + the rest of the domain (region + partition suffix, commercial or China),
// which together form the instance-endpoint shape `<instance-id>.<resource-id-and-suffix>`.
static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    let suffix = r"([a-z0-9-]+\.[a-z0-9-]+\.rds\.amazonaws\.com(?:\.cn)?)$";
    vec![
        Pattern {
            kind: EndpointKind::ReaderCluster,
            regex: Regex::new(&format!(r"(?i)^([a-z0-9-]+)\.cluster-ro-{suffix}")).unwrap(),
        },
        Pattern {
            kind: EndpointKind::CustomCluster,
            regex: Regex::new(&format!(r"(?i)^([a-z0-9-]+)\.cluster-custom-{suffix}")).unwrap(),
        },
        Pattern {
            kind: EndpointKind::WriterCluster,
            regex: Regex::new(&format!(r"(?i)^([a-z0-9-]+)\.cluster-{suffix}")).unwrap(),
        },
        Pattern {
            kind: EndpointKind::Proxy,
            regex: Regex::new(&format!(r"(?i)^([a-z0-9-]+)\.proxy-{suffix}")).unwrap(),
        },
        Pattern {
            kind: EndpointKind::Instance,
            regex: Regex::new(&format!(r"(?i)^([a-z0-9-]+)\.{suffix}")).unwrap(),
        },
    ]
});

/// A DNS name recognized as one of the Aurora endpoint flavors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognizedEndpoint {
    pub kind: EndpointKind,
    /// The subdomain before the cluster/instance marker (e.g. the cluster name or instance id).
    pub id: String,
    /// The resource identifier plus region/partition suffix that follows the marker, e.g.
    /// `abc123xyz.us-east-1.rds.amazonaws.com`.
    pub resource_and_suffix: String,
}

impl RecognizedEndpoint {
    /// The instance-endpoint template (`?.<resource-and-suffix>`) this endpoint implies,
    /// suitable as a [`crate::topology::QueryHelper`] endpoint template.
    pub fn instance_host_pattern(&self) -> String {
        format!("?.{}", self.resource_and_suffix)
    }
}

/// Matches `host` against the known Aurora endpoint shapes, most specific first (reader /
/// custom cluster before the generic writer-cluster pattern, which would otherwise also match
/// a reader endpoint's suffix).
pub fn recognize(host: &str) -> Option<RecognizedEndpoint> {
    for pattern in PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(host) {
            let id = caps.get(1)?.as_str().to_string();
            let resource_and_suffix = caps.get(2)?.as_str().to_string();
            return Some(RecognizedEndpoint {
                kind: pattern.kind,
                id,
                resource_and_suffix,
            });
        }
    }
    None
}

/// Extracts the cluster id from a writer-, reader-, or custom-cluster endpoint, if `host`
/// matches one.
pub fn cluster_id_of(host: &str) -> Option<String> {
    match recognize(host) {
        Some(RecognizedEndpoint {
            kind: EndpointKind::WriterCluster | EndpointKind::ReaderCluster | EndpointKind::CustomCluster,
            id,
            ..
        }) => Some(id),
        _ => None,
    }
}

/// Derives the instance-endpoint template implied by a cluster (or instance) endpoint, for use
/// as `HOSTPATTERN` when the caller didn't supply one explicitly.
pub fn derive_endpoint_template(host: &str) -> Option<String> {
    recognize(host).map(|r| r.instance_host_pattern())
}

/// Whether `host` matches the reader-cluster endpoint shape; used by failover mode
/// auto-detection (spec §4.E step 2).
pub fn is_reader_cluster_endpoint(host: &str) -> bool {
    matches!(
        recognize(host),
        Some(RecognizedEndpoint { kind: EndpointKind::ReaderCluster, .. })
    )
}
