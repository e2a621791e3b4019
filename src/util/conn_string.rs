//! Case-insensitive connection-string key/value parsing and rebuilding.
//!
//! Keys are matched case-insensitively (per spec §6); the original casing of unrecognized
//! keys is preserved on rebuild so round-tripping a string a caller supplied doesn't mangle
//! keys this crate doesn't care about.

use std::collections::BTreeMap;

/// `SERVER` — host to connect to; rewritten per probe/failover target.
pub const KEY_SERVER: &str = "SERVER";
/// `ENABLECLUSTERFAILOVER` — `1` enables this layer, `0` disables it.
pub const KEY_ENABLE_CLUSTER_FAILOVER: &str = "ENABLECLUSTERFAILOVER";
/// `FAILOVERMODE` — `STRICT_READER` / `STRICT_WRITER` / `READER_OR_WRITER`.
pub const KEY_FAILOVER_MODE: &str = "FAILOVERMODE";
/// `READERHOSTSELECTORSTRATEGY` — `RANDOM` / `ROUND_ROBIN` / `HIGHEST_WEIGHT` (default `RANDOM`).
pub const KEY_READER_HOST_SELECTOR_STRATEGY: &str = "READERHOSTSELECTORSTRATEGY";
/// `HOSTPATTERN` — endpoint template with a `?` placeholder.
pub const KEY_HOST_PATTERN: &str = "HOSTPATTERN";
/// `IGNORETOPOLOGYREQUEST` — ms.
pub const KEY_IGNORE_TOPOLOGY_REQUEST: &str = "IGNORETOPOLOGYREQUEST";
/// `TOPOLOGYHIGHREFRESHRATE` — ms (default 10 000).
pub const KEY_TOPOLOGY_HIGH_REFRESH_RATE: &str = "TOPOLOGYHIGHREFRESHRATE";
/// `TOPOLOGYREFRESHRATE` — ms (default 30 000).
pub const KEY_TOPOLOGY_REFRESH_RATE: &str = "TOPOLOGYREFRESHRATE";
/// `FAILOVERTIMEOUT` — ms (default 30 000).
pub const KEY_FAILOVER_TIMEOUT: &str = "FAILOVERTIMEOUT";
/// `CLUSTERID` — explicit cluster ID override.
pub const KEY_CLUSTER_ID: &str = "CLUSTERID";

const BOOL_FALSE: &str = "0";

/// A parsed connection string: an ordered map of key/value pairs, keyed case-insensitively.
///
/// Internally keys are folded to uppercase for lookup, but the value stored is `(original_key,
/// value)` so rebuilding preserves the casing the caller used for any key this crate doesn't
/// recognize by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionString {
    entries: BTreeMap<String, (String, String)>,
}

impl ConnectionString {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `SEMICOLON`-separated `key=value` pairs. Unrecognized syntax in a segment (no
    /// `=`) is ignored, matching ODBC connection-string tolerance for trailing separators.
    pub fn parse(raw: &str) -> Self {
        let mut cs = Self::new();
        for segment in raw.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            if let Some((key, value)) = segment.split_once('=') {
                cs.set(key.trim(), value.trim());
            }
        }
        cs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&key.to_uppercase()).map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_uppercase(), (key.to_string(), value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(&key.to_uppercase());
    }

    /// Rebuilds the connection string as `key=value;key=value;...`, preserving each key's
    /// originally-supplied casing.
    pub fn to_string_rebuilt(&self) -> String {
        self.entries
            .values()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Returns a copy with `SERVER` set to `host` and cluster failover forced off, to prevent
    /// a probe or failover target from recursively re-entering this layer.
    pub fn for_target_host(&self, host: &str) -> Self {
        let mut cs = self.clone();
        cs.set(KEY_SERVER, host);
        cs.set(KEY_ENABLE_CLUSTER_FAILOVER, BOOL_FALSE);
        cs
    }

    /// Returns a copy with cluster failover forced off, leaving `SERVER` untouched. Used for
    /// the cluster-level template a monitor reconnects with (e.g. the bootstrap "open any"
    /// session), where the original endpoint should be kept as-is.
    pub fn with_failover_disabled(&self) -> Self {
        let mut cs = self.clone();
        cs.set(KEY_ENABLE_CLUSTER_FAILOVER, BOOL_FALSE);
        cs
    }
}
