//! Identity of the executing worker, used for lock ownership.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use serde::{Deserialize, Serialize};

/// Who holds (or wants to hold) the remote lock on a job.
///
/// Immutable after construction. Two identities are the same worker iff all
/// three fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerIdentity {
    ip: String,
    host: String,
    pid: String,
}

impl WorkerIdentity {
    pub fn new(ip: impl Into<String>, host: impl Into<String>, pid: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            host: host.into(),
            pid: pid.into(),
        }
    }

    /// Capture the identity of the calling process and thread.
    pub fn current() -> Self {
        let pid = format!(
            "{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        );
        Self::new(local_ip().to_string(), hostname(), pid)
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn matches(&self, other: &WorkerIdentity) -> bool {
        self == other
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("ip", self.ip.clone()),
            ("host", self.host.clone()),
            ("pid", self.pid.clone()),
        ])
    }
}

fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.trim().is_empty()
    {
        return name.trim().to_string();
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Outbound interface address. Connecting a UDP socket sends no packets.
fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_match_by_fields() {
        let a = WorkerIdentity::new("10.0.0.1", "box-a", "42-1");
        let b = WorkerIdentity::new("10.0.0.1", "box-a", "42-1");
        let c = WorkerIdentity::new("10.0.0.1", "box-a", "43-1");

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }

    #[test]
    fn wire_form_has_three_fields() {
        let id = WorkerIdentity::new("10.0.0.1", "box-a", "42-1");
        let v = serde_json::to_value(&id).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"ip": "10.0.0.1", "host": "box-a", "pid": "42-1"})
        );
        assert_eq!(id.to_map().get("host").map(String::as_str), Some("box-a"));
    }

    #[test]
    fn current_identity_is_stable_within_a_thread() {
        let a = WorkerIdentity::current();
        let b = WorkerIdentity::current();
        assert!(a.matches(&b));
        assert!(a.pid().starts_with(&std::process::id().to_string()));
    }
}
