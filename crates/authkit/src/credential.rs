//! Caller credentials.
//!
//! The opaque `caller_id` blob used by the bundled backends is a small JSON
//! document describing the calling process. Helpers that see the peer over a
//! unix socket replace it with what the kernel reports.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerCredential {
    pub uid: u32,
    pub gid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
}

impl CallerCredential {
    /// Credential of the running process.
    pub fn current() -> Self {
        Self {
            uid: rustix::process::getuid().as_raw(),
            gid: rustix::process::getgid().as_raw(),
            pid: i32::try_from(std::process::id()).ok(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing three integers cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    /// Credential of the peer of a connected unix socket.
    pub fn from_peer(stream: &tokio::net::UnixStream) -> std::io::Result<Self> {
        let cred = stream.peer_cred()?;
        Ok(Self {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid(),
        })
    }

    /// Same user and group; the pid is informational.
    pub fn same_identity(&self, other: &Self) -> bool {
        self.uid == other.uid && self.gid == other.gid
    }
}
