use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::signer::Signer;

/// The four sockets a kernel binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Heartbeat,
    Shell,
    Control,
    IOPub,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelKind::Heartbeat => "heartbeat",
            ChannelKind::Shell => "shell",
            ChannelKind::Control => "control",
            ChannelKind::IOPub => "iopub",
        })
    }
}

fn default_scheme() -> String {
    "hmac-sha256".into()
}

/// Contents of the JSON connection file handed to the kernel at launch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_port: Option<u16>,
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_scheme")]
    pub signature_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

impl ConnectionInfo {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ProtocolError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn port(&self, channel: ChannelKind) -> u16 {
        match channel {
            ChannelKind::Heartbeat => self.hb_port,
            ChannelKind::Shell => self.shell_port,
            ChannelKind::Control => self.control_port,
            ChannelKind::IOPub => self.iopub_port,
        }
    }

    /// Endpoint address for `channel`, e.g. `tcp://127.0.0.1:5555`.
    pub fn address(&self, channel: ChannelKind) -> String {
        format!("{}://{}:{}", self.transport, self.ip, self.port(channel))
    }

    pub fn signer(&self) -> Result<Signer, ProtocolError> {
        Signer::new(&self.signature_scheme, &self.key)
    }
}
