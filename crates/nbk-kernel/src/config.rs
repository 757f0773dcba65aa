use std::time::Duration;

use nbk_exec::scratch;
use nbk_protocol::content::{HelpLink, LanguageInfo};

#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Sleep between heartbeat polls when nothing is waiting.
    pub heartbeat_interval: Duration,
    /// Sleep between shell/control polls when nothing is waiting.
    pub poll_interval: Duration,
    pub implementation: String,
    pub implementation_version: String,
    pub language: LanguageInfo,
    pub help_links: Vec<HelpLink>,
    /// Comm targets accepted by `comm_open`; anything else is closed right away.
    pub comm_targets: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            implementation: "nbk".into(),
            implementation_version: env!("CARGO_PKG_VERSION").into(),
            language: LanguageInfo {
                name: scratch::LANGUAGE.into(),
                version: scratch::LANGUAGE_VERSION.into(),
                mimetype: scratch::MIMETYPE.into(),
                file_extension: scratch::FILE_EXTENSION.into(),
                codemirror_mode: None,
            },
            help_links: vec![HelpLink {
                text: "Jupyter messaging".into(),
                url: "https://jupyter-client.readthedocs.io/en/latest/messaging.html".into(),
            }],
            comm_targets: Vec::new(),
        }
    }
}

impl KernelConfig {
    /// `<lang> <ver> :: <impl> <ver> :: Protocol v<protocol>`
    pub fn banner(&self) -> String {
        format!(
            "{} {} :: {} {} :: Protocol v{}",
            self.language.name,
            self.language.version,
            self.implementation,
            self.implementation_version,
            nbk_protocol::PROTOCOL_VERSION
        )
    }
}
