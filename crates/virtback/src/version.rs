//! Build and format information reported by `virtback version`

use serde::{Deserialize, Serialize};
use virtback_core::CompressionMethod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,

    /// Stream container version this build writes and reads
    pub stream_version: u32,

    /// Payload compression methods this build understands
    pub compression: Vec<String>,

    pub commit: Option<String>,
    pub build_date: Option<String>,
    pub target: Option<String>,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            stream_version: virtback_stream::STREAM_VERSION,
            compression: [CompressionMethod::Lz4, CompressionMethod::Zlib]
                .iter()
                .map(|method| method.as_str().to_string())
                .collect(),
            commit: option_env!("GIT_SHA").map(String::from),
            build_date: option_env!("BUILD_DATE").map(String::from),
            target: option_env!("TARGET").map(String::from),
        }
    }

    /// One-line summary: `virtback 0.3.0 (stream v2, abc1234)`.
    pub fn display(&self) -> String {
        let mut detail = vec![format!("stream v{}", self.stream_version)];
        if let Some(commit) = &self.commit {
            detail.push(commit.clone());
        }
        format!("virtback {} ({})", self.version, detail.join(", "))
    }
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
