//! Startup source check.
//!
//! Before the first trigger, the supervisor can check that every configured
//! source answers. When all do, it raises the start signal itself so a freshly
//! booted device begins capturing without operator action.

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::config::{RunConfig, SourceType, StreamSource};

const DEFAULT_RTSP_PORT: u16 = 554;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of checking one source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub name: String,
    pub reachable: bool,
    pub detail: String,
}

/// Check every source in `config`.
pub fn probe_sources(config: &RunConfig) -> Vec<ProbeOutcome> {
    config
        .sources
        .iter()
        .map(|source| {
            let result = match config.source_type {
                SourceType::Rtsp => probe_uri(&source.uri),
                SourceType::Usb | SourceType::Mipi => probe_device(source),
            };
            match result {
                Ok(detail) => ProbeOutcome {
                    name: source.name.clone(),
                    reachable: true,
                    detail,
                },
                Err(e) => ProbeOutcome {
                    name: source.name.clone(),
                    reachable: false,
                    detail: format!("{:#}", e),
                },
            }
        })
        .collect()
}

/// True when every outcome is reachable and there is at least one.
pub fn all_reachable(outcomes: &[ProbeOutcome]) -> bool {
    !outcomes.is_empty() && outcomes.iter().all(|o| o.reachable)
}

fn probe_uri(uri: &str) -> Result<String> {
    let url = Url::parse(uri).with_context(|| format!("parse source uri {}", uri))?;
    match url.scheme() {
        "stub" => Ok("synthetic".to_string()),
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow!("invalid file uri {}", uri))?;
            if path.exists() {
                Ok(format!("file {}", path.display()))
            } else {
                Err(anyhow!("file {} not found", path.display()))
            }
        }
        _ => {
            let host = url
                .host_str()
                .ok_or_else(|| anyhow!("source uri {} has no host", uri))?;
            let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);
            let addr = resolve(host, port)?;
            TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
                .with_context(|| format!("connect {}", addr))?;
            Ok(format!("tcp {}", addr))
        }
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolve {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow!("no address for {}:{}", host, port))
}

fn probe_device(source: &StreamSource) -> Result<String> {
    if source.uri.starts_with("csi://") {
        // CSI sensors enumerate as V4L2 nodes on Jetson-class boards.
        return device_exists(Path::new("/dev/video0"));
    }
    device_exists(Path::new(&source.uri))
}

fn device_exists(path: &Path) -> Result<String> {
    if path.exists() {
        Ok(format!("device {}", path.display()))
    } else {
        Err(anyhow!("device {} not present", path.display()))
    }
}
