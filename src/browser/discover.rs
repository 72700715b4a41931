//! Finding a debuggable browser to attach to.
//!
//! Priority: an explicit endpoint, an explicit port, the debug port a
//! running Chromium was started with, then the conventional defaults.

use std::ffi::OsString;
use std::time::Duration;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::BrowserError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

const PORT_FLAG: &str = "--remote-debugging-port=";
const DEFAULT_PORTS: [u16; 2] = [9222, 9223];
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Resolve the CDP endpoint to attach to.
pub async fn discover_endpoint(
    explicit: Option<&str>,
    port_override: Option<u16>,
) -> Result<String, BrowserError> {
    if let Some(endpoint) = explicit {
        return Ok(endpoint.trim_end_matches('/').to_string());
    }

    if let Some(port) = port_override {
        let endpoint = format!("http://127.0.0.1:{port}");
        return if probe(&endpoint).await {
            Ok(endpoint)
        } else {
            Err(BrowserError::EndpointUnavailable(endpoint))
        };
    }

    for port in scan_process_ports() {
        let endpoint = format!("http://127.0.0.1:{port}");
        if probe(&endpoint).await {
            log_info!("found debuggable browser on port {port}");
            return Ok(endpoint);
        }
    }

    for port in DEFAULT_PORTS {
        let endpoint = format!("http://127.0.0.1:{port}");
        if probe(&endpoint).await {
            log_info!("found debuggable browser on default port {port}");
            return Ok(endpoint);
        }
    }

    Err(BrowserError::NoBrowserFound)
}

/// Debug ports named on the command line of any running process. Use
/// everything() so command lines are populated.
fn scan_process_ports() -> Vec<u16> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, ProcessRefreshKind::everything());

    let mut ports: Vec<u16> = system
        .processes()
        .values()
        .flat_map(|process| process.cmd().iter().filter_map(parse_port_flag))
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

fn parse_port_flag(arg: &OsString) -> Option<u16> {
    arg.to_str()?.strip_prefix(PORT_FLAG)?.parse().ok()
}

async fn probe(endpoint: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(format!("{endpoint}/json/version")).send().await {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            log_debug!("no browser at {endpoint}: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_flag_parsing() {
        assert_eq!(
            parse_port_flag(&OsString::from("--remote-debugging-port=9222")),
            Some(9222)
        );
        assert_eq!(
            parse_port_flag(&OsString::from("--remote-debugging-port=abc")),
            None
        );
        assert_eq!(parse_port_flag(&OsString::from("--headless")), None);
        assert_eq!(parse_port_flag(&OsString::from("")), None);
    }

    #[tokio::test]
    async fn explicit_endpoint_wins_without_probing() {
        let endpoint = discover_endpoint(Some("http://10.0.0.5:9222/"), Some(1))
            .await
            .unwrap();
        assert_eq!(endpoint, "http://10.0.0.5:9222");
    }
}
