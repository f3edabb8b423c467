//! LAN auto-discovery for the DVR host (§4.3.3, §9 "Auto-discovery scope
//! creep"): bounded to this host's own interfaces, rate-limited to once
//! every 60 s, and never run unless the configured host has actually
//! failed.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

const MAX_PARALLEL_PROBES: usize = 300;
const PROBE_TIMEOUT: Duration = Duration::from_millis(600);
const RESCAN_INTERVAL: Duration = Duration::from_secs(60);
const DVR_CMD_PORT: u16 = 5050;

/// Rate-limits [`scan`] to at most once per [`RESCAN_INTERVAL`].
pub struct Discovery {
    last_scan: Mutex<Option<Instant>>,
}

impl Discovery {
    pub fn new() -> Self {
        Discovery { last_scan: Mutex::new(None) }
    }

    /// Scans the local /24s for a responder on port 5050, honoring the
    /// 60s rate limit. Returns `None` if rate-limited or nothing found.
    pub async fn scan(&self) -> Option<IpAddr> {
        {
            let mut last = self.last_scan.lock().await;
            if let Some(t) = *last {
                if t.elapsed() < RESCAN_INTERVAL {
                    log::debug!("discovery scan skipped, rate-limited");
                    return None;
                }
            }
            *last = Some(Instant::now());
        }

        let candidates = candidate_addrs();
        log::info!("scanning {} candidate addresses for a DVR on port {DVR_CMD_PORT}", candidates.len());
        probe_bounded(&candidates, DVR_CMD_PORT, MAX_PARALLEL_PROBES).await
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Discovery::new()
    }
}

/// Every host address in each IPv4 /24 this machine has an interface on,
/// plus a small hardcoded fallback list (§9).
fn candidate_addrs() -> Vec<IpAddr> {
    let mut addrs = Vec::new();

    if let Ok(ifaces) = get_if_addrs::get_if_addrs() {
        for iface in ifaces {
            if iface.is_loopback() {
                continue;
            }
            if let IpAddr::V4(ip) = iface.ip() {
                addrs.extend(hosts_in_24(ip));
            }
        }
    }

    for fallback in ["192.168.1.1", "192.168.0.1"] {
        if let Ok(ip) = fallback.parse() {
            addrs.push(ip);
        }
    }

    addrs
}

fn hosts_in_24(ip: Ipv4Addr) -> Vec<IpAddr> {
    let octets = ip.octets();
    (1u8..255).map(|last| IpAddr::V4(Ipv4Addr::new(octets[0], octets[1], octets[2], last))).collect()
}

/// Probes `addrs` for a TCP responder on `port`, at most `max_parallel`
/// attempts in flight, returning the first that answers.
async fn probe_bounded(addrs: &[IpAddr], port: u16, max_parallel: usize) -> Option<IpAddr> {
    use futures::stream::{FuturesUnordered, StreamExt};

    let mut pending = FuturesUnordered::new();
    let mut remaining = addrs.iter();

    for addr in remaining.by_ref().take(max_parallel) {
        pending.push(probe_one(*addr, port));
    }

    while let Some(result) = pending.next().await {
        if let Some(found) = result {
            return Some(found);
        }
        if let Some(addr) = remaining.next() {
            pending.push(probe_one(*addr, port));
        }
    }

    None
}

async fn probe_one(addr: IpAddr, port: u16) -> Option<IpAddr> {
    match timeout(PROBE_TIMEOUT, TcpStream::connect((addr, port))).await {
        Ok(Ok(_)) => Some(addr),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosts_in_24_spans_1_to_254() {
        let hosts = hosts_in_24(Ipv4Addr::new(10, 0, 0, 42));
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(hosts[253], IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254)));
    }

    #[tokio::test]
    async fn rate_limit_blocks_immediate_rescan() {
        let d = Discovery::new();
        *d.last_scan.lock().await = Some(Instant::now());
        assert!(d.scan().await.is_none());
    }
}
