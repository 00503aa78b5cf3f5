use crate::prelude::*;

use futures::future;
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Reachability probe timeout per candidate host.
const SCAN_TIMEOUT_SECS: u64 = 1;

/// The /24 prefix ("192.168.1") this machine sits on, derived from its
/// primary non-loopback IPv4 address.
pub fn local_subnet() -> Result<String> {
    let ip = local_ip_address::local_ip()
        .map_err(|err| anyhow!("could not determine local IP address: {}", err))?;

    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            Ok(format!("{}.{}.{}", octets[0], octets[1], octets[2]))
        }
        IpAddr::V6(v6) => bail!("local address {} is IPv6; subnet scanning needs IPv4", v6),
    }
}

/// Every usable host address in the subnet's /24 range, ascending.
/// Network (.0) and broadcast (.255) are excluded.
pub fn subnet_hosts(subnet: &str) -> Vec<String> {
    (1..=254).map(|suffix| format!("{}.{}", subnet, suffix)).collect()
}

/// Can a TCP stream be opened at all? No protocol traffic; refused and
/// timed out both count as "not here" and the socket is torn down.
async fn check_port(host: &str, port: u16) -> bool {
    let connect = TcpStream::connect((host, port));

    matches!(
        timeout(Duration::from_secs(SCAN_TIMEOUT_SECS), connect).await,
        Ok(Ok(_))
    )
}

/// Candidates that accepted a TCP connection, in the order given. Full
/// fan-out: every probe runs concurrently, bounded by the timeout, not
/// by work.
pub async fn reachable_hosts(candidates: &[String], port: u16) -> Vec<String> {
    let probes = candidates.iter().map(|host| check_port(host, port));
    let results = future::join_all(probes).await;

    candidates
        .iter()
        .zip(results)
        .filter(|(_, open)| *open)
        .map(|(host, _)| host.clone())
        .collect()
}

/// One bounded identity read. Any transport failure means "not the
/// device we are looking for", never an error; discovery moves on to the
/// next candidate.
pub async fn probe_device(transport: &mut dyn RegisterTransport) -> bool {
    transport
        .read_registers(map::PROBE_REGISTER, map::PROBE_COUNT)
        .await
        .is_ok()
}

/// Scan a /24 for a GoodWe inverter: concurrent TCP reachability first,
/// then sequential protocol confirmation, so at most one unconfirmed
/// host holds an open protocol session at a time. First confirmed host
/// in ascending address order wins; multiple inverters on one subnet are
/// not disambiguated.
pub async fn find_inverter(subnet: &str, port: u16) -> Result<NetworkDevice> {
    let candidates = subnet_hosts(subnet);
    info!("scanning {}.0/24 for an inverter on port {}", subnet, port);

    let reachable = reachable_hosts(&candidates, port).await;
    debug!("{} of {} hosts reachable", reachable.len(), candidates.len());

    for host in reachable {
        info!("checking {}...", host);

        match transport::Modbus::connect(&host, port).await {
            Ok(mut transport) => {
                if probe_device(&mut transport).await {
                    info!("confirmed inverter at {}", host);
                    return Ok(NetworkDevice { host, port });
                }
                debug!("{} answers on port {} but is not a GoodWe inverter", host, port);
            }
            Err(err) => debug!("{}: {:#}", host, err),
        }
    }

    bail!("no inverter found on subnet {}.0/24", subnet)
}

/// Read the cached inverter address, if the cache file holds a plausible
/// one. Anything beyond "parses as IPv4" is left to the connect attempt;
/// a stale entry costs one failed connect before a rescan.
pub fn read_cached_device(path: &str, port: u16) -> Option<NetworkDevice> {
    let contents = std::fs::read_to_string(path).ok()?;
    let host = contents.trim();
    host.parse::<Ipv4Addr>().ok()?;

    Some(NetworkDevice {
        host: host.to_string(),
        port,
    })
}

/// Remember a confirmed address for the next start.
pub fn write_cached_device(path: &str, device: &NetworkDevice) -> Result<()> {
    std::fs::write(path, format!("{}\n", device.host))
        .map_err(|err| anyhow!("could not write device cache {}: {}", path, err))
}
