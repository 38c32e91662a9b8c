use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::{debug, info};

use crate::error::{FerryError, Result};

/// Non-routable probe target. Connecting a UDP socket sends nothing, it only
/// makes the kernel pick the outbound interface.
const PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 255, 255, 255), 1);

/// Address this node advertises as the origin of its files.
///
/// An explicit override wins. Otherwise the address of the interface the
/// kernel would route outbound traffic through is used. Loopback and
/// unspecified addresses are rejected so notifications never point peers at
/// themselves.
pub fn resolve_node_address(advertise: Option<&str>) -> Result<IpAddr> {
    if let Some(raw) = advertise {
        let addr: IpAddr = raw.trim().parse().map_err(|err| {
            FerryError::NoRoutableAddress(format!(
                "advertise address {raw:?} is not an IP address: {err}"
            ))
        })?;
        info!(%addr, "using configured advertise address");
        return Ok(addr);
    }

    let addr = probe_outbound_address()?;
    if addr.is_loopback() || addr.is_unspecified() {
        return Err(FerryError::NoRoutableAddress(format!(
            "outbound interface resolved to {addr}"
        )));
    }
    debug!(%addr, "discovered node address");
    Ok(addr)
}

fn probe_outbound_address() -> Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .map_err(|err| FerryError::NoRoutableAddress(err.to_string()))?;
    socket
        .connect(PROBE_TARGET)
        .map_err(|err| FerryError::NoRoutableAddress(err.to_string()))?;
    socket
        .local_addr()
        .map(|local| local.ip())
        .map_err(|err| FerryError::NoRoutableAddress(err.to_string()))
}
