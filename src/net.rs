//! Local address lookup for audit records.

use std::net::{IpAddr, Ipv4Addr};

use crate::error::{MqError, Result};

/// First non-loopback IPv4 address of this host.
pub fn local_ipv4() -> Result<Ipv4Addr> {
    let interfaces = if_addrs::get_if_addrs()?;
    first_routable_v4(interfaces.iter().map(|iface| iface.ip())).ok_or(MqError::NoLocalAddress)
}

fn first_routable_v4(addrs: impl IntoIterator<Item = IpAddr>) -> Option<Ipv4Addr> {
    addrs.into_iter().find_map(|addr| match addr {
        IpAddr::V4(v4) if !v4.is_loopback() => Some(v4),
        _ => None,
    })
}
