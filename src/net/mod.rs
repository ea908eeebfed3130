//! Network address parsing
//!
//! Parses the `host[:port]` strings used as member transport addresses and
//! dispatches on the host suffix. Only consumed by the messaging layer.

use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

/// Address parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid host")]
    InvalidHost,
    #[error("invalid port")]
    InvalidPort,
    #[error("I2P addresses are not supported")]
    UnsupportedI2p,
    #[error("unsupported address type")]
    UnsupportedAddress,
}

/// A parsed network address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAddress {
    Ipv4 { ip: Ipv4Addr, port: u16 },
    Tor { host: String, port: u16 },
}

/// Parse a `host[:port]` string
///
/// `.onion` hosts become Tor addresses. `.i2p` hosts are rejected before any
/// resolution can happen, so a misconfigured address never leaks to public
/// DNS. Everything else must be a numeric IPv4 address.
pub fn get_network_address(address: &str, default_port: u16) -> Result<NetworkAddress, AddressError> {
    let host = match address.rfind(':') {
        Some(pos) => &address[..pos],
        None => address,
    };
    if host.is_empty() {
        return Err(AddressError::InvalidHost);
    }

    let port = if host.len() < address.len() {
        address[host.len() + 1..]
            .parse::<u16>()
            .map_err(|_| AddressError::InvalidPort)?
    } else {
        default_port
    };

    if host.ends_with(".onion") {
        return Ok(NetworkAddress::Tor {
            host: host.to_string(),
            port,
        });
    }
    if host.ends_with(".i2p") {
        return Err(AddressError::UnsupportedI2p);
    }

    let ip = Ipv4Addr::from_str(host).map_err(|_| AddressError::UnsupportedAddress)?;
    Ok(NetworkAddress::Ipv4 { ip, port })
}
