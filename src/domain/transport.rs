//! Transport address blocks of pool elements and registrators.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Maximum number of addresses in one transport address block.
pub const MAX_TRANSPORT_ADDRESSES: usize = 32;

/// Transport protocol of an address block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    /// Stream Control Transmission Protocol.
    Sctp,
    /// Transmission Control Protocol.
    Tcp,
    /// User Datagram Protocol.
    Udp,
}

impl TransportProtocol {
    /// Upper-case protocol name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sctp => "SCTP",
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

/// Port, protocol and address list under which an endpoint is reachable.
///
/// The derived ordering (protocol, port, flag, addresses) is total and is
/// used by the peer list to key peers that have no identifier yet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportAddressBlock {
    /// Transport protocol.
    pub protocol: TransportProtocol,
    /// Port number; `0` is invalid for registrations.
    pub port: u16,
    /// Whether the endpoint uses a control channel.
    pub control_channel: bool,
    /// Reachable addresses, at most [`MAX_TRANSPORT_ADDRESSES`].
    pub addresses: Vec<IpAddr>,
}

impl TransportAddressBlock {
    /// Creates an address block.
    #[must_use]
    pub fn new(
        protocol: TransportProtocol,
        port: u16,
        control_channel: bool,
        addresses: Vec<IpAddr>,
    ) -> Self {
        Self {
            protocol,
            port,
            control_channel,
            addresses,
        }
    }

    /// Returns `true` when the address count is within `1..=MAX` and the
    /// port is set.
    #[must_use]
    pub fn has_valid_addresses(&self) -> bool {
        (1..=MAX_TRANSPORT_ADDRESSES).contains(&self.addresses.len()) && self.port != 0
    }

    /// Two blocks overlap when port and control channel flag are equal and
    /// they share at least one address.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.port == other.port
            && self.control_channel == other.control_channel
            && self
                .addresses
                .iter()
                .any(|address| other.addresses.contains(address))
    }
}

impl fmt::Display for TransportAddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, address) in self.addresses.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{address}")?;
        }
        write!(f, "}} {}/{}", self.port, self.protocol.as_str())?;
        if self.control_channel {
            f.write_str("+CtrlCh")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    fn block(port: u16, addresses: &[IpAddr]) -> TransportAddressBlock {
        TransportAddressBlock::new(TransportProtocol::Sctp, port, false, addresses.to_vec())
    }

    #[test]
    fn overlap_needs_shared_address_and_port() {
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        let c = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert!(block(9901, &[a, b]).overlaps(&block(9901, &[b, c])));
        assert!(!block(9901, &[a]).overlaps(&block(9901, &[c])));
        assert!(!block(9901, &[a]).overlaps(&block(9902, &[a])));
    }

    #[test]
    fn validity_checks_port_and_count() {
        let a = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(block(7, &[a]).has_valid_addresses());
        assert!(!block(0, &[a]).has_valid_addresses());
        assert!(!block(7, &[]).has_valid_addresses());
        assert!(!block(7, &[a; MAX_TRANSPORT_ADDRESSES + 1]).has_valid_addresses());
    }

    #[test]
    fn display_lists_addresses_and_flags() {
        let mut transport = block(7, &[IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        transport.control_channel = true;
        assert_eq!(transport.to_string(), "{127.0.0.1} 7/SCTP+CtrlCh");
    }
}
