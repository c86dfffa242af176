//-
// Copyright (c) 2023, 2024, Jason Lingle
//
// This file is part of spfcheck.
//
// spfcheck is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// spfcheck is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// spfcheck. If not, see <http://www.gnu.org/licenses/>.

//! IP address helpers: CIDR networks and the textual forms SPF needs.

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_resolver::Name;

use super::error::PermError;

/// An `ip4` or `ip6` network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    V4(Ipv4Addr, u8),
    V6(Ipv6Addr, u8),
}

impl Network {
    /// Parses an `ip4` argument such as `192.0.2.0/24`. A missing prefix
    /// length means `/32`.
    pub fn parse_v4(s: &str) -> Result<Self, PermError> {
        let invalid = || PermError::InvalidNetwork(s.to_owned());
        let (addr, len) = split_prefix(s, 32).ok_or_else(invalid)?;
        let addr = addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
        Ok(Self::V4(addr, len))
    }

    /// Parses an `ip6` argument such as `2001:db8::/32`. A missing prefix
    /// length means `/128`.
    pub fn parse_v6(s: &str) -> Result<Self, PermError> {
        let invalid = || PermError::InvalidNetwork(s.to_owned());
        let (addr, len) = split_prefix(s, 128).ok_or_else(invalid)?;
        let addr = addr.parse::<Ipv6Addr>().map_err(|_| invalid())?;
        Ok(Self::V6(addr, len))
    }

    /// Whether `ip` is inside this network. Addresses of the other family are
    /// never members.
    pub fn contains(self, ip: IpAddr) -> bool {
        match (self, ip) {
            (Self::V4(net, len), IpAddr::V4(ip)) => {
                ipv4_addr_matches(ip, net, Some(len))
            },
            (Self::V6(net, len), IpAddr::V6(ip)) => {
                ipv6_addr_matches(ip, net, Some(len))
            },
            _ => false,
        }
    }
}

fn split_prefix(s: &str, max: u8) -> Option<(&str, u8)> {
    match s.split_once('/') {
        None => Some((s, max)),
        Some((addr, len)) => {
            // Reject things like "/+8" which u8::from_str would accept.
            if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let len = len.parse::<u8>().ok().filter(|&l| l <= max)?;
            Some((addr, len))
        },
    }
}

/// Whether `a` and `b` agree on their first `cidr_len` bits, or are equal if
/// there is no prefix length.
pub fn ipv4_addr_matches(a: Ipv4Addr, b: Ipv4Addr, cidr_len: Option<u8>) -> bool {
    if let Some(mask) =
        cidr_len.and_then(|l| u32::MAX.checked_shl(32 - u32::from(l.min(32))))
    {
        let a = u32::from_be_bytes(a.octets());
        let b = u32::from_be_bytes(b.octets());
        (a & mask) == (b & mask)
    } else {
        // Either no prefix length, or /0.
        cidr_len.is_some() || a == b
    }
}

/// Like `ipv4_addr_matches`, but for IPv6.
pub fn ipv6_addr_matches(a: Ipv6Addr, b: Ipv6Addr, cidr_len: Option<u8>) -> bool {
    if let Some(mask) = cidr_len
        .and_then(|l| u128::MAX.checked_shl(128 - u32::from(l.min(128))))
    {
        let a = u128::from_be_bytes(a.octets());
        let b = u128::from_be_bytes(b.octets());
        (a & mask) == (b & mask)
    } else {
        cidr_len.is_some() || a == b
    }
}

/// Whether `candidate` is in the same family as `ip` and matches it under
/// the applicable half of a dual CIDR length.
pub fn addr_matches(
    ip: IpAddr,
    candidate: IpAddr,
    v4_len: Option<u8>,
    v6_len: Option<u8>,
) -> bool {
    match (ip, candidate) {
        (IpAddr::V4(ip), IpAddr::V4(c)) => ipv4_addr_matches(ip, c, v4_len),
        (IpAddr::V6(ip), IpAddr::V6(c)) => ipv6_addr_matches(ip, c, v6_len),
        _ => false,
    }
}

/// The dotted form used by the `%{i}` macro.
///
/// IPv4 is plain dotted decimal. IPv6 is the 32 hexadecimal nibbles separated
/// by dots, which RFC 7208 § 7.4 shows is required even though it is
/// otherwise obsolete.
pub fn dotted_form(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => {
            let mut s = String::with_capacity(63);
            for (i, octet) in ip.octets().into_iter().enumerate() {
                if 0 != i {
                    s.push('.');
                }
                let _ = write!(s, "{:x}.{:x}", octet >> 4, octet & 0xF);
            }
            s
        },
    }
}

/// The `in-addr.arpa` or `ip6.arpa` name whose PTR records name `ip`.
pub fn reverse_pointer_name(ip: IpAddr) -> Name {
    let suffix = match ip {
        IpAddr::V4(_) => "in-addr.arpa.",
        IpAddr::V6(_) => "ip6.arpa.",
    };

    let forward = dotted_form(ip);
    let mut s = String::with_capacity(forward.len() + suffix.len() + 1);
    for label in forward.rsplit('.') {
        s.push_str(label);
        s.push('.');
    }
    s.push_str(suffix);

    // Digits, hex nibbles, and fixed suffixes always form a valid name.
    Name::from_ascii(&s).unwrap_or_else(|_| Name::root())
}
