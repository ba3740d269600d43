//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Spfcheck.
//
// Spfcheck is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Spfcheck is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Spfcheck. If not, see <http://www.gnu.org/licenses/>.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::eval::SpfResult;
use super::syntax::Qualifier;

/// Maps a qualifier prefix to the result a matching directive produces.
///
/// `-` is `Fail`, `~` is `SoftFail`, `?` is `Neutral`, and everything else
/// (including the empty string and `+`) is `Pass`.
pub fn eval_qualifier(qualifier: &str) -> SpfResult {
    Qualifier::from_prefix(qualifier).into()
}

/// Tests `ip` against `spec`, which is either a CIDR block or a bare address.
///
/// Returns the result for `qualifier` on a match and `Neutral` otherwise. A
/// `spec` which is neither a valid CIDR nor a valid address never matches.
pub fn match_address(
    ip: IpAddr,
    spec: &str,
    qualifier: Qualifier,
) -> SpfResult {
    let ip = canonical_ip(ip);
    let matches = match parse_cidr(spec) {
        Some((network, len)) => cidr_contains(network, len, ip),
        None => spec.parse::<IpAddr>().is_ok_and(|a| canonical_ip(a) == ip),
    };

    if matches {
        qualifier.into()
    } else {
        SpfResult::Neutral
    }
}

/// Converts IPv4-mapped IPv6 addresses to plain IPv4.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 => v4,
    }
}

fn parse_cidr(spec: &str) -> Option<(IpAddr, u32)> {
    let (addr, len) = spec.split_once('/')?;
    if len.is_empty() || !len.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let addr = addr.parse::<IpAddr>().ok()?;
    let len = len.parse::<u32>().ok()?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };

    (len <= max).then_some((addr, len))
}

fn cidr_contains(network: IpAddr, len: u32, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(network), IpAddr::V4(ip)) => {
            ipv4_addr_matches(ip, network, len)
        },
        (IpAddr::V6(network), IpAddr::V6(ip)) => {
            ipv6_addr_matches(ip, network, len)
        },
        _ => false,
    }
}

fn ipv4_addr_matches(a: Ipv4Addr, b: Ipv4Addr, cidr_len: u32) -> bool {
    // checked_shl(32) is None, which means a zero-length prefix
    let mask = u32::MAX.checked_shl(32 - cidr_len).unwrap_or(0);
    let a = u32::from_be_bytes(a.octets());
    let b = u32::from_be_bytes(b.octets());
    (a & mask) == (b & mask)
}

fn ipv6_addr_matches(a: Ipv6Addr, b: Ipv6Addr, cidr_len: u32) -> bool {
    let mask = u128::MAX.checked_shl(128 - cidr_len).unwrap_or(0);
    let a = u128::from_be_bytes(a.octets());
    let b = u128::from_be_bytes(b.octets());
    (a & mask) == (b & mask)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn qualifier_mapping() {
        assert_eq!(SpfResult::Fail, eval_qualifier("-"));
        assert_eq!(SpfResult::SoftFail, eval_qualifier("~"));
        assert_eq!(SpfResult::Neutral, eval_qualifier("?"));
        assert_eq!(SpfResult::Pass, eval_qualifier("+"));
        assert_eq!(SpfResult::Pass, eval_qualifier(""));
        assert_eq!(SpfResult::Pass, eval_qualifier("!"));
    }

    #[test]
    fn ipv4_matching() {
        let q = Qualifier::Fail;
        let addr = ip("87.237.204.223");
        assert_eq!(SpfResult::Fail, match_address(addr, "87.237.204.223", q));
        assert_eq!(SpfResult::Fail, match_address(addr, "87.237.204.0/24", q));
        assert_eq!(SpfResult::Fail, match_address(addr, "0.0.0.0/0", q));
        assert_eq!(
            SpfResult::Fail,
            match_address(addr, "87.237.204.223/32", q),
        );
        assert_eq!(
            SpfResult::Neutral,
            match_address(addr, "87.237.205.0/24", q),
        );
        assert_eq!(
            SpfResult::Neutral,
            match_address(addr, "87.237.204.222", q),
        );
        assert_eq!(
            SpfResult::Neutral,
            match_address(addr, "87.237.204.223/33", q),
        );
        assert_eq!(SpfResult::Neutral, match_address(addr, "garbage", q));
        assert_eq!(SpfResult::Neutral, match_address(addr, "", q));
        assert_eq!(SpfResult::Neutral, match_address(addr, "::/0", q));
    }

    #[test]
    fn ipv6_matching() {
        let q = Qualifier::SoftFail;
        let addr = ip("2001:db8::1");
        assert_eq!(SpfResult::SoftFail, match_address(addr, "2001:db8::1", q));
        assert_eq!(
            SpfResult::SoftFail,
            match_address(addr, "2001:db8::/32", q),
        );
        assert_eq!(SpfResult::SoftFail, match_address(addr, "::/0", q));
        assert_eq!(
            SpfResult::Neutral,
            match_address(addr, "2001:db9::/32", q),
        );
        assert_eq!(
            SpfResult::Neutral,
            match_address(addr, "2001:db8::/129", q),
        );
        assert_eq!(SpfResult::Neutral, match_address(addr, "0.0.0.0/0", q));
    }

    #[test]
    fn mapped_addresses_are_ipv4() {
        let q = Qualifier::Pass;
        assert_eq!(
            SpfResult::Pass,
            match_address(ip("::ffff:192.0.2.1"), "192.0.2.0/24", q),
        );
        assert_eq!(
            SpfResult::Pass,
            match_address(ip("192.0.2.1"), "::ffff:192.0.2.1", q),
        );
        assert_eq!(ip("192.0.2.1"), canonical_ip(ip("::ffff:192.0.2.1")));
        assert_eq!(ip("::1"), canonical_ip(ip("::1")));
    }

    proptest! {
        #[test]
        fn qualifier_mapping_is_total(q in ".{0,4}") {
            let expected = match q.as_str() {
                "-" => SpfResult::Fail,
                "~" => SpfResult::SoftFail,
                "?" => SpfResult::Neutral,
                _ => SpfResult::Pass,
            };
            prop_assert_eq!(expected, eval_qualifier(&q));
        }

        #[test]
        fn prefix_contains_its_own_network(
            a in any::<u32>(),
            len in 0u32..=32,
        ) {
            let addr = Ipv4Addr::from(a);
            prop_assert_eq!(
                SpfResult::Pass,
                match_address(
                    addr.into(),
                    &format!("{}/{}", addr, len),
                    Qualifier::Pass,
                ),
            );
        }
    }
}
