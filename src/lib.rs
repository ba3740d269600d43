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

//! A synchronous Sender Policy Framework (SPF) evaluation engine.
//!
//! [`check_host`] decides whether an address may send mail on behalf of a
//! domain, fetching the domain's policy through a [`Resolver`].
//!
//! ```
//! use spfcheck::{check_host, SpfResult, StaticResolver};
//!
//! let resolver = StaticResolver::new()
//!     .with_txt("example.com", ["v=spf1 ip4:192.0.2.0/24 -all"]);
//! assert_eq!(
//!     SpfResult::Pass,
//!     check_host(
//!         &resolver,
//!         "192.0.2.7".parse().unwrap(),
//!         "example.com",
//!         "someone@example.com",
//!         "mail.example.com",
//!     ),
//! );
//! ```

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

/// Builds a `StaticResolver` from a list of names and their records.
///
/// Each field is `txt`, `a`, `aaaa`, `mx`, or `ptr` (for which the name is
/// an IP address), and takes either a list of string values or `Error` to
/// make that query fail.
#[cfg(test)]
macro_rules! zone {
    ($($name:expr => {
        $($field:ident : $value:tt,)*
    },)*) => {{
        #[allow(unused_mut)]
        let mut zone = $crate::support::dns::StaticResolver::new();
        $($(
            zone = zone!(@$field, zone, $name, $value);
        )*)*
        zone
    }};

    (@$field:ident, $zone:ident, $name:expr, Error) => {
        $zone.with_failure(zone!(@kind $field), $name)
    };
    (@txt, $zone:ident, $name:expr, $values:expr) => {
        $zone.with_txt($name, $crate::zone_strings(&$values))
    };
    (@a, $zone:ident, $name:expr, $values:expr) => {
        $zone.with_a($name, $crate::zone_addrs(&$values))
    };
    (@aaaa, $zone:ident, $name:expr, $values:expr) => {
        $zone.with_aaaa($name, $crate::zone_addrs(&$values))
    };
    (@mx, $zone:ident, $name:expr, $values:expr) => {
        $zone.with_mx($name, $crate::zone_strings(&$values))
    };
    (@ptr, $zone:ident, $name:expr, $values:expr) => {
        $zone.with_ptr(
            $name.parse().unwrap(),
            $crate::zone_strings(&$values),
        )
    };

    (@kind txt) => { $crate::support::dns::QueryType::Txt };
    (@kind a) => { $crate::support::dns::QueryType::A };
    (@kind aaaa) => { $crate::support::dns::QueryType::Aaaa };
    (@kind mx) => { $crate::support::dns::QueryType::Mx };
    (@kind ptr) => { $crate::support::dns::QueryType::Ptr };
}

pub mod spf;
pub mod support;

pub use spf::{check_host, SpfResult};
pub use support::config::ResolverConfig;
pub use support::dns::{ResolveError, Resolver, StaticResolver};
#[cfg(feature = "hickory")]
pub use support::hickory::HickoryResolver;

#[cfg(test)]
fn zone_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|&s| s.to_owned()).collect()
}

#[cfg(test)]
fn zone_addrs<T>(values: &[&str]) -> Vec<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Debug,
{
    values.iter().map(|s| s.parse().unwrap()).collect()
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{}][{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message,
                ))
            })
            .level(log::LevelFilter::Debug)
            .chain(std::io::stderr())
            .apply()
            .unwrap();
    })
}
