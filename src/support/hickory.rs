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

//! A [`Resolver`] backed by `hickory-resolver`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_resolver::config::{
    NameServerConfigGroup, ResolverConfig as HickoryConfig, ResolverOpts,
};
use hickory_resolver::error::{
    ResolveError as HickoryError, ResolveErrorKind as Rek,
};
use thiserror::Error;

use super::config::ResolverConfig;
use super::dns::{QueryType, ResolveError, Resolver};

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to start resolver: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read system resolver configuration: {0}")]
    SystemConfig(#[from] HickoryError),
}

/// Sends real DNS queries, blocking the calling thread.
pub struct HickoryResolver {
    inner: hickory_resolver::Resolver,
}

impl HickoryResolver {
    pub fn from_config(config: &ResolverConfig) -> Result<Self, Error> {
        let (hickory_config, mut opts) = if config.use_system_config {
            hickory_resolver::system_conf::read_system_conf()?
        } else {
            let group = NameServerConfigGroup::from_ips_clear(
                &[config.server.ip()],
                config.server.port(),
                true,
            );
            (
                HickoryConfig::from_parts(None, vec![], group),
                ResolverOpts::default(),
            )
        };

        opts.timeout = config.timeout();
        opts.attempts = config.attempts;

        let inner = hickory_resolver::Resolver::new(hickory_config, opts)?;
        Ok(Self { inner })
    }
}

/// Makes `domain` fully-qualified so that search domains never apply.
fn fqdn(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_owned()
    } else {
        format!("{domain}.")
    }
}

/// Converts a hickory result, treating "no records" as an empty success.
fn convert<L, T>(
    kind: QueryType,
    name: &str,
    r: Result<L, HickoryError>,
    extract: impl FnOnce(L) -> Vec<T>,
) -> Result<Vec<T>, ResolveError> {
    match r {
        Ok(lookup) => Ok(extract(lookup)),
        Err(e) => match *e.kind() {
            Rek::NoRecordsFound { .. } => Ok(Vec::new()),
            _ => {
                log::debug!("{kind} lookup of {name} failed: {e}");
                Err(ResolveError::new(kind, name, e.to_string()))
            },
        },
    }
}

impl Resolver for HickoryResolver {
    fn query_txt(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        convert(
            QueryType::Txt,
            domain,
            self.inner.txt_lookup(fqdn(domain)),
            |lookup| {
                lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|part| String::from_utf8_lossy(part))
                            .collect::<String>()
                    })
                    .collect()
            },
        )
    }

    fn query_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        convert(
            QueryType::A,
            domain,
            self.inner.ipv4_lookup(fqdn(domain)),
            |lookup| lookup.iter().map(|a| a.0).collect(),
        )
    }

    fn query_aaaa(
        &self,
        domain: &str,
    ) -> Result<Vec<Ipv6Addr>, ResolveError> {
        convert(
            QueryType::Aaaa,
            domain,
            self.inner.ipv6_lookup(fqdn(domain)),
            |lookup| lookup.iter().map(|aaaa| aaaa.0).collect(),
        )
    }

    fn query_mx(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        convert(
            QueryType::Mx,
            domain,
            self.inner.mx_lookup(fqdn(domain)),
            |lookup| {
                lookup.iter().map(|mx| mx.exchange().to_string()).collect()
            },
        )
    }

    fn query_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        convert(
            QueryType::Ptr,
            &ip.to_string(),
            self.inner.reverse_lookup(ip),
            |lookup| lookup.iter().map(|ptr| ptr.0.to_string()).collect(),
        )
    }
}

#[cfg(all(test, feature = "live-network-tests"))]
mod test {
    use super::*;
    use crate::spf::{check_host, SpfResult};

    fn resolver() -> HickoryResolver {
        HickoryResolver::from_config(&ResolverConfig::default()).unwrap()
    }

    #[test]
    fn live_queries() {
        let resolver = resolver();
        assert!(!resolver.query_a("one.one.one.one").unwrap().is_empty());
        assert!(resolver
            .query_txt("gmail.com")
            .unwrap()
            .iter()
            .any(|txt| txt.starts_with("v=spf1")));
        assert_eq!(
            Ok(vec![]),
            resolver.query_mx("nonexistent.invalid.lin.gl"),
        );
    }

    #[test]
    fn live_check_host() {
        let resolver = resolver();
        assert_matches!(
            SpfResult::Fail | SpfResult::SoftFail,
            check_host(
                &resolver,
                "192.0.2.1".parse().unwrap(),
                "gmail.com",
                "someone@gmail.com",
                "mail.example.com",
            ),
        );
    }
}
