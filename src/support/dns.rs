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

//! The name-resolution collaborator used by SPF evaluation.
//!
//! The engine only ever talks to DNS through [`Resolver`]. Transport,
//! retries, timeouts, and choice of server all live behind that trait.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

/// A failed query. Any such failure is treated as a temporary error by the
/// evaluator.
///
/// A query which succeeded but found nothing is *not* an error; resolvers
/// return an empty result set for that case.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} query for {name} failed: {reason}")]
pub struct ResolveError {
    pub kind: QueryType,
    pub name: String,
    pub reason: String,
}

impl ResolveError {
    pub fn new(
        kind: QueryType,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
    Txt,
    A,
    Aaaa,
    Mx,
    Ptr,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Txt => "TXT",
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Mx => "MX",
            Self::Ptr => "PTR",
        })
    }
}

/// Synchronous DNS lookups as needed by SPF evaluation.
///
/// Every call blocks until the query completes or fails.
pub trait Resolver {
    /// Returns each TXT record as a single string, with its character
    /// strings concatenated.
    fn query_txt(&self, domain: &str) -> Result<Vec<String>, ResolveError>;
    fn query_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>, ResolveError>;
    fn query_aaaa(&self, domain: &str)
        -> Result<Vec<Ipv6Addr>, ResolveError>;
    /// Returns the exchange host names, in the order the server gave them.
    fn query_mx(&self, domain: &str) -> Result<Vec<String>, ResolveError>;
    fn query_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError>;
}

impl<R: Resolver + ?Sized> Resolver for &R {
    fn query_txt(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        (**self).query_txt(domain)
    }

    fn query_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        (**self).query_a(domain)
    }

    fn query_aaaa(
        &self,
        domain: &str,
    ) -> Result<Vec<Ipv6Addr>, ResolveError> {
        (**self).query_aaaa(domain)
    }

    fn query_mx(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        (**self).query_mx(domain)
    }

    fn query_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        (**self).query_ptr(ip)
    }
}

/// A query issued against a [`StaticResolver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub kind: QueryType,
    pub name: String,
}

/// An in-memory zone.
///
/// Names are matched case-insensitively and without regard to a trailing
/// dot. Names with no data of the requested type give an empty result.
///
/// Every query is recorded, in order, and can be inspected with
/// [`queries`](Self::queries). Not `Sync`; each thread needs its own.
#[derive(Debug, Default)]
pub struct StaticResolver {
    txt: HashMap<String, Vec<String>>,
    a: HashMap<String, Vec<Ipv4Addr>>,
    aaaa: HashMap<String, Vec<Ipv6Addr>>,
    mx: HashMap<String, Vec<String>>,
    ptr: HashMap<IpAddr, Vec<String>>,
    failures: HashSet<(QueryType, String)>,
    log: RefCell<Vec<Query>>,
}

/// Normalises `name` for use as a key.
fn key(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_txt<S: Into<String>>(
        mut self,
        domain: &str,
        records: impl IntoIterator<Item = S>,
    ) -> Self {
        self.txt
            .entry(key(domain))
            .or_default()
            .extend(records.into_iter().map(Into::into));
        self
    }

    pub fn with_a(
        mut self,
        domain: &str,
        addrs: impl IntoIterator<Item = Ipv4Addr>,
    ) -> Self {
        self.a.entry(key(domain)).or_default().extend(addrs);
        self
    }

    pub fn with_aaaa(
        mut self,
        domain: &str,
        addrs: impl IntoIterator<Item = Ipv6Addr>,
    ) -> Self {
        self.aaaa.entry(key(domain)).or_default().extend(addrs);
        self
    }

    pub fn with_mx<S: Into<String>>(
        mut self,
        domain: &str,
        hosts: impl IntoIterator<Item = S>,
    ) -> Self {
        self.mx
            .entry(key(domain))
            .or_default()
            .extend(hosts.into_iter().map(Into::into));
        self
    }

    pub fn with_ptr<S: Into<String>>(
        mut self,
        ip: IpAddr,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.ptr
            .entry(ip)
            .or_default()
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Makes queries of `kind` for `name` fail.
    ///
    /// For `QueryType::Ptr`, `name` is the textual form of the address.
    pub fn with_failure(mut self, kind: QueryType, name: &str) -> Self {
        self.failures.insert((kind, key(name)));
        self
    }

    /// All queries issued so far, oldest first.
    pub fn queries(&self) -> Vec<Query> {
        self.log.borrow().clone()
    }

    /// The number of queries of `kind` issued so far.
    pub fn query_count(&self, kind: QueryType) -> usize {
        self.log.borrow().iter().filter(|q| q.kind == kind).count()
    }

    fn look_up<K, T>(
        &self,
        kind: QueryType,
        name: &str,
        table: &HashMap<K, Vec<T>>,
        table_key: &K,
    ) -> Result<Vec<T>, ResolveError>
    where
        K: std::hash::Hash + Eq,
        T: Clone,
    {
        let name = key(name);
        self.log.borrow_mut().push(Query {
            kind,
            name: name.clone(),
        });

        if self.failures.contains(&(kind, name.clone())) {
            return Err(ResolveError::new(kind, name, "SERVFAIL"));
        }

        Ok(table.get(table_key).cloned().unwrap_or_default())
    }
}

impl Resolver for StaticResolver {
    fn query_txt(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        self.look_up(QueryType::Txt, domain, &self.txt, &key(domain))
    }

    fn query_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>, ResolveError> {
        self.look_up(QueryType::A, domain, &self.a, &key(domain))
    }

    fn query_aaaa(
        &self,
        domain: &str,
    ) -> Result<Vec<Ipv6Addr>, ResolveError> {
        self.look_up(QueryType::Aaaa, domain, &self.aaaa, &key(domain))
    }

    fn query_mx(&self, domain: &str) -> Result<Vec<String>, ResolveError> {
        self.look_up(QueryType::Mx, domain, &self.mx, &key(domain))
    }

    fn query_ptr(&self, ip: IpAddr) -> Result<Vec<String>, ResolveError> {
        self.look_up(QueryType::Ptr, &ip.to_string(), &self.ptr, &ip)
    }
}
