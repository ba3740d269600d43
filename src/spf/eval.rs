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

//! The recursive SPF evaluator.
//!
//! Evaluation walks the terms of a record in order. Mechanisms which need
//! DNS data query the resolver synchronously; `include` and `redirect`
//! recurse into the record of another domain. A single lookup budget is
//! shared by the whole recursive evaluation.

use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use log::{debug, info, warn};
use thiserror::Error;

use super::addr::{canonical_ip, match_address};
use super::macros::{self, MacroContext};
use super::record::retrieve;
use super::syntax::{parse_record, Directive, Mechanism, Qualifier, Term};
use crate::support::dns::Resolver;

/// The maximum number of `a`-style address lookups (one per `a` directive
/// and one per host of an `mx` directive) across one whole evaluation.
///
/// Any further lookup yields `PermError`.
pub const MAX_DNS_LOOKUPS: u32 = 10;
/// The maximum number of records which may be evaluated at once via nested
/// `include` and `redirect` terms.
pub const MAX_RECURSION_DEPTH: u32 = 32;

/// The SPF verdicts.
///
/// RFC 7208 § 2.6
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpfResult {
    /// No policy applies, or nothing in the policy reached a decision.
    None,
    Neutral,
    Pass,
    Fail,
    SoftFail,
    /// A DNS query failed. The check may succeed if retried later.
    TempError,
    /// The policy is broken or too expensive to evaluate. Retrying will not
    /// help.
    PermError,
}

impl SpfResult {
    /// The lowercase name used in `Received-SPF` and
    /// `Authentication-Results` headers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Neutral => "neutral",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::SoftFail => "softfail",
            Self::TempError => "temperror",
            Self::PermError => "permerror",
        }
    }
}

impl fmt::Display for SpfResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown SPF result {0:?}")]
pub struct UnknownResult(pub String);

impl FromStr for SpfResult {
    type Err = UnknownResult;

    fn from_str(s: &str) -> Result<Self, UnknownResult> {
        [
            Self::None,
            Self::Neutral,
            Self::Pass,
            Self::Fail,
            Self::SoftFail,
            Self::TempError,
            Self::PermError,
        ]
        .into_iter()
        .find(|r| r.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| UnknownResult(s.to_owned()))
    }
}

impl From<Qualifier> for SpfResult {
    fn from(q: Qualifier) -> Self {
        match q {
            Qualifier::Pass => Self::Pass,
            Qualifier::Fail => Self::Fail,
            Qualifier::SoftFail => Self::SoftFail,
            Qualifier::Neutral => Self::Neutral,
        }
    }
}

/// Determines whether `ip` may send mail on behalf of `domain`.
///
/// `sender` is the envelope sender (`MAIL FROM`). If empty, it is taken to
/// be `postmaster@{helo}`. `helo` is the `HELO`/`EHLO` identity.
///
/// Every DNS query goes through `resolver` and blocks until it completes.
/// Failures are reported through the verdict rather than as errors.
pub fn check_host<R: Resolver + ?Sized>(
    resolver: &R,
    ip: IpAddr,
    domain: &str,
    sender: &str,
    helo: &str,
) -> SpfResult {
    let sender = if sender.is_empty() {
        Cow::Owned(format!("postmaster@{helo}"))
    } else {
        Cow::Borrowed(sender)
    };

    let mut evaluator = EvaluatorState {
        resolver,
        ip: canonical_ip(ip),
        sender: &sender,
        helo,
        dns_lookups: 0,
        depth: 0,
    };

    let result = evaluator.check_host(domain);
    info!("SPF {result}: {ip} sending for {domain} as {sender}");
    result
}

/// Mutable state carried through a single top-level evaluation.
///
/// Nested evaluations borrow the same state, so the lookup budget is never
/// reset on recursion.
struct EvaluatorState<'a, R: ?Sized> {
    resolver: &'a R,
    /// The connecting address, with IPv4-mapped addresses made plain IPv4.
    ip: IpAddr,
    sender: &'a str,
    helo: &'a str,
    /// The number of budgeted address lookups performed so far.
    dns_lookups: u32,
    /// The number of records currently being evaluated.
    depth: u32,
}

impl<R: Resolver + ?Sized> EvaluatorState<'_, R> {
    fn check_host(&mut self, domain: &str) -> SpfResult {
        if self.depth >= MAX_RECURSION_DEPTH {
            warn!(
                "SPF evaluation of {domain} exceeded {MAX_RECURSION_DEPTH} \
                 nested records"
            );
            return SpfResult::PermError;
        }

        self.depth += 1;
        let result = self.eval_record(domain);
        self.depth -= 1;
        result
    }

    fn eval_record(&mut self, domain: &str) -> SpfResult {
        let record = match retrieve(self.resolver, domain) {
            Ok(record) => record,
            Err(result) => return result,
        };

        let mut default = SpfResult::None;
        for term in parse_record(&record) {
            match term {
                Term::Directive(ref directive) => {
                    let result = match self.eval_directive(domain, directive) {
                        Ok(result) | Err(result) => result,
                    };
                    debug!("{domain}: {directive} => {result}");

                    if Mechanism::All == directive.mechanism {
                        return result;
                    }

                    match result {
                        SpfResult::Pass | SpfResult::PermError => {
                            return result
                        },
                        SpfResult::TempError => default = result,
                        _ => default = SpfResult::Neutral,
                    }
                },

                Term::Modifier(ref modifier) if modifier.is_redirect() => {
                    let target =
                        match self.expand_domain(domain, &modifier.value) {
                            Ok(target) => target,
                            Err(result) => return result,
                        };

                    debug!("{domain}: redirect to {target}");
                    return self.check_host(&target);
                },

                // Explanations are never generated.
                Term::Modifier(ref modifier) if modifier.is_explanation() => {},

                Term::Modifier(_) => {},
            }
        }

        default
    }

    /// Evaluates one directive of the record for `domain`.
    ///
    /// `Err` carries a result which was reached before the mechanism itself
    /// could be evaluated, such as a macro syntax error.
    fn eval_directive(
        &mut self,
        domain: &str,
        directive: &Directive,
    ) -> Result<SpfResult, SpfResult> {
        let qualifier = directive.qualifier;
        Ok(match directive.mechanism {
            Mechanism::All => qualifier.into(),
            Mechanism::A => {
                let target = self.target_domain(domain, directive)?;
                self.match_host(&target, directive)
            },
            Mechanism::Mx => {
                let target = self.target_domain(domain, directive)?;
                self.eval_mx(&target, directive)
            },
            Mechanism::Include => {
                let target = self.target_domain(domain, directive)?;
                self.check_host(&target)
            },
            Mechanism::Ptr => {
                let target = self.target_domain(domain, directive)?;
                self.eval_ptr(&target, qualifier)
            },
            Mechanism::Ip4 if self.ip.is_ipv4() => {
                match_address(self.ip, &directive.param, qualifier)
            },
            Mechanism::Ip6 if self.ip.is_ipv6() => {
                match_address(self.ip, &directive.param, qualifier)
            },
            Mechanism::Ip4 | Mechanism::Ip6 => SpfResult::None,
            Mechanism::Exists => {
                let target = self.expand_domain(domain, &directive.param)?;
                self.eval_exists(&target)
            },
        })
    }

    /// Consumes one unit of the lookup budget.
    fn incr_dns_lookup(&mut self) -> Result<(), SpfResult> {
        if self.dns_lookups >= MAX_DNS_LOOKUPS {
            warn!("SPF evaluation exceeded {MAX_DNS_LOOKUPS} DNS lookups");
            return Err(SpfResult::PermError);
        }

        self.dns_lookups += 1;
        Ok(())
    }

    /// Matches the connecting address against the addresses of `host` as
    /// the `a` mechanism does.
    ///
    /// Returns the directive's qualifier on a match and `Neutral` otherwise.
    fn match_host(&mut self, host: &str, directive: &Directive) -> SpfResult {
        if let Err(result) = self.incr_dns_lookup() {
            return result;
        }

        let (ipv4_cidr_len, ipv6_cidr_len) = directive.cidr_lengths();
        let (addrs, cidr_len) = match self.ip {
            IpAddr::V4(_) => (
                self.resolver
                    .query_a(host)
                    .map(|addrs| {
                        addrs.into_iter().map(IpAddr::V4).collect::<Vec<_>>()
                    }),
                ipv4_cidr_len,
            ),
            IpAddr::V6(_) => (
                self.resolver
                    .query_aaaa(host)
                    .map(|addrs| {
                        addrs.into_iter().map(IpAddr::V6).collect::<Vec<_>>()
                    }),
                ipv6_cidr_len,
            ),
        };

        let addrs = match addrs {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("{e}");
                return SpfResult::TempError;
            },
        };

        for addr in addrs {
            let spec = match cidr_len {
                Some(len) => format!("{addr}/{len}"),
                None => addr.to_string(),
            };

            let result = match_address(self.ip, &spec, directive.qualifier);
            if SpfResult::Neutral != result {
                return result;
            }
        }

        SpfResult::Neutral
    }

    fn eval_mx(&mut self, domain: &str, directive: &Directive) -> SpfResult {
        let hosts = match self.resolver.query_mx(domain) {
            Ok(hosts) => hosts,
            Err(e) => {
                debug!("{e}");
                return SpfResult::TempError;
            },
        };

        let mut result = SpfResult::None;
        for host in hosts {
            let r = self.match_host(&host, directive);
            match r {
                SpfResult::Pass | SpfResult::Fail | SpfResult::PermError => {
                    return r
                },
                // Remember DNS failures but keep looking in case a later
                // host matches.
                SpfResult::TempError => result = SpfResult::TempError,
                _ => {},
            }
        }

        result
    }

    fn eval_ptr(&mut self, domain: &str, qualifier: Qualifier) -> SpfResult {
        let names = match self.resolver.query_ptr(self.ip) {
            Ok(names) => names,
            Err(e) => {
                debug!("{e}");
                return SpfResult::TempError;
            },
        };

        // A name is only validated if it resolves to at least one address of
        // the connecting address's family.
        let mut validated = Vec::with_capacity(names.len());
        for name in names {
            let forward = match self.ip {
                IpAddr::V4(_) => {
                    self.resolver.query_a(&name).map(|a| !a.is_empty())
                },
                IpAddr::V6(_) => {
                    self.resolver.query_aaaa(&name).map(|a| !a.is_empty())
                },
            };

            match forward {
                Ok(true) => validated.push(name),
                Ok(false) => {},
                Err(e) => {
                    debug!("{e}");
                    return SpfResult::TempError;
                },
            }
        }

        if validated.iter().any(|name| same_domain(name, domain)) {
            qualifier.into()
        } else {
            SpfResult::None
        }
    }

    fn eval_exists(&self, domain: &str) -> SpfResult {
        // Query failures are treated the same as an empty response.
        match self.resolver.query_a(domain) {
            Ok(addrs) if !addrs.is_empty() => SpfResult::Pass,
            _ => SpfResult::None,
        }
    }

    /// The domain a directive applies to: its own domain-spec, expanded, or
    /// else the domain under evaluation.
    fn target_domain(
        &self,
        domain: &str,
        directive: &Directive,
    ) -> Result<String, SpfResult> {
        match directive.domain_spec() {
            Some(spec) => self.expand_domain(domain, spec),
            None => Ok(domain.to_owned()),
        }
    }

    fn expand_domain(
        &self,
        domain: &str,
        spec: &str,
    ) -> Result<String, SpfResult> {
        let ctx = MacroContext {
            ip: self.ip,
            domain,
            sender: self.sender,
            helo: self.helo,
        };

        macros::expand(spec, &ctx).map_err(|e| {
            debug!("{domain}: bad macro string {spec:?}: {e}");
            SpfResult::PermError
        })
    }
}

/// Compares two domain names case-insensitively, ignoring any trailing dot.
fn same_domain(a: &str, b: &str) -> bool {
    let a = a.strip_suffix('.').unwrap_or(a);
    let b = b.strip_suffix('.').unwrap_or(b);
    a.eq_ignore_ascii_case(b)
}
