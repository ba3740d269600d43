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

//! The syntax for SPF TXT records.
//!
//! Parsing is deliberately lenient: tokens which are neither a directive nor
//! a modifier are dropped rather than failing the whole record, and no
//! semantic validation of parameters is done here.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

/// The version tag which starts every SPF record.
pub const VERSION: &str = "v=spf1";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
    Directive(Directive),
    Modifier(Modifier),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    pub qualifier: Qualifier,
    pub mechanism: Mechanism,
    /// Everything after the `:`, or the bare CIDR suffix of forms like
    /// `a/24`. Empty if the directive has no parameter.
    pub param: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modifier {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mechanism {
    All,
    Include,
    A,
    Mx,
    Ptr,
    Ip4,
    Ip6,
    Exists,
}

impl Qualifier {
    /// Interprets the qualifier prefix of a directive.
    ///
    /// This is total: the empty string, `+`, and anything unrecognised all
    /// mean `Pass`.
    pub fn from_prefix(prefix: &str) -> Self {
        match prefix {
            "-" => Self::Fail,
            "~" => Self::SoftFail,
            "?" => Self::Neutral,
            _ => Self::Pass,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Pass => "",
            Self::Fail => "-",
            Self::SoftFail => "~",
            Self::Neutral => "?",
        }
    }
}

impl Mechanism {
    fn from_name(name: &str) -> Option<Self> {
        [
            Self::All,
            Self::Include,
            Self::A,
            Self::Mx,
            Self::Ptr,
            Self::Ip4,
            Self::Ip6,
            Self::Exists,
        ]
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Include => "include",
            Self::A => "a",
            Self::Mx => "mx",
            Self::Ptr => "ptr",
            Self::Ip4 => "ip4",
            Self::Ip6 => "ip6",
            Self::Exists => "exists",
        }
    }
}

impl Modifier {
    pub fn is_redirect(&self) -> bool {
        self.name.eq_ignore_ascii_case("redirect")
    }

    pub fn is_explanation(&self) -> bool {
        self.name.eq_ignore_ascii_case("exp")
    }
}

lazy_static! {
    static ref DIRECTIVE: Regex = Regex::new(
        "(?i)^([+~?-])?(all|include|a|mx|ptr|ip4|ip6|exists)(?::(.*))?$",
    )
    .unwrap();
    // The a and mx mechanisms can take a CIDR without any domain.
    static ref BARE_CIDR_DIRECTIVE: Regex =
        Regex::new("(?i)^([+~?-])?(a|mx)(/.*)$").unwrap();
    static ref MODIFIER: Regex =
        Regex::new("(?i)^([a-z0-9._-]+)=(.*)$").unwrap();
    static ref DUAL_CIDR: Regex =
        Regex::new("^(.*?)(?:/([0-9]+))?(?://([0-9]+))?$").unwrap();
}

impl Term {
    /// Classifies a single whitespace-free token.
    ///
    /// Returns `None` if the token is neither a directive nor a modifier.
    pub fn parse(word: &str) -> Option<Self> {
        let directive = DIRECTIVE
            .captures(word)
            .or_else(|| BARE_CIDR_DIRECTIVE.captures(word));
        if let Some(captures) = directive {
            let mechanism = Mechanism::from_name(&captures[2])?;
            return Some(Self::Directive(Directive {
                qualifier: Qualifier::from_prefix(
                    captures.get(1).map_or("", |m| m.as_str()),
                ),
                mechanism,
                param: captures
                    .get(3)
                    .map_or_else(String::new, |m| m.as_str().to_owned()),
            }));
        }

        MODIFIER.captures(word).map(|captures| {
            Self::Modifier(Modifier {
                name: captures[1].to_owned(),
                value: captures[2].to_owned(),
            })
        })
    }
}

/// Splits an SPF record into its terms, preserving their order.
///
/// A leading `v=spf1` tag is removed if present.
pub fn parse_record(record: &str) -> Vec<Term> {
    let record = record.trim();
    let body = match record.get(..VERSION.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(VERSION) => {
            &record[VERSION.len()..]
        },
        _ => record,
    };

    body.split_whitespace().filter_map(Term::parse).collect()
}

impl Directive {
    /// The domain part of the parameter, with any CIDR suffix removed.
    ///
    /// `None` if there is no explicit domain, in which case the domain under
    /// evaluation applies.
    pub fn domain_spec(&self) -> Option<&str> {
        Some(self.split_cidr().0).filter(|d| !d.is_empty())
    }

    /// The IPv4 and IPv6 prefix lengths given by a trailing `/n`, `//m`, or
    /// `/n//m` on the parameter.
    ///
    /// The lengths are not validated; an out-of-range length simply never
    /// matches anything.
    pub fn cidr_lengths(&self) -> (Option<&str>, Option<&str>) {
        let (_, v4, v6) = self.split_cidr();
        (v4, v6)
    }

    fn split_cidr(&self) -> (&str, Option<&str>, Option<&str>) {
        match DUAL_CIDR.captures(&self.param) {
            Some(captures) => (
                captures.get(1).map_or("", |m| m.as_str()),
                captures.get(2).map(|m| m.as_str()),
                captures.get(3).map(|m| m.as_str()),
            ),
            None => (&self.param, None, None),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.qualifier.prefix(), self.mechanism.name())?;
        if self.param.starts_with('/') {
            write!(f, "{}", self.param)
        } else if !self.param.is_empty() {
            write!(f, ":{}", self.param)
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Directive(ref d) => d.fmt(f),
            Self::Modifier(ref m) => m.fmt(f),
        }
    }
}
