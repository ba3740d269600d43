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

//! Expansion of the SPF macro language.
//!
//! RFC 7208 § 7

use std::borrow::Cow;
use std::net::IpAddr;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use thiserror::Error;

/// The characters which may select a split point within a macro.
const DELIMITERS: &[char] = &['.', '-', '+', ',', '/', '_', '='];

/// The identities a macro may refer to. Never modified by expansion.
#[derive(Clone, Copy, Debug)]
pub struct MacroContext<'a> {
    /// The connecting address.
    pub ip: IpAddr,
    /// The domain whose record is currently being evaluated.
    pub domain: &'a str,
    /// The full envelope sender.
    pub sender: &'a str,
    /// The `HELO` identity.
    pub helo: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("isolated percent sign before {0:?}")]
    IsolatedPercent(char),
}

lazy_static! {
    static ref ISOLATED_PERCENT: Regex = Regex::new("%[^{_%}-]").unwrap();
    static ref MACRO_EXPAND: Regex = Regex::new("%\\{([^}]+)\\}").unwrap();
}

/// Expands `pattern` against `ctx`.
///
/// Fails if `pattern` contains a `%` not followed by one of `{`, `_`, `-`,
/// `%`, or `}`. The caller is expected to turn that into `PermError`.
pub fn expand(pattern: &str, ctx: &MacroContext<'_>) -> Result<String, Error> {
    if let Some(m) = ISOLATED_PERCENT.find(pattern) {
        let offender = m.as_str()[1..].chars().next().unwrap_or('%');
        return Err(Error::IsolatedPercent(offender));
    }

    let literal = substitute_escapes(pattern);
    Ok(MACRO_EXPAND
        .replace_all(&literal, |captures: &Captures<'_>| {
            expand_one(&captures[1], ctx)
        })
        .into_owned())
}

/// Replaces `%%`, `%_`, and `%-` in a single left-to-right pass.
fn substitute_escapes(pattern: &str) -> Cow<'_, str> {
    if !pattern.contains('%') {
        return Cow::Borrowed(pattern);
    }

    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        if '%' != ch {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some('%') => out.push('%'),
            Some('_') => out.push(' '),
            Some('-') => out.push_str("%20"),
            _ => {
                out.push('%');
                continue;
            },
        }
        chars.next();
    }

    Cow::Owned(out)
}

/// Expands the body of a single `%{...}` block.
fn expand_one(body: &str, ctx: &MacroContext<'_>) -> String {
    let mut chars = body.chars();
    let value: Cow<'_, str> = match chars.next() {
        Some('i') => Cow::Owned(ctx.ip.to_string()),
        Some('s') => Cow::Borrowed(ctx.sender),
        Some('l') => Cow::Borrowed(sender_parts(ctx.sender).0),
        Some('o') => Cow::Borrowed(sender_parts(ctx.sender).1),
        Some('d') => Cow::Borrowed(ctx.domain),
        Some('v') => Cow::Borrowed(match ctx.ip {
            IpAddr::V4(_) => "in-addr",
            IpAddr::V6(_) => "ip6",
        }),
        Some('h') => Cow::Borrowed(ctx.helo),
        // `p` would need a validated PTR name, which is never resolved for
        // macros, so it expands to nothing like any unknown macro letter.
        _ => Cow::Borrowed(""),
    };

    let mut keep_parts = 0usize;
    let mut reverse = false;
    let mut delimiters = Vec::<char>::new();
    for ch in chars {
        if let Some(digit) = ch.to_digit(10) {
            keep_parts = keep_parts
                .saturating_mul(10)
                .saturating_add(digit as usize);
        } else if 'r' == ch {
            reverse = true;
        } else if DELIMITERS.contains(&ch) {
            delimiters.push(ch);
        }
    }

    if 0 == keep_parts && !reverse && delimiters.is_empty() {
        return value.into_owned();
    }

    if delimiters.is_empty() {
        delimiters.push('.');
    }

    // Splitting is naïve: adjacent delimiters produce empty parts.
    let mut parts = value.split(&delimiters[..]).collect::<Vec<_>>();
    if reverse {
        parts.reverse();
    }

    let skip = if 0 == keep_parts {
        0
    } else {
        parts.len().saturating_sub(keep_parts)
    };
    parts[skip..].iter().join(".")
}

/// Splits the sender into its local part and domain.
///
/// A sender without `@` is all local part.
fn sender_parts(sender: &str) -> (&str, &str) {
    sender.split_once('@').unwrap_or((sender, ""))
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;

    use proptest::prelude::*;

    use super::*;

    fn example_context() -> MacroContext<'static> {
        MacroContext {
            ip: Ipv4Addr::new(192, 0, 2, 3).into(),
            domain: "email.example.com",
            sender: "strong-bad@email.example.com",
            helo: "hello.server",
        }
    }

    fn expand_ok(pattern: &str) -> String {
        expand(pattern, &example_context()).unwrap()
    }

    #[test]
    fn rfc_examples() {
        assert_eq!("strong-bad@email.example.com", expand_ok("%{s}"));
        assert_eq!("email.example.com", expand_ok("%{o}"));
        assert_eq!("email.example.com", expand_ok("%{d}"));
        assert_eq!("email.example.com", expand_ok("%{d4}"));
        assert_eq!("email.example.com", expand_ok("%{d3}"));
        assert_eq!("example.com", expand_ok("%{d2}"));
        assert_eq!("com", expand_ok("%{d1}"));
        assert_eq!("com.example.email", expand_ok("%{dr}"));
        assert_eq!("example.email", expand_ok("%{d2r}"));
        assert_eq!("strong-bad", expand_ok("%{l}"));
        assert_eq!("strong.bad", expand_ok("%{l-}"));
        assert_eq!("strong-bad", expand_ok("%{lr}"));
        assert_eq!("bad.strong", expand_ok("%{lr-}"));
        assert_eq!("strong", expand_ok("%{l1r-}"));
        // Modifiers may come in any order
        assert_eq!("strong", expand_ok("%{l-r1}"));

        assert_eq!(
            "3.2.0.192.in-addr._spf.example.com",
            expand_ok("%{ir}.%{v}._spf.%{d2}"),
        );
        assert_eq!(
            "bad.strong.lp._spf.example.com",
            expand_ok("%{lr-}.lp._spf.%{d2}"),
        );
        assert_eq!(
            "3.2.0.192.in-addr.strong.lp._spf.example.com",
            expand_ok("%{ir}.%{v}.%{l1r-}.lp._spf.%{d2}"),
        );
        assert_eq!(
            "example.com.trusted-domains.example.net",
            expand_ok("%{d2}.trusted-domains.example.net"),
        );
    }

    #[test]
    fn simple_macros() {
        assert_eq!("192.0.2.3", expand_ok("%{i}"));
        assert_eq!("in-addr", expand_ok("%{v}"));
        assert_eq!("hello.server", expand_ok("%{h}"));
        assert_eq!("", expand_ok("%{p}"));
        assert_eq!("x..y", expand_ok("x.%{x}.y"));

        let ctx = MacroContext {
            ip: "2001:db8::cb01".parse().unwrap(),
            domain: "example.org",
            sender: "nobody",
            helo: "",
        };
        assert_eq!("ip6", expand("%{v}", &ctx).unwrap());
        assert_eq!("2001:db8::cb01", expand("%{i}", &ctx).unwrap());
        assert_eq!("nobody", expand("%{l}", &ctx).unwrap());
        assert_eq!("", expand("%{o}", &ctx).unwrap());
    }

    #[test]
    fn delimiters_and_counts() {
        let ctx = MacroContext {
            sender: "a+b=c@x_y.z",
            ..example_context()
        };
        assert_eq!("a.b.c", expand("%{l+=}", &ctx).unwrap());
        assert_eq!("c.b.a", expand("%{lr+=}", &ctx).unwrap());
        assert_eq!("x.y.z", expand("%{o_2}", &ctx).unwrap());
        assert_eq!("y.z", expand("%{o_.2}", &ctx).unwrap());
        assert_eq!("x.y.z", expand("%{o_.}", &ctx).unwrap());
        // A zero count keeps everything
        assert_eq!("email.example.com", expand("%{d0}", &ctx).unwrap());
        // Counts are full decimal numbers
        assert_eq!("email.example.com", expand("%{d12}", &ctx).unwrap());
        // Empty parts survive
        let ctx = MacroContext {
            domain: "a..b",
            ..example_context()
        };
        assert_eq!("b..a", expand("%{dr}", &ctx).unwrap());
        assert_eq!(".b", expand("%{d2}", &ctx).unwrap());
    }

    #[test]
    fn escapes() {
        assert_eq!("100%", expand_ok("100%%"));
        assert_eq!("a b", expand_ok("a%_b"));
        assert_eq!("a%20b", expand_ok("a%-b"));
        assert_eq!("%_", expand_ok("%%_"));
        assert_eq!("%}", expand_ok("%}"));
        assert_eq!("trailing%", expand_ok("trailing%"));
        // Substitution happens before block expansion
        assert_eq!("email.example.com", expand_ok("%%{d}"));
        // Empty or unterminated blocks are left alone
        assert_eq!("%{}", expand_ok("%{}"));
        assert_eq!("%{d", expand_ok("%{d"));
    }

    #[test]
    fn syntax_errors() {
        let ctx = example_context();
        assert_eq!(Err(Error::IsolatedPercent('d')), expand("%d", &ctx));
        assert_eq!(Err(Error::IsolatedPercent('x')), expand("a.%x.b", &ctx));
        // The second percent of a pair is still checked
        assert_eq!(Err(Error::IsolatedPercent('d')), expand("%%d", &ctx));
        assert_eq!(
            Err(Error::IsolatedPercent(' ')),
            expand("%{d} % ", &ctx),
        );
    }

    proptest! {
        #[test]
        fn percent_free_text_is_unchanged(s in "[^%]{0,64}") {
            prop_assert_eq!(&s, &expand_ok(&s));
            let again = expand_ok(&s);
            prop_assert_eq!(&s, &expand_ok(&again));
        }
    }
}
