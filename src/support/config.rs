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

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid resolver configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("attempts must be at least 1")]
    NoAttempts,
    #[error("timeout_secs must be at least 1")]
    NoTimeout,
}

/// Configuration for the DNS resolver used to evaluate SPF policies.
///
/// Typically loaded from a `[resolver]`-style TOML table. Every field has a
/// default, so an empty document is a valid configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// The DNS server to send queries to, as `address:port`.
    ///
    /// Ignored when `use_system_config` is true.
    pub server: SocketAddr,
    /// How long to wait for any one response, in seconds. Must not be 0.
    pub timeout_secs: u64,
    /// How many times to try each query before giving up. Must not be 0.
    pub attempts: usize,
    /// If true, read the name servers from the host's resolver
    /// configuration (e.g. `/etc/resolv.conf`) instead of using `server`.
    pub use_system_config: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([8, 8, 8, 8], 53)),
            timeout_secs: 5,
            attempts: 2,
            use_system_config: false,
        }
    }
}

impl ResolverConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(s)?;
        if 0 == config.attempts {
            return Err(Error::NoAttempts);
        }
        if 0 == config.timeout_secs {
            return Err(Error::NoTimeout);
        }

        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = ResolverConfig::from_toml_str("").unwrap();
        assert_eq!(ResolverConfig::default(), config);
        assert_eq!("8.8.8.8:53", config.server.to_string());
        assert_eq!(Duration::from_secs(5), config.timeout());
        assert_eq!(2, config.attempts);
        assert!(!config.use_system_config);
    }

    #[test]
    fn explicit_values() {
        let config = ResolverConfig::from_toml_str(
            r#"
server = "[2001:db8::53]:5353"
timeout_secs = 1
attempts = 4
"#,
        )
        .unwrap();
        assert_eq!("[2001:db8::53]:5353", config.server.to_string());
        assert_eq!(Duration::from_secs(1), config.timeout());
        assert_eq!(4, config.attempts);
    }

    #[test]
    fn bad_configs() {
        assert_matches!(
            Err(Error::Toml(_)),
            ResolverConfig::from_toml_str("nameserver = \"1.1.1.1:53\"")
        );
        assert_matches!(
            Err(Error::Toml(_)),
            ResolverConfig::from_toml_str("server = \"not an address\"")
        );
        assert_matches!(
            Err(Error::NoAttempts),
            ResolverConfig::from_toml_str("attempts = 0")
        );
        assert_matches!(
            Err(Error::NoTimeout),
            ResolverConfig::from_toml_str("timeout_secs = 0")
        );
    }
}
