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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::dns::ResolverConfig;
use super::error::Error;
use crate::spf::Limits;

/// The configuration for `spfcheck`.
///
/// This is stored in a TOML file, passed with `--config`. Every section is
/// optional.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SystemConfig {
    /// How DNS queries are made.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Resource limits applied to each check.
    ///
    /// The defaults follow RFC 7208, except that void lookups are not limited
    /// unless `max_void_lookups` is set.
    #[serde(default)]
    pub limits: Limits,

    /// Defaults for the checks themselves.
    #[serde(default)]
    pub check: CheckConfig,

    /// Where logging goes.
    #[serde(default)]
    pub diagnostic: DiagnosticConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CheckConfig {
    /// The time allowed for a whole check, in seconds.
    pub timeout_secs: u64,
    /// The HELO domain to use when none is given.
    pub helo: String,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            helo: "unknown".to_owned(),
        }
    }
}

impl CheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticConfig {
    /// A `log4rs` configuration file. Relative paths are relative to the
    /// directory containing the configuration file.
    ///
    /// If unset, logging goes to standard error.
    pub log_config: Option<PathBuf>,
}

impl SystemConfig {
    /// Loads the configuration from the TOML file at `path`.
    ///
    /// A relative `log_config` is resolved against the directory containing
    /// `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read(path)?;
        let mut config: Self = toml::from_slice(&data)?;

        if let Some(ref mut log_config) = config.diagnostic.log_config {
            if log_config.is_relative() {
                if let Some(parent) = path.parent() {
                    *log_config = parent.join(&*log_config);
                }
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config: SystemConfig = toml::from_str("").unwrap();
        assert_eq!(None, config.resolver.nameserver);
        assert_eq!(5, config.resolver.query_timeout_secs);
        assert_eq!(Limits::default(), config.limits);
        assert_eq!(Duration::from_secs(10), config.check.timeout());
        assert_eq!("unknown", config.check.helo);
        assert_eq!(None, config.diagnostic.log_config);
    }

    #[test]
    fn full_config() {
        let config: SystemConfig = toml::from_str(
            r#"
            [resolver]
            nameserver = "192.0.2.53:53"
            query_timeout_secs = 2

            [limits]
            max_dns_mechanisms = 20
            max_void_lookups = 2

            [check]
            timeout_secs = 30
            helo = "mx.example.com"

            [diagnostic]
            log_config = "logging.toml"
            "#,
        )
        .unwrap();

        assert_eq!(
            Some("192.0.2.53:53".parse().unwrap()),
            config.resolver.nameserver,
        );
        assert_eq!(2, config.resolver.query_timeout_secs);
        assert_eq!(20, config.limits.max_dns_mechanisms);
        assert_eq!(Some(2), config.limits.max_void_lookups);
        assert_eq!(10, config.limits.max_mx_hosts);
        assert_eq!(Duration::from_secs(30), config.check.timeout());
        assert_eq!("mx.example.com", config.check.helo);
        assert_eq!(
            Some(PathBuf::from("logging.toml")),
            config.diagnostic.log_config,
        );
    }

    #[test]
    fn load_resolves_log_config() {
        let dir = std::env::temp_dir()
            .join(format!("spfcheck-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("spfcheck.toml");
        std::fs::write(&path, "[diagnostic]\nlog_config = \"log.toml\"\n")
            .unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(Some(dir.join("log.toml")), config.diagnostic.log_config);

        std::fs::write(&path, "[limits]\nmax_dns_mechanisms = \"ten\"\n")
            .unwrap();
        assert_matches!(Err(Error::Toml(..)), SystemConfig::load(&path));

        std::fs::remove_dir_all(&dir).unwrap();
        assert_matches!(Err(Error::Io(..)), SystemConfig::load(&path));
    }
}
