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

//! Sender Policy Framework (RFC 7208) evaluation.
//!
//! The entry points are `check_host`, for the common case, and `Checker`,
//! which allows the limits, timeout, and HELO identity to be controlled and
//! reports how the verdict was reached.

pub mod directive;
pub mod driver;
pub mod error;
pub mod eval;
pub mod macros;
mod mechanism;
pub mod network;
pub mod record;
pub mod verdict;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use log::info;

pub use self::directive::{Directive, DualCidr, Mechanism, Qualifier};
pub use self::error::{Error, ParseError, PermError, TempError};
pub use self::eval::{Evaluation, Limits, Match};
pub use self::macros::Identity;
pub use self::record::Record;
pub use self::verdict::Verdict;
use crate::support::dns::{fqdn, Name, Resolver};

/// The time allowed for a whole check unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks whether `ip` may send mail for `domain`.
///
/// `sender` is the `MAIL FROM` address; if `None`, `postmaster@<domain>` is
/// used. The default limits and timeout apply, and the HELO domain is
/// `unknown`.
pub async fn check_host<R: Resolver>(
    resolver: &R,
    ip: IpAddr,
    domain: &str,
    sender: Option<&str>,
) -> Verdict {
    Checker::new(resolver).check_host(ip, domain, sender).await
}

/// One request to evaluate SPF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    /// The client IP address.
    pub ip: IpAddr,
    /// The domain whose policy is checked.
    pub domain: String,
    /// The `MAIL FROM` address, if any.
    pub sender: Option<String>,
    /// The `HELO`/`EHLO` domain, if known.
    pub helo: Option<String>,
}

impl Query {
    pub fn new(ip: IpAddr, domain: impl Into<String>) -> Self {
        Self {
            ip,
            domain: domain.into(),
            sender: None,
            helo: None,
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = Some(helo.into());
        self
    }

    /// The identity macros are expanded against.
    pub fn identity(&self) -> Identity {
        Identity::new(
            self.ip,
            &self.domain,
            self.sender.as_deref(),
            self.helo.as_deref(),
        )
    }
}

/// Runs SPF checks through a particular resolver.
///
/// A `Checker` holds no state between checks, so one may be shared by any
/// number of concurrent checks.
pub struct Checker<R> {
    resolver: R,
    limits: Limits,
    timeout: Duration,
}

impl<R: Resolver> Checker<R> {
    pub fn new(resolver: R) -> Self {
        Self {
            resolver,
            limits: Limits::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the deadline for a whole check. A check still waiting for DNS
    /// when it expires is `temperror`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn check_host(
        &self,
        ip: IpAddr,
        domain: &str,
        sender: Option<&str>,
    ) -> Verdict {
        let mut query = Query::new(ip, domain);
        query.sender = sender.map(str::to_owned);
        self.evaluate(&query).await.verdict
    }

    /// Evaluates `query`, reporting how the verdict was reached.
    pub async fn evaluate(&self, query: &Query) -> Evaluation {
        let identity = query.identity();
        // RFC 7208 § 4.3
        let Some(domain) = parse_domain(&query.domain) else {
            info!(
                "SPF {} from {}: none (malformed domain)",
                query.domain, identity.ip,
            );
            return Evaluation::none();
        };

        let deadline = tokio::time::Instant::now() + self.timeout;
        let evaluation = driver::run(
            &self.resolver,
            &identity,
            &self.limits,
            domain,
            deadline,
        )
        .await;

        match evaluation.error {
            None => info!(
                "SPF {} from {}: {}",
                query.domain, identity.ip, evaluation.verdict,
            ),
            Some(ref e) => info!(
                "SPF {} from {}: {} ({e})",
                query.domain, identity.ip, evaluation.verdict,
            ),
        }

        evaluation
    }
}

/// Parses the domain a check starts from. It must be a valid name with at
/// least two labels.
fn parse_domain(domain: &str) -> Option<Arc<Name>> {
    let name = Name::from_ascii(domain).ok()?;
    if name.num_labels() < 2 || name.to_ascii().len() > 254 {
        return None;
    }

    Some(Arc::new(fqdn(name)))
}
