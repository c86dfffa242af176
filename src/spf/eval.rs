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

//! The policy engine: fetches records, walks their directives in order, and
//! follows `include` and `redirect`.
//!
//! Evaluation is a pure function of the per-check DNS cache. Whenever it needs
//! a record that isn't in the cache yet, it registers the query and keeps
//! going, solely to discover what else it will need. Such a pass produces no
//! result; the driver fills in the cache and runs it again.

use std::sync::Arc;

use hickory_resolver::Name;
use log::debug;
use serde::{Deserialize, Serialize};

use super::directive::Directive;
use super::error::{Error, ParseError, PermError, TempError};
use super::macros::{self, Identity};
use super::mechanism;
use super::record::{self, Record};
use super::verdict::Verdict;
use crate::support::dns::{self, Cache, CacheError};

/// Resource bounds on a single check.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Limits {
    /// The number of `a`, `mx`, `ptr`, `exists`, `include` and `redirect`
    /// terms which may be evaluated (RFC 7208 § 4.6.4).
    pub max_dns_mechanisms: u32,
    /// The number of lookups which may come back empty before the check is
    /// abandoned. Unbounded if `None`; RFC 7208 recommends 2.
    pub max_void_lookups: Option<u32>,
    /// MX mechanisms naming more exchanges than this are an error.
    pub max_mx_hosts: usize,
    /// PTR names beyond this many are ignored.
    pub max_ptr_names: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_dns_mechanisms: 10,
            max_void_lookups: None,
            max_mx_hosts: 10,
            max_ptr_names: 10,
        }
    }
}

/// A directive which produced a terminal result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    /// The domain whose record contains `directive`.
    pub domain: String,
    pub directive: Directive,
}

/// The full outcome of a check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Why the verdict is `permerror` or `temperror`.
    pub error: Option<Error>,
    /// The chain of directives which decided the verdict, innermost first.
    /// For example, an `ip4` inside an included record comes before the
    /// `include` which matched because of it.
    pub matches: Vec<Match>,
    /// The number of DNS-querying terms evaluated.
    pub dns_mechanisms: u32,
    /// The number of primary lookups which found nothing.
    pub void_lookups: u32,
}

impl Evaluation {
    pub(super) fn from_error(error: Error) -> Self {
        Self {
            verdict: match error {
                Error::Perm(..) => Verdict::PermError,
                Error::Temp(..) => Verdict::TempError,
            },
            error: Some(error),
            matches: Vec::new(),
            dns_mechanisms: 0,
            void_lookups: 0,
        }
    }

    pub(super) fn none() -> Self {
        Self {
            verdict: Verdict::None,
            error: None,
            matches: Vec::new(),
            dns_mechanisms: 0,
            void_lookups: 0,
        }
    }
}

/// Everything retained between evaluation passes of one check.
#[derive(Default)]
pub struct Session {
    pub dns: Cache,
    /// Parsed records, keyed by the domain they were fetched for. `None` means
    /// the domain has TXT records but no SPF record.
    records: Vec<(Arc<Name>, Result<Option<Arc<Record>>, PermError>)>,
    /// `(dns_mechanisms, void_lookups)` as of the latest pass, complete or
    /// not.
    usage: (u32, u32),
}

impl Session {
    /// The budget usage of the latest evaluation pass.
    pub fn usage(&self) -> (u32, u32) {
        self.usage
    }
}

/// Why evaluation of a term stopped without a match result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum Halt {
    Perm(PermError),
    Temp(TempError),
    /// A needed DNS answer is not in the cache yet.
    NotReady,
}

impl From<PermError> for Halt {
    fn from(e: PermError) -> Self {
        Self::Perm(e)
    }
}

impl From<TempError> for Halt {
    fn from(e: TempError) -> Self {
        Self::Temp(e)
    }
}

impl From<ParseError> for Halt {
    fn from(e: ParseError) -> Self {
        Self::Perm(PermError::Parse(e))
    }
}

/// Mutable state of one evaluation pass.
///
/// The identity never changes as evaluation recurses; only the domain being
/// evaluated does. The budgets are shared by the whole check and never reset
/// on recursion.
pub(super) struct EvaluationContext<'a> {
    pub(super) identity: &'a Identity,
    pub(super) limits: &'a Limits,
    dns_mechanisms: u32,
    void_lookups: u32,
    pub(super) matches: Vec<Match>,
    /// Set when a term could not be evaluated for lack of DNS data. Any result
    /// of the pass is then bogus.
    skipped: bool,
}

/// Runs one evaluation pass of the check of `domain`.
///
/// Returns `None` if more DNS data is needed, in which case `New` entries will
/// have been added to `session.dns`.
pub fn evaluate(
    identity: &Identity,
    limits: &Limits,
    session: &mut Session,
    domain: Arc<Name>,
) -> Option<Evaluation> {
    let mut ctx = EvaluationContext {
        identity,
        limits,
        dns_mechanisms: 0,
        void_lookups: 0,
        matches: Vec::new(),
        skipped: false,
    };

    let result = ctx.check_host(session, domain, true);
    session.usage = (ctx.dns_mechanisms, ctx.void_lookups);
    if ctx.skipped || matches!(result, Err(Halt::NotReady)) {
        debug!(
            "SPF pass incomplete after {} DNS terms",
            ctx.dns_mechanisms,
        );
        return None;
    }

    let (verdict, error) = match result {
        Ok(verdict) => (verdict, None),
        Err(Halt::Perm(e)) => (Verdict::PermError, Some(Error::Perm(e))),
        Err(Halt::Temp(e)) => (Verdict::TempError, Some(Error::Temp(e))),
        Err(Halt::NotReady) => return None,
    };

    Some(Evaluation {
        verdict,
        error,
        matches: ctx.matches,
        dns_mechanisms: ctx.dns_mechanisms,
        void_lookups: ctx.void_lookups,
    })
}

impl EvaluationContext<'_> {
    /// Evaluates the record at `domain`, following its `redirect` if nothing
    /// matches.
    ///
    /// Only returns the non-error verdicts; errors come back as `Halt`.
    /// `top_level` is preserved across `redirect`, so a top-level check which
    /// redirects to a domain without a record is `none`.
    pub(super) fn check_host(
        &mut self,
        session: &mut Session,
        domain: Arc<Name>,
        top_level: bool,
    ) -> Result<Verdict, Halt> {
        let Some(record) = self.fetch_record(session, &domain)? else {
            return if top_level {
                Ok(Verdict::None)
            } else {
                Err(PermError::NoRecord(domain.to_string()).into())
            };
        };

        for directive in &record.directives {
            match mechanism::evaluate(self, session, &record.domain, directive)
            {
                Ok(false) => {},
                Ok(true) => {
                    self.matches.push(Match {
                        domain: record.domain.to_string(),
                        directive: directive.clone(),
                    });
                    return Ok(directive.qualifier.into());
                },
                // Keep going to discover more queries. The result of this
                // pass will be discarded.
                Err(Halt::NotReady) => self.skipped = true,
                Err(e) => return Err(e),
            }
        }

        let Some(target) = record.effective_redirect() else {
            // RFC 7208 § 4.7
            return Ok(Verdict::Neutral);
        };

        // The budget is the only thing which stops a record redirecting to
        // itself forever.
        self.use_dns_mechanism()?;
        let target = self.target_domain(session, Some(target), &domain)?;
        self.check_host(session, target, top_level)
    }

    /// Finds and parses the SPF record at `domain`.
    ///
    /// Returns `None` if there is no SPF record there.
    fn fetch_record(
        &mut self,
        session: &mut Session,
        domain: &Arc<Name>,
    ) -> Result<Option<Arc<Record>>, Halt> {
        if let Some((_, memo)) =
            session.records.iter().find(|(d, _)| **d == **domain)
        {
            return memo.clone().map_err(Halt::Perm);
        }

        let txt = match dns::look_up(&mut session.dns.txt, domain) {
            Ok(txt) => txt.clone(),
            Err(CacheError::NotReady) => return Err(Halt::NotReady),
            Err(CacheError::Error) => {
                return Err(TempError::Dns(domain.to_string()).into())
            },
            Err(CacheError::NotFound) => {
                // The initial lookup isn't on behalf of any term, so it
                // isn't a void lookup.
                if self.dns_mechanisms > 0 {
                    self.note_void_lookup()?;
                }
                return Ok(None);
            },
        };

        let parsed = record::select(&txt, domain).and_then(|txt| {
            txt.map(|txt| Record::parse(txt, Arc::clone(domain)))
                .transpose()
                .map(|r| r.map(Arc::new))
                .map_err(PermError::from)
        });
        if let Err(ref e) = parsed {
            debug!("SPF record for {domain} is unusable: {e}");
        }

        session
            .records
            .push((Arc::clone(domain), parsed.clone()));
        parsed.map_err(Halt::Perm)
    }

    /// Consumes one unit of the DNS term budget.
    pub(super) fn use_dns_mechanism(&mut self) -> Result<(), Halt> {
        if self.dns_mechanisms >= self.limits.max_dns_mechanisms {
            return Err(PermError::QueryLimit.into());
        }

        self.dns_mechanisms += 1;
        Ok(())
    }

    /// Records that a primary lookup found nothing.
    pub(super) fn note_void_lookup(&mut self) -> Result<(), Halt> {
        self.void_lookups += 1;
        match self.limits.max_void_lookups {
            Some(max) if self.void_lookups > max => {
                Err(PermError::VoidLookupLimit.into())
            },
            _ => Ok(()),
        }
    }

    /// Resolves the `domain-spec` of a term, which defaults to the domain of
    /// the current record.
    pub(super) fn target_domain(
        &self,
        session: &mut Session,
        spec: Option<&str>,
        current: &Arc<Name>,
    ) -> Result<Arc<Name>, Halt> {
        let Some(spec) = spec else {
            return Ok(Arc::clone(current));
        };

        let expanded = macros::expand_domain(spec, self.identity, current)?;
        // An empty expansion would otherwise become the root.
        if expanded.trim_end_matches('.').is_empty() {
            return Err(PermError::InvalidDomain(expanded).into());
        }
        session
            .dns
            .intern_domain(&expanded)
            .ok_or_else(|| PermError::InvalidDomain(expanded).into())
    }
}
