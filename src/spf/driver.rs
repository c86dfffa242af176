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

use std::sync::Arc;

use futures::future::join_all;
use hickory_resolver::Name;
use log::{debug, warn};

use super::error::TempError;
use super::eval::{evaluate, Evaluation, Limits, Session};
use super::macros::Identity;
use crate::support::dns::Resolver;

/// Runs SPF evaluation of `domain` to completion.
///
/// Each round, every lookup the evaluator discovered is made concurrently
/// through `resolver`, and evaluation is re-run once they have all come back.
///
/// `run` gives up at `deadline`, abandoning any lookups still in flight, and
/// reports `temperror`.
pub async fn run<R: Resolver>(
    resolver: &R,
    identity: &Identity,
    limits: &Limits,
    domain: Arc<Name>,
    deadline: tokio::time::Instant,
) -> Evaluation {
    let mut session = Session::default();

    for round in 0.. {
        if let Some(evaluation) =
            evaluate(identity, limits, &mut session, Arc::clone(&domain))
        {
            debug!("SPF evaluation of {domain} finished after {round} rounds");
            return evaluation;
        }

        let queries = session.dns.take_new();
        if queries.is_empty() {
            // Can only happen if the evaluator is waiting on something which
            // was never registered.
            warn!("SPF evaluation of {domain} stalled without new queries");
            return abandoned(&session, TempError::Dns(domain.to_string()));
        }

        debug!(
            "SPF round {round} for {domain}: {} DNS queries",
            queries.len(),
        );

        let lookups = queries
            .iter()
            .map(|(name, query_type)| resolver.resolve(name, *query_type));
        let Ok(answers) =
            tokio::time::timeout_at(deadline, join_all(lookups)).await
        else {
            warn!("SPF evaluation of {domain} timed out");
            return abandoned(&session, TempError::Deadline);
        };

        for ((name, query_type), answer) in queries.iter().zip(answers) {
            session.dns.complete(name, *query_type, answer);
        }
    }

    // Unreachable
    Evaluation::from_error(TempError::Deadline.into())
}

/// The result of giving up on an evaluation, reporting the budget usage of
/// the last pass made.
fn abandoned(session: &Session, error: TempError) -> Evaluation {
    let mut evaluation = Evaluation::from_error(error.into());
    (evaluation.dns_mechanisms, evaluation.void_lookups) = session.usage();
    evaluation
}
