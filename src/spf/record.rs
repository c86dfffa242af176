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

//! Parsing of a complete SPF TXT record.
//!
//! RFC 7208 § 4.5, 4.6, 6

use std::fmt;
use std::sync::Arc;

use hickory_resolver::Name;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use super::directive::{Directive, Mechanism};
use super::error::{ParseError, PermError};
use super::macros::MacroString;

const HEADER: &str = "v=spf1 ";
const VERSION: &str = "v=spf1";

/// A domain's parsed SPF policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// The domain the TXT record was fetched for.
    pub domain: Arc<Name>,
    /// The directives, in the order they must be evaluated.
    pub directives: Vec<Directive>,
    /// The unexpanded target of the `redirect` modifier, if any.
    pub redirect: Option<String>,
}

impl Record {
    /// Parses `txt` as the SPF record of `domain`.
    ///
    /// Modifiers other than `redirect` are accepted and discarded. A record
    /// must have at least one directive or a `redirect`.
    pub fn parse(txt: &str, domain: Arc<Name>) -> Result<Self, ParseError> {
        lazy_static! {
            static ref MODIFIER: Regex =
                Regex::new("^([a-zA-Z][a-zA-Z0-9._-]*)=(.*)$").unwrap();
        }

        let body = txt
            .strip_prefix(HEADER)
            .ok_or(ParseError::MissingHeader)?;

        let mut directives = Vec::new();
        let mut redirect = None::<String>;
        let mut has_exp = false;

        for word in body.split(' ').filter(|w| !w.is_empty()) {
            let Some(modifier) = MODIFIER.captures(word) else {
                directives.push(Directive::parse(word)?);
                continue;
            };

            let name = &modifier[1];
            let value = &modifier[2];
            if name.eq_ignore_ascii_case("redirect") {
                if redirect.is_some() {
                    return Err(ParseError::DuplicateModifier("redirect"));
                }
                if value.is_empty() {
                    return Err(ParseError::EmptyModifier("redirect"));
                }
                MacroString::new(value).validate()?;
                redirect = Some(value.to_owned());
            } else if name.eq_ignore_ascii_case("exp") {
                // Explanations are not generated, but RFC 7208 § 6 still
                // forbids more than one.
                if has_exp {
                    return Err(ParseError::DuplicateModifier("exp"));
                }
                has_exp = true;
            }
        }

        if directives.is_empty() && redirect.is_none() {
            return Err(ParseError::NoDirectives);
        }

        Ok(Self {
            domain,
            directives,
            redirect,
        })
    }

    /// The `redirect` target which actually applies.
    ///
    /// RFC 7208 § 6.1: `redirect` is ignored if the record has an `all`
    /// mechanism anywhere.
    pub fn effective_redirect(&self) -> Option<&str> {
        if self
            .directives
            .iter()
            .any(|d| Mechanism::All == d.mechanism)
        {
            None
        } else {
            self.redirect.as_deref()
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{VERSION}")?;
        if !self.directives.is_empty() {
            write!(f, " {}", self.directives.iter().join(" "))?;
        }
        if let Some(ref redirect) = self.redirect {
            write!(f, " redirect={redirect}")?;
        }
        Ok(())
    }
}

/// Picks the SPF record out of the TXT records published at `domain`.
///
/// Anything starting with `v=spf1` in any case is taken to be an attempt at
/// an SPF record, so that a malformed header is reported by `Record::parse`
/// rather than silently treated as no record. More than one candidate is an
/// error (RFC 7208 § 4.5).
pub fn select<'a>(
    txt: &'a [Arc<str>],
    domain: &Name,
) -> Result<Option<&'a str>, PermError> {
    let mut candidates = txt.iter().filter(|r| {
        r.get(..VERSION.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(VERSION))
            && r[VERSION.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphanumeric())
    });

    let first = candidates.next();
    if candidates.next().is_some() {
        return Err(PermError::MultipleRecords(domain.to_string()));
    }

    Ok(first.map(|r| &**r))
}
