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

//! Failure classes of SPF evaluation.
//!
//! RFC 7208 § 2.6.6, 2.6.7

use thiserror::Error;

use super::directive::Mechanism;

/// A record or directive which is not syntactically valid.
///
/// This is always a permanent error.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("record does not start with \"v=spf1 \"")]
    MissingHeader,
    #[error("no directives were found")]
    NoDirectives,
    #[error("empty directive")]
    EmptyDirective,
    #[error("unknown character: {0}")]
    UnknownCharacter(char),
    #[error("unknown mechanism: {0}")]
    UnknownMechanism(String),
    #[error("missing argument for {0}")]
    MissingArgument(Mechanism),
    #[error("unused argument for {0}")]
    UnusedArgument(Mechanism),
    #[error("invalid CIDR length")]
    InvalidCidrLength,
    #[error("duplicate {0} modifier")]
    DuplicateModifier(&'static str),
    #[error("empty {0} modifier")]
    EmptyModifier(&'static str),
    #[error("invalid integer")]
    InvalidInteger,
    #[error("isolated percent sign")]
    IsolatedPercent,
    #[error("unterminated macro expand")]
    UnterminatedMacroExpand,
    #[error("empty macro")]
    EmptyMacro,
    #[error("unknown macro: {0}")]
    UnknownMacro(char),
    #[error("unknown macro transformer: {0}")]
    UnknownMacroTransformer(char),
}

/// The published policy is broken; retrying will not help.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PermError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("DNS query limit reached")]
    QueryLimit,
    #[error("void lookup limit reached")]
    VoidLookupLimit,
    #[error("too many MX records for {0}")]
    TooManyMxHosts(String),
    #[error("unsupported macro: {0}")]
    UnsupportedMacro(char),
    #[error("invalid network: {0}")]
    InvalidNetwork(String),
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("multiple SPF records for {0}")]
    MultipleRecords(String),
    #[error("no SPF record for {0}")]
    NoRecord(String),
}

/// A transient condition, usually a DNS failure. The whole check may be
/// retried later.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TempError {
    #[error("DNS lookup of {0} failed")]
    Dns(String),
    #[error("deadline expired")]
    Deadline,
}

/// The reason an evaluation ended in `permerror` or `temperror`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Perm(#[from] PermError),
    #[error(transparent)]
    Temp(#[from] TempError),
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self::Perm(PermError::Parse(e))
    }
}
