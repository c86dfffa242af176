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

//! Macro strings and their expansion.
//! RFC 7208 § 7

use std::borrow::Cow;
use std::fmt::Write as _;
use std::mem;
use std::net::IpAddr;

use hickory_resolver::Name;
use itertools::Itertools;

use super::error::{ParseError, PermError};
use super::network;

/// The largest domain name an expansion may produce before leftmost labels
/// are discarded.
const MAX_DOMAIN_LEN: usize = 253;

// `domain-spec` is `macro-string domain-end`, but `domain-end` is itself just a
// `macro-expand` or a run of `macro-literal`, so a whole `domain-spec` is
// treated as a `macro-string` whose expansion is checked as a domain
// afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacroString<'a>(&'a str);

impl<'a> MacroString<'a> {
    pub fn new(s: &'a str) -> Self {
        Self(s)
    }

    /// Checks the syntax of the whole string without expanding it.
    pub fn validate(self) -> Result<(), ParseError> {
        self.into_iter().try_for_each(|e| e.map(|_| ()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacroElement<'a> {
    Literal(&'a str),
    Expand(MacroExpand<'a>),
}

/// A `%{...}` macro.
///
/// The `%%`, `%_`, and `%-` escapes are produced as `MacroElement::Literal`
/// holding their output text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MacroExpand<'a> {
    pub kind: Macro,
    pub keep_parts: Option<usize>,
    pub reverse: bool,
    pub delimiters: &'a str,
    /// Set for uppercase macro letters, whose output is URL-escaped.
    pub escape: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Macro {
    Sender,
    SenderLocalPart,
    SenderDomain,
    Domain,
    Ip,
    Ptr,
    IpVersion,
    HeloDomain,
}

impl Macro {
    pub fn letter(self) -> char {
        match self {
            Self::Sender => 's',
            Self::SenderLocalPart => 'l',
            Self::SenderDomain => 'o',
            Self::Domain => 'd',
            Self::Ip => 'i',
            Self::Ptr => 'p',
            Self::IpVersion => 'v',
            Self::HeloDomain => 'h',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            's' => Some(Self::Sender),
            'l' => Some(Self::SenderLocalPart),
            'o' => Some(Self::SenderDomain),
            'd' => Some(Self::Domain),
            'i' => Some(Self::Ip),
            'p' => Some(Self::Ptr),
            'v' => Some(Self::IpVersion),
            'h' => Some(Self::HeloDomain),
            _ => None,
        }
    }
}

impl<'a> IntoIterator for MacroString<'a> {
    type Item = Result<MacroElement<'a>, ParseError>;
    type IntoIter = MacroElements<'a>;

    fn into_iter(self) -> MacroElements<'a> {
        MacroElements(self.0)
    }
}

#[derive(Clone, Debug)]
pub struct MacroElements<'a>(&'a str);

impl<'a> Iterator for MacroElements<'a> {
    type Item = Result<MacroElement<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.0.is_empty() {
            return None;
        }

        let elt = match self.0.find('%') {
            None => MacroElement::Literal(mem::take(&mut self.0)),

            Some(0) => {
                let Some(head) = self.0.get(..2) else {
                    self.0 = "";
                    return Some(Err(ParseError::IsolatedPercent));
                };
                let tail = &self.0[2..];
                self.0 = tail;

                match head {
                    "%%" => MacroElement::Literal("%"),
                    "%_" => MacroElement::Literal(" "),
                    "%-" => MacroElement::Literal("%20"),
                    "%{" => {
                        let Some((body, rest)) = tail.split_once('}') else {
                            self.0 = "";
                            return Some(Err(
                                ParseError::UnterminatedMacroExpand,
                            ));
                        };

                        self.0 = rest;
                        return Some(parse_macro_expand(body));
                    },
                    _ => {
                        self.0 = "";
                        return Some(Err(ParseError::IsolatedPercent));
                    },
                }
            },

            Some(n) => {
                let literal = &self.0[..n];
                self.0 = &self.0[n..];
                MacroElement::Literal(literal)
            },
        };

        Some(Ok(elt))
    }
}

fn parse_macro_expand(mut s: &str) -> Result<MacroElement<'_>, ParseError> {
    let mut chars = s.chars();
    let (kind, escape) = match chars.next() {
        None => return Err(ParseError::EmptyMacro),
        Some(c) => (
            Macro::from_letter(c).ok_or(ParseError::UnknownMacro(c))?,
            c.is_ascii_uppercase(),
        ),
    };

    s = chars.as_str();
    let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let keep_parts = if 0 == digits_end {
        None
    } else {
        let n = s[..digits_end]
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidInteger)?;
        // RFC 7208 § 7.1 requires a nonzero part count.
        if 0 == n {
            return Err(ParseError::InvalidInteger);
        }
        s = &s[digits_end..];
        Some(n)
    };

    let reverse = if s.starts_with(['r', 'R']) {
        s = &s[1..];
        true
    } else {
        false
    };

    if let Some(ch) = s
        .chars()
        .find(|&ch| !matches!(ch, '.' | '-' | '+' | ',' | '/' | '_' | '='))
    {
        return Err(ParseError::UnknownMacroTransformer(ch));
    }

    Ok(MacroElement::Expand(MacroExpand {
        kind,
        keep_parts,
        reverse,
        delimiters: s,
        escape,
    }))
}

/// The identity being checked, which is the source of all macro values
/// besides the current domain.
///
/// These values never change across `include` or `redirect`; only the domain
/// being evaluated does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// The full `MAIL FROM` address, or `postmaster@<domain>`.
    pub sender: String,
    /// The local part of `sender`.
    pub sender_local: String,
    /// The domain part of `sender`.
    pub sender_domain: String,
    /// The `HELO`/`EHLO` domain.
    pub helo_domain: String,
    /// The client IP address.
    pub ip: IpAddr,
}

impl Identity {
    /// Builds the identity for a check of `domain`.
    ///
    /// A missing sender becomes `postmaster@<domain>`, and a sender without a
    /// local part gets `postmaster` (RFC 7208 § 4.3). IPv4-mapped IPv6
    /// addresses are reduced to IPv4.
    pub fn new(
        ip: IpAddr,
        domain: &str,
        sender: Option<&str>,
        helo: Option<&str>,
    ) -> Self {
        let (local, sender_domain) = match sender {
            Some(s) if !s.is_empty() => match s.rsplit_once('@') {
                Some(("", d)) => ("postmaster", d),
                Some((l, d)) => (l, d),
                None => ("postmaster", s),
            },
            _ => ("postmaster", domain),
        };

        Self {
            sender: format!("{local}@{sender_domain}"),
            sender_local: local.to_owned(),
            sender_domain: sender_domain.to_owned(),
            helo_domain: helo.unwrap_or("unknown").to_owned(),
            ip: ip.to_canonical(),
        }
    }
}

/// Expands `template` against `identity`, with `domain` as the current
/// domain (`%{d}`).
///
/// No DNS is consulted. `%{p}` is not supported and yields an error.
pub fn expand(
    template: &str,
    identity: &Identity,
    domain: &Name,
) -> Result<String, PermError> {
    let mut ret = String::with_capacity(template.len());
    for element in MacroString::new(template) {
        match element? {
            MacroElement::Literal(s) => ret.push_str(s),
            MacroElement::Expand(me) => {
                let value = macro_value(me.kind, identity, domain)?;
                let value = transform(&value, &me);
                if me.escape {
                    url_escape_into(&mut ret, &value);
                } else {
                    ret.push_str(&value);
                }
            },
        }
    }

    Ok(ret)
}

/// Expands `template` as a `domain-spec`, shortening the result to a legal
/// length by dropping leftmost labels.
pub fn expand_domain(
    template: &str,
    identity: &Identity,
    domain: &Name,
) -> Result<String, PermError> {
    let mut expanded = expand(template, identity, domain)?;
    // RFC 7208 § 7.3: trim leftmost labels until the name is short enough.
    while expanded.trim_end_matches('.').len() > MAX_DOMAIN_LEN {
        match expanded.split_once('.') {
            Some((_, rest)) if !rest.is_empty() => {
                expanded = rest.to_owned();
            },
            _ => return Err(PermError::InvalidDomain(expanded)),
        }
    }

    Ok(expanded)
}

fn macro_value<'i>(
    kind: Macro,
    identity: &'i Identity,
    domain: &Name,
) -> Result<Cow<'i, str>, PermError> {
    // RFC 7208 § 7.2, 7.3
    Ok(match kind {
        Macro::Sender => Cow::Borrowed(&*identity.sender),
        Macro::SenderLocalPart => Cow::Borrowed(&*identity.sender_local),
        Macro::SenderDomain => Cow::Borrowed(&*identity.sender_domain),
        Macro::Domain => {
            let mut d = domain.to_ascii();
            if d.len() > 1 && d.ends_with('.') {
                d.pop();
            }
            Cow::Owned(d)
        },
        Macro::Ip => Cow::Owned(network::dotted_form(identity.ip)),
        Macro::Ptr => {
            return Err(PermError::UnsupportedMacro(Macro::Ptr.letter()))
        },
        Macro::IpVersion => Cow::Borrowed(match identity.ip {
            IpAddr::V4(_) => "in-addr",
            IpAddr::V6(_) => "ip6",
        }),
        Macro::HeloDomain => Cow::Borrowed(&*identity.helo_domain),
    })
}

/// Applies the digit, reverse, and delimiter transformers of `me`.
fn transform<'v>(value: &'v str, me: &MacroExpand<'_>) -> Cow<'v, str> {
    if me.keep_parts.is_none() && !me.reverse && me.delimiters.is_empty() {
        return Cow::Borrowed(value);
    }

    let delimiters = if me.delimiters.is_empty() {
        "."
    } else {
        me.delimiters
    };
    let is_delimiter = |c: char| delimiters.contains(c);
    let keep_parts = me.keep_parts.unwrap_or(usize::MAX);

    // Splitting is naïve: adjacent delimiters and delimiters at either end
    // produce empty parts, per RFC 7208 § 7.3. The rightmost `keep_parts`
    // parts are kept after the optional reversal, and always rejoined with
    // '.'.
    let parts: Vec<&str> = if me.reverse {
        value.rsplit(is_delimiter).collect()
    } else {
        value.split(is_delimiter).collect()
    };
    let skip = parts.len().saturating_sub(keep_parts);
    Cow::Owned(parts.into_iter().skip(skip).join("."))
}

/// Percent-encodes everything but the RFC 3986 unreserved characters.
fn url_escape_into(dst: &mut String, value: &str) {
    for &b in value.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            dst.push(char::from(b));
        } else {
            let _ = write!(dst, "%{b:02X}");
        }
    }
}
