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

//! The syntax of a single SPF directive.
//! RFC 7208 § 4.6.1, 12

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use super::error::ParseError;
use super::macros::MacroString;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    pub fn as_char(self) -> char {
        match self {
            Self::Pass => '+',
            Self::Fail => '-',
            Self::SoftFail => '~',
            Self::Neutral => '?',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Pass),
            '-' => Some(Self::Fail),
            '~' => Some(Self::SoftFail),
            '?' => Some(Self::Neutral),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mechanism {
    A,
    All,
    Exists,
    Include,
    Ip4,
    Ip6,
    Mx,
    Ptr,
}

impl Mechanism {
    pub fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::All => "all",
            Self::Exists => "exists",
            Self::Include => "include",
            Self::Ip4 => "ip4",
            Self::Ip6 => "ip6",
            Self::Mx => "mx",
            Self::Ptr => "ptr",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        [
            Self::A,
            Self::All,
            Self::Exists,
            Self::Include,
            Self::Ip4,
            Self::Ip6,
            Self::Mx,
            Self::Ptr,
        ]
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// Whether evaluating this mechanism counts against the DNS query limit.
    pub fn queries_dns(self) -> bool {
        matches!(
            self,
            Self::A | Self::Exists | Self::Include | Self::Mx | Self::Ptr,
        )
    }

    /// Whether the argument is a `domain-spec` subject to macro expansion.
    fn takes_domain_spec(self) -> bool {
        matches!(
            self,
            Self::A | Self::Exists | Self::Include | Self::Mx | Self::Ptr,
        )
    }

    fn requires_argument(self) -> bool {
        matches!(self, Self::Exists | Self::Include | Self::Ip4 | Self::Ip6)
    }

    fn takes_dual_cidr(self) -> bool {
        matches!(self, Self::A | Self::Mx)
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `dual-cidr-length` suffix allowed on `a` and `mx`.
///
/// Either prefix length being `None` means the full address must match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DualCidr {
    pub v4: Option<u8>,
    pub v6: Option<u8>,
}

impl DualCidr {
    pub fn is_empty(self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }

    /// Splits a trailing dual-CIDR suffix off `arg`.
    fn split(arg: &str) -> Result<(&str, Self), ParseError> {
        lazy_static! {
            static ref R: Regex =
                Regex::new("^(.*?)(?:/([0-9]+))?(?://([0-9]+))?$").unwrap();
        }

        let Some(captures) = R.captures(arg) else {
            return Ok((arg, Self::default()));
        };

        let parse_len = |s: &str, max: u8| -> Result<u8, ParseError> {
            match s.parse::<u8>() {
                Ok(l) if l <= max => Ok(l),
                _ => Err(ParseError::InvalidCidrLength),
            }
        };

        let v4 = captures
            .get(2)
            .map(|c| parse_len(c.as_str(), 32))
            .transpose()?;
        let v6 = captures
            .get(3)
            .map(|c| parse_len(c.as_str(), 128))
            .transpose()?;
        let domain = captures.get(1).map_or("", |c| c.as_str());
        Ok((domain, Self { v4, v6 }))
    }
}

impl fmt::Display for DualCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v4) = self.v4 {
            write!(f, "/{v4}")?;
        }
        if let Some(v6) = self.v6 {
            write!(f, "//{v6}")?;
        }
        Ok(())
    }
}

/// One policy rule of an SPF record.
///
/// `argument` is the text after the `:`, before macro expansion. For `a` and
/// `mx`, any CIDR suffix is split off into `cidr`; for `ip4` and `ip6` the
/// prefix length stays part of the argument, which is parsed as a network
/// when the directive is evaluated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Directive {
    pub qualifier: Qualifier,
    pub mechanism: Mechanism,
    pub argument: Option<String>,
    pub cidr: DualCidr,
}

impl Directive {
    /// Parses one whitespace-delimited word of an SPF record.
    pub fn parse(word: &str) -> Result<Self, ParseError> {
        let mut chars = word.chars();
        let (qualifier, rest) = match chars.next() {
            None => return Err(ParseError::EmptyDirective),
            Some(c) => match Qualifier::from_char(c) {
                Some(q) => (q, chars.as_str()),
                None if c.is_ascii_alphabetic() => (Qualifier::Pass, word),
                None => return Err(ParseError::UnknownCharacter(c)),
            },
        };

        let split_at = rest.find([':', '/']).unwrap_or(rest.len());
        let (name, tail) = rest.split_at(split_at);
        let mechanism = Mechanism::from_name(name)
            .ok_or_else(|| ParseError::UnknownMechanism(name.to_owned()))?;

        let (argument, cidr) = if let Some(arg) = tail.strip_prefix(':') {
            if mechanism.takes_dual_cidr() {
                let (domain, cidr) = DualCidr::split(arg)?;
                (Some(domain), cidr)
            } else {
                (Some(arg), DualCidr::default())
            }
        } else if tail.is_empty() {
            (None, DualCidr::default())
        } else if mechanism.takes_dual_cidr() {
            match DualCidr::split(tail)? {
                ("", cidr) if !cidr.is_empty() => (None, cidr),
                _ => return Err(ParseError::InvalidCidrLength),
            }
        } else if mechanism.requires_argument() {
            return Err(ParseError::MissingArgument(mechanism));
        } else {
            return Err(ParseError::UnusedArgument(mechanism));
        };

        match argument {
            Some("") | None if mechanism.requires_argument() => {
                return Err(ParseError::MissingArgument(mechanism));
            },
            Some("") => return Err(ParseError::MissingArgument(mechanism)),
            Some(_) if Mechanism::All == mechanism => {
                return Err(ParseError::UnusedArgument(mechanism));
            },
            Some(arg) if mechanism.takes_domain_spec() => {
                MacroString::new(arg).validate()?;
            },
            _ => {},
        }

        Ok(Self {
            qualifier,
            mechanism,
            argument: argument.map(str::to_owned),
            cidr,
        })
    }
}

impl FromStr for Directive {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        Self::parse(s)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.qualifier.as_char(), self.mechanism)?;
        if let Some(ref argument) = self.argument {
            write!(f, ":{argument}")?;
        }
        write!(f, "{}", self.cidr)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn directive(
        qualifier: Qualifier,
        mechanism: Mechanism,
        argument: Option<&str>,
        v4: Option<u8>,
        v6: Option<u8>,
    ) -> Result<Directive, ParseError> {
        Ok(Directive {
            qualifier,
            mechanism,
            argument: argument.map(str::to_owned),
            cidr: DualCidr { v4, v6 },
        })
    }

    #[test]
    fn parse_qualifiers() {
        use super::{Mechanism as Me, Qualifier as Q};

        assert_eq!(
            directive(Q::Pass, Me::All, None, None, None),
            Directive::parse("all"),
        );
        assert_eq!(
            directive(Q::Pass, Me::All, None, None, None),
            Directive::parse("+all"),
        );
        assert_eq!(
            directive(Q::Fail, Me::All, None, None, None),
            Directive::parse("-aLl"),
        );
        assert_eq!(
            directive(Q::Neutral, Me::All, None, None, None),
            Directive::parse("?ALL"),
        );
        assert_eq!(
            directive(Q::SoftFail, Me::All, None, None, None),
            Directive::parse("~all"),
        );
        assert_eq!(
            Err(ParseError::UnknownCharacter('!')),
            Directive::parse("!all"),
        );
        assert_eq!(Err(ParseError::EmptyDirective), Directive::parse(""));
    }

    #[test]
    fn parse_mechanisms() {
        use super::{Mechanism as Me, Qualifier as Q};

        assert_eq!(
            Err(ParseError::UnusedArgument(Me::All)),
            Directive::parse("all:foo.bar"),
        );
        assert_eq!(
            Err(ParseError::UnknownMechanism("plugh".to_owned())),
            Directive::parse("-plugh:foo.bar"),
        );

        assert_eq!(
            directive(Q::Pass, Me::Include, Some("foo.bar"), None, None),
            Directive::parse("include:foo.bar"),
        );
        assert_eq!(
            directive(Q::Fail, Me::Include, Some("_spf.%{d2}"), None, None),
            Directive::parse("-INCLUDE:_spf.%{d2}"),
        );
        assert_eq!(
            Err(ParseError::MissingArgument(Me::Include)),
            Directive::parse("include"),
        );
        assert_eq!(
            Err(ParseError::MissingArgument(Me::Include)),
            Directive::parse("include:"),
        );
        assert_eq!(
            Err(ParseError::UnknownMacro('x')),
            Directive::parse("include:%{x}.foo"),
        );

        assert_eq!(
            directive(Q::Pass, Me::A, None, None, None),
            Directive::parse("a"),
        );
        assert_eq!(
            directive(Q::Fail, Me::A, Some("foo.bar"), None, None),
            Directive::parse("-A:foo.bar"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, Some("foo/bar"), None, None),
            Directive::parse("a:foo/bar"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, Some("foo"), Some(24), None),
            Directive::parse("a:foo/24"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, Some("foo/bar"), Some(24), None),
            Directive::parse("a:foo/bar/24"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, Some("foo"), Some(24), Some(64)),
            Directive::parse("a:foo/24//64"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, Some("foo"), None, Some(64)),
            Directive::parse("a:foo//64"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, None, Some(24), None),
            Directive::parse("a/24"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, None, Some(24), Some(64)),
            Directive::parse("A/24//64"),
        );
        assert_eq!(
            directive(Q::Pass, Me::A, None, Some(32), Some(128)),
            Directive::parse("a/32//128"),
        );
        assert_eq!(
            Err(ParseError::InvalidCidrLength),
            Directive::parse("a:foo.bar/33"),
        );
        assert_eq!(
            Err(ParseError::InvalidCidrLength),
            Directive::parse("a:foo.bar/99999999999999"),
        );
        assert_eq!(
            Err(ParseError::InvalidCidrLength),
            Directive::parse("a:foo.bar/32//129"),
        );

        assert_eq!(
            directive(Q::Pass, Me::Mx, None, None, None),
            Directive::parse("mx"),
        );
        assert_eq!(
            directive(Q::Fail, Me::Mx, Some("foo.bar"), None, None),
            Directive::parse("-MX:foo.bar"),
        );
        assert_eq!(
            directive(Q::Pass, Me::Mx, None, None, Some(48)),
            Directive::parse("mx//48"),
        );

        assert_eq!(
            directive(Q::Pass, Me::Ptr, None, None, None),
            Directive::parse("ptr"),
        );
        assert_eq!(
            directive(Q::Fail, Me::Ptr, Some("foo.bar"), None, None),
            Directive::parse("-PTR:foo.bar"),
        );
        assert_eq!(
            Err(ParseError::UnusedArgument(Me::Ptr)),
            Directive::parse("ptr/24"),
        );

        assert_eq!(
            directive(Q::Pass, Me::Ip4, Some("192.0.2.0/24"), None, None),
            Directive::parse("IP4:192.0.2.0/24"),
        );
        // Network literals are only checked at evaluation
        assert_eq!(
            directive(Q::Pass, Me::Ip4, Some("192.0.2.1999"), None, None),
            Directive::parse("ip4:192.0.2.1999"),
        );
        assert_eq!(
            Err(ParseError::MissingArgument(Me::Ip4)),
            Directive::parse("ip4"),
        );
        assert_eq!(
            Err(ParseError::MissingArgument(Me::Ip4)),
            Directive::parse("ip4/8"),
        );
        assert_eq!(
            directive(Q::Neutral, Me::Ip6, Some("2001:db8::/32"), None, None),
            Directive::parse("?ip6:2001:db8::/32"),
        );
        assert_eq!(
            Err(ParseError::MissingArgument(Me::Ip6)),
            Directive::parse("ip6"),
        );

        assert_eq!(
            directive(
                Q::SoftFail,
                Me::Exists,
                Some("%{ir}.%{v}._spf.%{d}"),
                None,
                None,
            ),
            Directive::parse("~EXISTS:%{ir}.%{v}._spf.%{d}"),
        );
        assert_eq!(
            Err(ParseError::MissingArgument(Me::Exists)),
            Directive::parse("exists"),
        );
    }

    #[test]
    fn display_canonical_form() {
        assert_eq!(
            "-ip4:10.0.0.0/8",
            Directive::parse("-ip4:10.0.0.0/8").unwrap().to_string(),
        );
        assert_eq!("+all", Directive::parse("all").unwrap().to_string());
        assert_eq!(
            "~mx:example.com/24//64",
            Directive::parse("~MX:example.com/24//64")
                .unwrap()
                .to_string(),
        );
        assert_eq!("?a//64", Directive::parse("?a//64").unwrap().to_string());
    }

    proptest! {
        #[test]
        fn explicit_qualifier_round_trip(
            q in "[-+~?]",
            dom in "[a-z][a-z0-9]{0,8}(\\.[a-z][a-z0-9]{0,8}){0,3}",
            v4 in proptest::option::of(0u8..=32),
            v6 in proptest::option::of(0u8..=128),
            octets in proptest::array::uniform4(0u8..),
            prefix in 0u8..=32,
            which in 0usize..7,
        ) {
            let cidr = DualCidr { v4, v6 };
            let s = match which {
                0 => format!("{q}all"),
                1 => format!("{q}include:{dom}"),
                2 => format!("{q}a:{dom}{cidr}"),
                3 => format!("{q}mx{cidr}"),
                4 => format!("{q}ptr:{dom}"),
                5 => format!("{q}exists:%{{i}}.{dom}"),
                _ => format!(
                    "{q}ip4:{}.{}.{}.{}/{prefix}",
                    octets[0], octets[1], octets[2], octets[3],
                ),
            };

            let parsed = s.parse::<Directive>().unwrap();
            prop_assert_eq!(s, parsed.to_string());
        }
    }
}
