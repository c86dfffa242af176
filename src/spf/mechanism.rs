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

//! Evaluation of individual mechanisms.
//!
//! RFC 7208 § 5

use std::net::IpAddr;
use std::sync::Arc;

use hickory_resolver::Name;

use super::directive::{Directive, DualCidr, Mechanism};
use super::error::{PermError, TempError};
use super::eval::{EvaluationContext, Halt, Session};
use super::network::{self, Network};
use super::verdict::Verdict;
use crate::support::dns::{self, Cache, CacheError, CacheMap, MxHost};

/// Tests whether `directive`, found in the record of `domain`, matches the
/// client.
///
/// DNS-querying mechanisms consume the query budget before anything else.
pub(super) fn evaluate(
    ctx: &mut EvaluationContext<'_>,
    session: &mut Session,
    domain: &Arc<Name>,
    directive: &Directive,
) -> Result<bool, Halt> {
    let argument = directive.argument.as_deref();
    if directive.mechanism.queries_dns() {
        ctx.use_dns_mechanism()?;
    }

    match directive.mechanism {
        Mechanism::All => Ok(true),
        Mechanism::Ip4 => {
            Ok(Network::parse_v4(argument.unwrap_or_default())?
                .contains(ctx.identity.ip))
        },
        Mechanism::Ip6 => {
            Ok(Network::parse_v6(argument.unwrap_or_default())?
                .contains(ctx.identity.ip))
        },
        Mechanism::A => {
            let target = ctx.target_domain(session, argument, domain)?;
            eval_a(ctx, &mut session.dns, &target, directive.cidr)
        },
        Mechanism::Mx => {
            let target = ctx.target_domain(session, argument, domain)?;
            eval_mx(ctx, &mut session.dns, &target, directive.cidr)
        },
        Mechanism::Ptr => {
            let target = ctx.target_domain(session, argument, domain)?;
            eval_ptr(ctx, &mut session.dns, &target)
        },
        Mechanism::Exists => {
            let target = ctx.target_domain(session, argument, domain)?;
            eval_exists(ctx, &mut session.dns, &target)
        },
        Mechanism::Include => {
            let target = ctx.target_domain(session, argument, domain)?;
            eval_include(ctx, session, target)
        },
    }
}

fn eval_a(
    ctx: &mut EvaluationContext<'_>,
    dns_cache: &mut Cache,
    target: &Arc<Name>,
    cidr: DualCidr,
) -> Result<bool, Halt> {
    let ip = ctx.identity.ip;
    let found = match ip {
        IpAddr::V4(_) => primary(ctx, &mut dns_cache.a, target)?
            .is_some_and(|addrs| {
                addrs
                    .iter()
                    .any(|&a| network::addr_matches(ip, a.into(), cidr.v4, cidr.v6))
            }),
        IpAddr::V6(_) => primary(ctx, &mut dns_cache.aaaa, target)?
            .is_some_and(|addrs| {
                addrs
                    .iter()
                    .any(|&a| network::addr_matches(ip, a.into(), cidr.v4, cidr.v6))
            }),
    };

    Ok(found)
}

fn eval_mx(
    ctx: &mut EvaluationContext<'_>,
    dns_cache: &mut Cache,
    target: &Arc<Name>,
    cidr: DualCidr,
) -> Result<bool, Halt> {
    let Some(hosts) = primary(ctx, &mut dns_cache.mx, target)?.cloned() else {
        return Ok(false);
    };

    // RFC 7208 § 4.6.4
    if hosts.len() > ctx.limits.max_mx_hosts {
        return Err(PermError::TooManyMxHosts(target.to_string()).into());
    }

    let ip = ctx.identity.ip;
    let mut not_ready = false;
    let mut temp_fail = false;
    for host in &hosts {
        match mx_host_matches(dns_cache, host, ip, cidr) {
            Ok(true) => return Ok(true),
            Ok(false) => {},
            // Remember temporary DNS errors but keep looking in case a later
            // host matches.
            Err(CacheError::Error) => temp_fail = true,
            // Keep going if the current one is pending, so that all the
            // lookups happen in parallel.
            Err(CacheError::NotReady) => not_ready = true,
            Err(CacheError::NotFound) => {},
        }
    }

    if not_ready {
        Err(Halt::NotReady)
    } else if temp_fail {
        Err(TempError::Dns(target.to_string()).into())
    } else {
        Ok(false)
    }
}

/// Checks one MX exchange against `ip`.
///
/// Glue addresses of the client's family which came with the MX answer are
/// used as-is. Only if there are none is the exchange looked up directly.
/// These lookups do not count against any budget.
fn mx_host_matches(
    dns_cache: &mut Cache,
    host: &MxHost,
    ip: IpAddr,
    cidr: DualCidr,
) -> Result<bool, CacheError> {
    let mut glue = host
        .glue
        .iter()
        .filter(|g| g.is_ipv4() == ip.is_ipv4())
        .peekable();
    if glue.peek().is_some() {
        return Ok(glue.any(|&g| network::addr_matches(ip, g, cidr.v4, cidr.v6)));
    }

    Ok(match ip {
        IpAddr::V4(_) => dns::look_up(&mut dns_cache.a, &host.exchange)?
            .iter()
            .any(|&a| network::addr_matches(ip, a.into(), cidr.v4, cidr.v6)),
        IpAddr::V6(_) => dns::look_up(&mut dns_cache.aaaa, &host.exchange)?
            .iter()
            .any(|&a| network::addr_matches(ip, a.into(), cidr.v4, cidr.v6)),
    })
}

fn eval_ptr(
    ctx: &mut EvaluationContext<'_>,
    dns_cache: &mut Cache,
    target: &Arc<Name>,
) -> Result<bool, Halt> {
    Ok(find_validated_name(ctx, dns_cache, target)?.is_some())
}

/// Identifies the "validated name" of the client for `target`.
///
/// This is the process described in RFC 7208 § 5.5: a PTR name of the client
/// address counts only if it is `target` or a subdomain thereof, and if it
/// resolves back to the client address.
fn find_validated_name(
    ctx: &mut EvaluationContext<'_>,
    dns_cache: &mut Cache,
    target: &Name,
) -> Result<Option<Arc<Name>>, Halt> {
    let ip = ctx.identity.ip;
    let reverse = Arc::new(dns::fqdn(network::reverse_pointer_name(ip)));
    let names = match dns::look_up(&mut dns_cache.ptr, &reverse) {
        Ok(names) => names.clone(),
        Err(CacheError::NotFound) => {
            ctx.note_void_lookup()?;
            return Ok(None);
        },
        // > If a DNS error occurs while doing the PTR RR lookup, then [ptr]
        // > fails to match.
        Err(CacheError::Error) => return Ok(None),
        Err(CacheError::NotReady) => return Err(Halt::NotReady),
    };

    // Prefer an exact match on the target, then look at subdomains. If we
    // exceed the limit, just ignore the rest.
    let candidates = names
        .iter()
        .filter(|n| ***n == *target)
        .chain(names.iter().filter(|n| ***n != *target && target.zone_of(n)))
        .take(ctx.limits.max_ptr_names);

    for candidate in candidates {
        let matches = match ip {
            IpAddr::V4(ip) => dns::look_up(&mut dns_cache.a, candidate)
                .map(|addrs| addrs.contains(&ip)),
            IpAddr::V6(ip) => dns::look_up(&mut dns_cache.aaaa, candidate)
                .map(|addrs| addrs.contains(&ip)),
        };

        match matches {
            Ok(false) => {},
            Ok(true) => return Ok(Some(Arc::clone(candidate))),
            // > If a DNS error occurs while doing an A RR lookup, then that
            // > domain name is skipped and the search continues.
            Err(CacheError::NotFound | CacheError::Error) => {},
            // Stop at the first name still in flight so that the choice of
            // name is deterministic.
            Err(CacheError::NotReady) => return Err(Halt::NotReady),
        }
    }

    Ok(None)
}

fn eval_exists(
    ctx: &mut EvaluationContext<'_>,
    dns_cache: &mut Cache,
    target: &Arc<Name>,
) -> Result<bool, Halt> {
    // Always an A query, whatever the client address family.
    Ok(primary(ctx, &mut dns_cache.a, target)?.is_some_and(|a| !a.is_empty()))
}

fn eval_include(
    ctx: &mut EvaluationContext<'_>,
    session: &mut Session,
    target: Arc<Name>,
) -> Result<bool, Halt> {
    let mark = ctx.matches.len();
    // RFC 7208 § 5.2. `none` inside an include comes back as an error.
    match ctx.check_host(session, target, false)? {
        Verdict::Pass => Ok(true),
        _ => {
            ctx.matches.truncate(mark);
            Ok(false)
        },
    }
}

/// Looks up the record a mechanism directly asks for.
///
/// Not found is a non-match, and also a void lookup. Any other DNS failure is
/// a temporary error (RFC 7208 § 5).
fn primary<'c, T>(
    ctx: &mut EvaluationContext<'_>,
    cache: &'c mut CacheMap<T>,
    name: &Arc<Name>,
) -> Result<Option<&'c T>, Halt> {
    match dns::look_up(cache, name) {
        Ok(v) => Ok(Some(v)),
        Err(CacheError::NotFound) => {
            ctx.note_void_lookup()?;
            Ok(None)
        },
        Err(CacheError::Error) => Err(TempError::Dns(name.to_string()).into()),
        Err(CacheError::NotReady) => Err(Halt::NotReady),
    }
}

#[cfg(test)]
mod test {
    use super::super::error::Error;
    use super::super::eval::test::{error, run, session, verdict};
    use super::super::eval::Limits;
    use super::*;
    use crate::support::dns::Entry;

    #[test]
    fn ip_mechanisms() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 ip4:192.0.2.0/24 ip6:2001:db8::/32 \
                       -ip4:0.0.0.0/0 ~all"],
            },
        };

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.99"));
        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "2001:db8::5"));
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "203.0.113.1"));
        assert_eq!(Some(Verdict::SoftFail), verdict(&mut session, "::1"));
        // IPv4-mapped clients are treated as IPv4
        assert_eq!(
            Some(Verdict::Pass),
            verdict(&mut session, "::ffff:192.0.2.1"),
        );
    }

    #[test]
    fn bad_ip_literal() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 ip4:192.0.2.0/33 +all"],
            },
        };
        assert_eq!(
            Some(Error::Perm(PermError::InvalidNetwork(
                "192.0.2.0/33".to_owned()
            ))),
            error(&mut session, "192.0.2.1"),
        );
    }

    #[test]
    fn a_mechanism() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 a a:other.example.com/24//64 -all"],
                a: ["192.0.2.1"],
                aaaa: NotFound,
            },
            "other.example.com" => {
                a: ["198.51.100.1"],
                aaaa: ["2001:db8:1::1"],
            },
        };

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.1"));
        assert_eq!(
            Some(Verdict::Pass),
            verdict(&mut session, "198.51.100.200"),
        );
        assert_eq!(
            Some(Verdict::Pass),
            verdict(&mut session, "2001:db8:1::ffff"),
        );
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "192.0.2.2"));
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "2001:db8:2::1"));
    }

    #[test]
    fn a_mechanism_temperror() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 a +all"],
                a: Error,
            },
        };
        assert_eq!(
            Some(Error::Temp(TempError::Dns("example.com.".to_owned()))),
            error(&mut session, "192.0.2.1"),
        );
    }

    #[test]
    fn mx_mechanism() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 mx -all"],
                mx: ["mx1.example.com", "mx2.example.com"],
            },
            "mx1.example.com" => {
                a: NotFound,
            },
            "mx2.example.com" => {
                a: ["192.0.2.25"],
            },
        };

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.25"));
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "192.0.2.26"));
    }

    #[test]
    fn mx_glue_avoids_lookups() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 mx/24 -all"],
            },
        };
        session.dns.mx.push((
            rdn("example.com"),
            Entry::Ok(vec![MxHost {
                exchange: rdn("mx.example.com"),
                glue: vec!["192.0.2.25".parse().unwrap()],
            }]),
        ));

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.99"));
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "192.0.3.1"));
        assert!(session.dns.take_new().is_empty());

        // No IPv6 glue, so the exchange must be looked up.
        assert_eq!(None, verdict(&mut session, "2001:db8::1"));
        assert_eq!(
            vec![(rdn("mx.example.com"), dns::QueryType::Aaaa)],
            session.dns.take_new(),
        );
    }

    #[test]
    fn mx_errors() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 mx -all"],
                mx: ["mx1.example.com", "mx2.example.com"],
            },
            "mx1.example.com" => {
                a: Error,
            },
            "mx2.example.com" => {
                a: ["192.0.2.25"],
            },
        };

        // A later host can still match despite an earlier failure
        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.25"));
        assert_eq!(
            Some(Verdict::TempError),
            verdict(&mut session, "192.0.2.26"),
        );
    }

    #[test]
    fn too_many_mx_hosts() {
        let hosts = (0..11)
            .map(|i| format!("mx{i}.example.com"))
            .collect::<Vec<_>>();
        let hosts = hosts.iter().map(String::as_str).collect::<Vec<_>>();
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 mx +all"],
                mx: hosts,
            },
        };

        assert_matches!(
            Some(Error::Perm(PermError::TooManyMxHosts(..))),
            error(&mut session, "192.0.2.1"),
        );

        let limits = Limits {
            max_mx_hosts: 11,
            ..Limits::default()
        };
        assert_eq!(None, run(&mut session, &limits, "192.0.2.1", "example.com"));
        assert_eq!(11, session.dns.take_new().len());
    }

    #[test]
    fn mx_not_found() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 mx ?all"],
                mx: NotFound,
            },
        };
        let evaluation = run(
            &mut session,
            &Limits::default(),
            "192.0.2.1",
            "example.com",
        )
        .unwrap();
        assert_eq!(Verdict::Neutral, evaluation.verdict);
        assert_eq!(1, evaluation.void_lookups);
    }

    #[test]
    fn ptr_mechanism() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 ptr -all"],
            },
            "1.2.0.192.in-addr.arpa" => {
                ptr: ["evil.example.net", "mail.example.com"],
            },
            "mail.example.com" => {
                a: ["192.0.2.1"],
            },
            "evil.example.net" => {
                a: ["192.0.2.1"],
            },
            "2.2.0.192.in-addr.arpa" => {
                ptr: ["forged.example.com"],
            },
            "forged.example.com" => {
                a: ["192.0.2.99"],
            },
            "3.2.0.192.in-addr.arpa" => {
                ptr: Error,
            },
        };

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.1"));
        // PTR doesn't resolve back to the client
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "192.0.2.2"));
        // PTR errors are just a non-match
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "192.0.2.3"));
    }

    #[test]
    fn ptr_mechanism_explicit_domain() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 ptr:example.net -all"],
            },
            "1.2.0.192.in-addr.arpa" => {
                ptr: ["mail.example.com", "relay.example.net"],
            },
            "relay.example.net" => {
                a: ["192.0.2.1"],
            },
        };

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.1"));
        // mail.example.com isn't a candidate, so is never looked up
        assert!(session.dns.a.iter().all(|(n, _)| **n != *rdn("mail.example.com")));
    }

    #[test]
    fn exists_mechanism() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 exists:%{ir}.allow.example.com -all"],
            },
            "1.2.0.192.allow.example.com" => {
                a: ["127.0.0.2"],
            },
            "2.2.0.192.allow.example.com" => {
                a: NotFound,
            },
        };

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "192.0.2.1"));
        assert_eq!(Some(Verdict::Fail), verdict(&mut session, "192.0.2.2"));
    }

    #[test]
    fn exists_uses_a_for_ipv6() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 exists:%{v}.example.com -all"],
            },
            "ip6.example.com" => {
                a: ["127.0.0.2"],
            },
        };

        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "2001:db8::1"));
    }

    #[test]
    fn unsupported_p_macro() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 exists:%{p}.example.com +all"],
            },
        };
        assert_eq!(
            Some(Error::Perm(PermError::UnsupportedMacro('p'))),
            error(&mut session, "192.0.2.1"),
        );
    }

    #[test]
    fn budget_consumed_before_lookup() {
        let mut session = session! {
            "example.com" => {
                txt: ["v=spf1 a a a a a a a a a a a -all"],
                a: NotFound,
            },
        };
        assert_eq!(
            Some(Error::Perm(PermError::QueryLimit)),
            error(&mut session, "192.0.2.1"),
        );

        // Non-DNS mechanisms are free
        let record = format!("v=spf1 {}+all", "ip4:192.0.2.1 ".repeat(20));
        let mut session = session! {
            "example.com" => {
                txt: [record.as_str()],
            },
        };
        assert_eq!(Some(Verdict::Pass), verdict(&mut session, "203.0.113.1"));
    }

    fn rdn(s: &str) -> Arc<Name> {
        super::super::eval::test::rdn(s)
    }
}
