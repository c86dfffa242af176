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

//! DNS access for the SPF evaluator.
//!
//! The evaluator never talks to the network itself. It reads from a per-check
//! `Cache`, registering the queries it discovers it needs, and the driver uses
//! a `Resolver` to fill those in.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hickory_resolver::proto::op::ResponseCode;
pub use hickory_resolver::Name;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::Error as SupportError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
    Txt,
    A,
    Aaaa,
    Mx,
    Ptr,
}

/// A single resource record value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Txt(String),
    Mx(Name),
    Ptr(Name),
}

/// The useful parts of a DNS response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Answer {
    /// Records from the answer section.
    pub answers: Vec<RecordData>,
    /// Records from the additional section, with their owner names. Only
    /// address records are of interest.
    pub additional: Vec<(Name, RecordData)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DnsError {
    /// NXDOMAIN, or NOERROR without any answers.
    #[error("no records found")]
    NotFound,
    #[error("DNS query timed out")]
    Timeout,
    #[error("DNS server failure: {0}")]
    ServerFailure(String),
}

/// Something which can answer DNS queries.
///
/// Implementations query exactly one server per lookup and do not retry.
pub trait Resolver {
    fn resolve(
        &self,
        name: &Name,
        query_type: QueryType,
    ) -> impl Future<Output = Result<Answer, DnsError>> + Send;
}

impl<T: Resolver> Resolver for &T {
    fn resolve(
        &self,
        name: &Name,
        query_type: QueryType,
    ) -> impl Future<Output = Result<Answer, DnsError>> + Send {
        (**self).resolve(name, query_type)
    }
}

/// `Resolver` implemented by a real DNS client.
pub struct HickoryResolver {
    inner: hickory_resolver::TokioAsyncResolver,
}

/// How to reach DNS.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// The single nameserver to query. If unset, the system resolver
    /// configuration is used.
    pub nameserver: Option<SocketAddr>,
    /// The time allowed for one query.
    pub query_timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            nameserver: None,
            query_timeout_secs: 5,
        }
    }
}

impl HickoryResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, SupportError> {
        use hickory_resolver::config as hc;

        let (hickory_config, mut opts) = match config.nameserver {
            Some(addr) => (
                hc::ResolverConfig::from_parts(
                    None,
                    vec![],
                    hc::NameServerConfigGroup::from_ips_clear(
                        &[addr.ip()],
                        addr.port(),
                        true,
                    ),
                ),
                hc::ResolverOpts::default(),
            ),
            None => hickory_resolver::system_conf::read_system_conf()
                .map_err(|e| SupportError::Resolver(e.to_string()))?,
        };

        opts.timeout = Duration::from_secs(config.query_timeout_secs);
        opts.attempts = 1;
        opts.num_concurrent_reqs = 1;

        Ok(Self {
            inner: hickory_resolver::TokioAsyncResolver::tokio(
                hickory_config,
                opts,
            ),
        })
    }
}

impl Resolver for HickoryResolver {
    fn resolve(
        &self,
        name: &Name,
        query_type: QueryType,
    ) -> impl Future<Output = Result<Answer, DnsError>> + Send {
        use hickory_resolver::error::ResolveErrorKind as Rek;
        use hickory_resolver::proto::rr::{RData, RecordType};

        let mut name = name.clone();
        name.set_fqdn(true);
        let record_type = match query_type {
            QueryType::Txt => RecordType::TXT,
            QueryType::A => RecordType::A,
            QueryType::Aaaa => RecordType::AAAA,
            QueryType::Mx => RecordType::MX,
            QueryType::Ptr => RecordType::PTR,
        };

        async move {
            let lookup = match self.inner.lookup(name, record_type).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    return Err(match *e.kind() {
                        Rek::NoRecordsFound { response_code, .. } => {
                            classify_response_code(response_code)
                        },
                        Rek::Timeout => DnsError::Timeout,
                        _ => DnsError::ServerFailure(e.to_string()),
                    });
                },
            };

            let mut answer = Answer::default();
            for record in lookup.record_iter() {
                let Some(data) = record.data() else {
                    continue;
                };

                match (query_type, data) {
                    (QueryType::Txt, RData::TXT(txt)) => {
                        let combined = txt
                            .iter()
                            .flat_map(|part| part.iter().copied())
                            .collect::<Vec<u8>>();
                        answer.answers.push(RecordData::Txt(
                            String::from_utf8_lossy(&combined).into_owned(),
                        ));
                    },
                    (QueryType::A, RData::A(a)) => {
                        answer.answers.push(RecordData::A(a.0));
                    },
                    (QueryType::Aaaa, RData::AAAA(aaaa)) => {
                        answer.answers.push(RecordData::Aaaa(aaaa.0));
                    },
                    (QueryType::Mx, RData::MX(mx)) => {
                        answer
                            .answers
                            .push(RecordData::Mx(mx.exchange().clone()));
                    },
                    (QueryType::Ptr, RData::PTR(ptr)) => {
                        answer.answers.push(RecordData::Ptr(ptr.0.clone()));
                    },
                    // Address records travelling with an MX answer are glue.
                    (QueryType::Mx, RData::A(a)) => {
                        answer
                            .additional
                            .push((record.name().clone(), RecordData::A(a.0)));
                    },
                    (QueryType::Mx, RData::AAAA(aaaa)) => {
                        answer.additional.push((
                            record.name().clone(),
                            RecordData::Aaaa(aaaa.0),
                        ));
                    },
                    _ => {},
                }
            }

            Ok(answer)
        }
    }
}

/// The records published for one name in a `StaticResolver` zone.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StaticEntry {
    pub txt: Vec<String>,
    pub a: Vec<Ipv4Addr>,
    pub aaaa: Vec<Ipv6Addr>,
    pub mx: Vec<String>,
    pub ptr: Vec<String>,
    /// If true, MX answers carry the exchanges' addresses as glue.
    pub mx_glue: bool,
    /// If true, every query for this name fails with SERVFAIL.
    pub servfail: bool,
    /// If true, every query for this name times out.
    pub timeout: bool,
}

/// An in-memory zone, keyed by lower-case name without the trailing dot.
///
/// Names absent from the zone are NXDOMAIN.
#[derive(Debug, Default)]
pub struct StaticResolver {
    zone: HashMap<String, StaticEntry>,
    queries: Mutex<Vec<(String, QueryType)>>,
}

impl StaticResolver {
    pub fn new(zone: HashMap<String, StaticEntry>) -> Self {
        Self {
            zone: zone
                .into_iter()
                .map(|(k, v)| (zone_key(&k), v))
                .collect(),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Loads a zone from a TOML file whose tables are names.
    pub fn load(path: &Path) -> Result<Self, SupportError> {
        let data = std::fs::read(path)?;
        let zone: HashMap<String, StaticEntry> = toml::from_slice(&data)?;
        Ok(Self::new(zone))
    }

    /// Adds or replaces the records for `name`.
    pub fn insert(&mut self, name: &str, entry: StaticEntry) {
        self.zone.insert(zone_key(name), entry);
    }

    /// Every query made so far, in order.
    pub fn query_log(&self) -> Vec<(String, QueryType)> {
        self.queries
            .lock()
            .map(|q| q.clone())
            .unwrap_or_default()
    }

    fn answer(
        &self,
        name: &Name,
        query_type: QueryType,
    ) -> Result<Answer, DnsError> {
        let key = zone_key(&name.to_ascii());
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((key.clone(), query_type));
        }

        let Some(entry) = self.zone.get(&key) else {
            return Err(DnsError::NotFound);
        };
        if entry.timeout {
            return Err(DnsError::Timeout);
        }
        if entry.servfail {
            return Err(DnsError::ServerFailure("SERVFAIL".to_owned()));
        }

        let parse_names = |names: &[String]| {
            names
                .iter()
                .filter_map(|n| Name::from_ascii(n).ok())
                .collect::<Vec<_>>()
        };

        let mut answer = Answer::default();
        match query_type {
            QueryType::Txt => answer
                .answers
                .extend(entry.txt.iter().cloned().map(RecordData::Txt)),
            QueryType::A => {
                answer.answers.extend(entry.a.iter().copied().map(RecordData::A))
            },
            QueryType::Aaaa => answer
                .answers
                .extend(entry.aaaa.iter().copied().map(RecordData::Aaaa)),
            QueryType::Ptr => answer
                .answers
                .extend(parse_names(&entry.ptr).into_iter().map(RecordData::Ptr)),
            QueryType::Mx => {
                for exchange in parse_names(&entry.mx) {
                    if entry.mx_glue {
                        if let Some(host) =
                            self.zone.get(&zone_key(&exchange.to_ascii()))
                        {
                            answer.additional.extend(host.a.iter().map(|&a| {
                                (exchange.clone(), RecordData::A(a))
                            }));
                            answer.additional.extend(host.aaaa.iter().map(
                                |&a| (exchange.clone(), RecordData::Aaaa(a)),
                            ));
                        }
                    }
                    answer.answers.push(RecordData::Mx(exchange));
                }
            },
        }

        if answer.answers.is_empty() {
            return Err(DnsError::NotFound);
        }

        Ok(answer)
    }
}

impl Resolver for StaticResolver {
    fn resolve(
        &self,
        name: &Name,
        query_type: QueryType,
    ) -> impl Future<Output = Result<Answer, DnsError>> + Send {
        std::future::ready(self.answer(name, query_type))
    }
}

fn zone_key(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// One MX exchange, with any addresses the server supplied as glue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MxHost {
    pub exchange: Arc<Name>,
    pub glue: Vec<IpAddr>,
}

/// A cache of DNS records used by one SPF check.
///
/// The evaluator creates entries with status `New` as it discovers them. The
/// driver is responsible for actually fetching them and updating their status
/// as they become available.
#[derive(Debug, Default)]
pub struct Cache {
    pub name_intern: HashMap<String, Arc<Name>>,
    pub a: CacheMap<Vec<Ipv4Addr>>,
    pub aaaa: CacheMap<Vec<Ipv6Addr>>,
    pub txt: CacheMap<Vec<Arc<str>>>,
    pub mx: CacheMap<Vec<MxHost>>,
    /// Keyed by the reverse-pointer name of the address.
    pub ptr: CacheMap<Vec<Arc<Name>>>,
}

// These are association lists instead of hash maps because <Name as Hash>
// allocates like there's no tomorrow, and ultimately these won't be very big.
pub type CacheMap<T> = Vec<(Arc<Name>, Entry<T>)>;

/// An entry in the DNS cache passed to the SPF evaluator.
#[derive(Debug)]
pub enum Entry<T> {
    /// The query succeeded, and these are its results.
    Ok(T),
    /// NXDOMAIN, or the query succeeded and returned no results.
    NotFound,
    /// The query failed.
    Error,
    /// The query is in-flight.
    Pending,
    /// The evaluator newly discovered the need for this query.
    New,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheError {
    NotFound,
    Error,
    NotReady,
}

/// Look `name` up in `cache`.
///
/// If `name` is not in the cache, put it into the `New` status and return
/// `NotReady`.
pub fn look_up<'c, T>(
    cache: &'c mut CacheMap<T>,
    name: &Arc<Name>,
) -> Result<&'c T, CacheError> {
    // Work around https://github.com/rust-lang/rust/issues/54663
    let position = cache.iter().position(|e| *e.0 == **name);
    if let Some(position) = position {
        match cache[position].1 {
            Entry::Ok(ref v) => Ok(v),
            Entry::NotFound => Err(CacheError::NotFound),
            Entry::Error => Err(CacheError::Error),
            Entry::Pending | Entry::New => Err(CacheError::NotReady),
        }
    } else {
        cache.push((Arc::clone(name), Entry::New));
        Err(CacheError::NotReady)
    }
}

impl Cache {
    /// Returns the shared `Name` for `s`, parsing it on first use.
    pub fn intern_domain(&mut self, s: &str) -> Option<Arc<Name>> {
        if let Some(name) = self.name_intern.get(s) {
            return Some(Arc::clone(name));
        }

        let name = Arc::new(fqdn(Name::from_ascii(s).ok()?));
        self.name_intern.insert(s.to_owned(), Arc::clone(&name));
        Some(name)
    }

    /// Moves every `New` entry to `Pending` and returns the queries that need
    /// to be made.
    pub fn take_new(&mut self) -> Vec<(Arc<Name>, QueryType)> {
        fn take<T>(
            map: &mut CacheMap<T>,
            query_type: QueryType,
            out: &mut Vec<(Arc<Name>, QueryType)>,
        ) {
            for entry in map {
                if matches!(entry.1, Entry::New) {
                    entry.1 = Entry::Pending;
                    out.push((Arc::clone(&entry.0), query_type));
                }
            }
        }

        let mut out = Vec::new();
        take(&mut self.txt, QueryType::Txt, &mut out);
        take(&mut self.a, QueryType::A, &mut out);
        take(&mut self.aaaa, QueryType::Aaaa, &mut out);
        take(&mut self.mx, QueryType::Mx, &mut out);
        take(&mut self.ptr, QueryType::Ptr, &mut out);
        out
    }

    /// Stores the outcome of a query returned by `take_new`.
    pub fn complete(
        &mut self,
        name: &Name,
        query_type: QueryType,
        result: Result<Answer, DnsError>,
    ) {
        let answer = match result {
            Ok(answer) => answer,
            Err(DnsError::NotFound) => {
                self.store(name, query_type, Outcome::NotFound);
                return;
            },
            Err(e) => {
                warn!("DNS {query_type:?} lookup of {name} failed: {e}");
                self.store(name, query_type, Outcome::Error);
                return;
            },
        };

        let Answer {
            answers,
            additional,
        } = answer;
        match query_type {
            QueryType::Txt => {
                let v = answers
                    .into_iter()
                    .filter_map(|r| match r {
                        RecordData::Txt(s) => Some(Arc::from(s)),
                        _ => None,
                    })
                    .collect::<Vec<Arc<str>>>();
                set(&mut self.txt, name, to_entry(v));
            },
            QueryType::A => {
                let v = answers
                    .into_iter()
                    .filter_map(|r| match r {
                        RecordData::A(a) => Some(a),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                set(&mut self.a, name, to_entry(v));
            },
            QueryType::Aaaa => {
                let v = answers
                    .into_iter()
                    .filter_map(|r| match r {
                        RecordData::Aaaa(a) => Some(a),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                set(&mut self.aaaa, name, to_entry(v));
            },
            QueryType::Mx => {
                let v = answers
                    .into_iter()
                    .filter_map(|r| match r {
                        RecordData::Mx(exchange) => Some(fqdn(exchange)),
                        _ => None,
                    })
                    .map(|exchange| {
                        let glue = additional
                            .iter()
                            .filter(|(owner, _)| fqdn(owner.clone()) == exchange)
                            .filter_map(|(_, data)| match *data {
                                RecordData::A(a) => Some(IpAddr::V4(a)),
                                RecordData::Aaaa(a) => Some(IpAddr::V6(a)),
                                _ => None,
                            })
                            .collect::<Vec<_>>();
                        MxHost {
                            exchange: Arc::new(exchange),
                            glue,
                        }
                    })
                    .collect::<Vec<_>>();
                set(&mut self.mx, name, to_entry(v));
            },
            QueryType::Ptr => {
                let v = answers
                    .into_iter()
                    .filter_map(|r| match r {
                        RecordData::Ptr(n) => Some(Arc::new(fqdn(n))),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                set(&mut self.ptr, name, to_entry(v));
            },
        }
    }

    fn store(&mut self, name: &Name, query_type: QueryType, outcome: Outcome) {
        fn entry<T>(outcome: Outcome) -> Entry<T> {
            match outcome {
                Outcome::NotFound => Entry::NotFound,
                Outcome::Error => Entry::Error,
            }
        }

        match query_type {
            QueryType::Txt => set(&mut self.txt, name, entry(outcome)),
            QueryType::A => set(&mut self.a, name, entry(outcome)),
            QueryType::Aaaa => set(&mut self.aaaa, name, entry(outcome)),
            QueryType::Mx => set(&mut self.mx, name, entry(outcome)),
            QueryType::Ptr => set(&mut self.ptr, name, entry(outcome)),
        }
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    NotFound,
    Error,
}

/// Maps the response code of an answer without records onto `DnsError`.
///
/// Hickory reports every answer lacking the requested records as
/// `NoRecordsFound`, including server failures and refusals. Only NXDOMAIN
/// and an empty NOERROR answer actually mean there is nothing there.
fn classify_response_code(response_code: ResponseCode) -> DnsError {
    match response_code {
        ResponseCode::NXDomain | ResponseCode::NoError => DnsError::NotFound,
        code => DnsError::ServerFailure(code.to_string()),
    }
}

/// Names in the cache are always fully-qualified so that they compare equal
/// regardless of where they came from.
pub fn fqdn(mut name: Name) -> Name {
    name.set_fqdn(true);
    name
}

fn to_entry<T>(v: Vec<T>) -> Entry<Vec<T>> {
    if v.is_empty() {
        Entry::NotFound
    } else {
        Entry::Ok(v)
    }
}

fn set<T>(map: &mut CacheMap<T>, name: &Name, new_entry: Entry<T>) {
    if let Some(entry) = map.iter_mut().find(|e| *e.0 == *name) {
        entry.1 = new_entry;
    } else {
        debug!("storing unrequested DNS answer for {name}");
        map.push((Arc::new(name.clone()), new_entry));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn rdn(s: &str) -> Arc<Name> {
        Arc::new(Name::from_ascii(s).unwrap())
    }

    #[test]
    fn empty_answers_are_classified_by_response_code() {
        assert_eq!(
            DnsError::NotFound,
            classify_response_code(ResponseCode::NXDomain),
        );
        assert_eq!(
            DnsError::NotFound,
            classify_response_code(ResponseCode::NoError),
        );
        for code in [
            ResponseCode::ServFail,
            ResponseCode::Refused,
            ResponseCode::FormErr,
            ResponseCode::NotImp,
        ] {
            assert_matches!(
                DnsError::ServerFailure(_),
                classify_response_code(code),
            );
        }
    }

    #[test]
    fn look_up_registers_new_entries() {
        let mut cache = Cache::default();
        let name = rdn("example.com");

        assert_eq!(
            Err(CacheError::NotReady),
            look_up(&mut cache.a, &name).map(|v| v.clone()),
        );
        assert_eq!(vec![(name.clone(), QueryType::A)], cache.take_new());
        // Now pending, so not offered again
        assert!(cache.take_new().is_empty());
        assert_eq!(
            Err(CacheError::NotReady),
            look_up(&mut cache.a, &name).map(|v| v.clone()),
        );

        cache.complete(
            &name,
            QueryType::A,
            Ok(Answer {
                answers: vec![RecordData::A(Ipv4Addr::new(192, 0, 2, 1))],
                additional: vec![],
            }),
        );
        assert_eq!(
            Ok(vec![Ipv4Addr::new(192, 0, 2, 1)]),
            look_up(&mut cache.a, &name).map(|v| v.clone()),
        );
        // Names compare case-insensitively
        assert_eq!(
            Ok(vec![Ipv4Addr::new(192, 0, 2, 1)]),
            look_up(&mut cache.a, &rdn("EXAMPLE.com")).map(|v| v.clone()),
        );
    }

    #[test]
    fn complete_maps_errors() {
        let mut cache = Cache::default();
        let nx = rdn("nx.example.com");
        let empty = rdn("empty.example.com");
        let broken = rdn("broken.example.com");
        for name in [&nx, &empty, &broken] {
            let _ = look_up(&mut cache.txt, name);
        }
        assert_eq!(3, cache.take_new().len());

        cache.complete(&nx, QueryType::Txt, Err(DnsError::NotFound));
        cache.complete(&empty, QueryType::Txt, Ok(Answer::default()));
        cache.complete(&broken, QueryType::Txt, Err(DnsError::Timeout));

        assert_eq!(
            Err(CacheError::NotFound),
            look_up(&mut cache.txt, &nx).map(|_| ()),
        );
        assert_eq!(
            Err(CacheError::NotFound),
            look_up(&mut cache.txt, &empty).map(|_| ()),
        );
        assert_eq!(
            Err(CacheError::Error),
            look_up(&mut cache.txt, &broken).map(|_| ()),
        );
    }

    #[test]
    fn complete_attaches_mx_glue() {
        let mut cache = Cache::default();
        let domain = rdn("example.com");
        let _ = look_up(&mut cache.mx, &domain);
        cache.take_new();

        cache.complete(
            &domain,
            QueryType::Mx,
            Ok(Answer {
                answers: vec![
                    RecordData::Mx(Name::from_ascii("mx1.example.com.").unwrap()),
                    RecordData::Mx(Name::from_ascii("mx2.example.com.").unwrap()),
                ],
                additional: vec![(
                    Name::from_ascii("MX1.example.com.").unwrap(),
                    RecordData::A(Ipv4Addr::new(192, 0, 2, 25)),
                )],
            }),
        );

        let hosts = look_up(&mut cache.mx, &domain).unwrap();
        assert_eq!(2, hosts.len());
        assert_eq!(
            vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 25))],
            hosts[0].glue,
        );
        assert!(hosts[1].glue.is_empty());
    }

    #[test]
    fn intern_domain_shares_names() {
        let mut cache = Cache::default();
        let a = cache.intern_domain("example.com").unwrap();
        let b = cache.intern_domain("example.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.intern_domain("bad..example.com").is_none());
    }

    #[tokio::main(flavor = "current_thread")]
    async fn resolve(
        resolver: &StaticResolver,
        name: &str,
        query_type: QueryType,
    ) -> Result<Answer, DnsError> {
        resolver
            .resolve(&Name::from_ascii(name).unwrap(), query_type)
            .await
    }

    #[test]
    fn static_resolver_answers() {
        let mut resolver = StaticResolver::default();
        resolver.insert(
            "Example.com.",
            StaticEntry {
                txt: vec!["v=spf1 mx -all".to_owned()],
                mx: vec!["mail.example.com".to_owned()],
                mx_glue: true,
                ..StaticEntry::default()
            },
        );
        resolver.insert(
            "mail.example.com",
            StaticEntry {
                a: vec![Ipv4Addr::new(192, 0, 2, 25)],
                ..StaticEntry::default()
            },
        );
        resolver.insert(
            "broken.example.com",
            StaticEntry {
                servfail: true,
                ..StaticEntry::default()
            },
        );

        assert_eq!(
            Ok(vec![RecordData::Txt("v=spf1 mx -all".to_owned())]),
            resolve(&resolver, "example.com", QueryType::Txt)
                .map(|a| a.answers),
        );
        let mx = resolve(&resolver, "EXAMPLE.COM.", QueryType::Mx).unwrap();
        assert_eq!(
            vec![RecordData::Mx(Name::from_ascii("mail.example.com").unwrap())],
            mx.answers,
        );
        assert_eq!(1, mx.additional.len());
        assert_eq!(
            Err(DnsError::NotFound),
            resolve(&resolver, "example.com", QueryType::Aaaa),
        );
        assert_eq!(
            Err(DnsError::NotFound),
            resolve(&resolver, "nx.example.com", QueryType::A),
        );
        assert_matches!(
            Err(DnsError::ServerFailure(..)),
            resolve(&resolver, "broken.example.com", QueryType::A),
        );
        assert_eq!(5, resolver.query_log().len());
    }

    #[test]
    fn static_zone_from_toml() {
        let zone: HashMap<String, StaticEntry> = toml::from_str(
            r#"
            ["example.com"]
            txt = ["v=spf1 ip4:192.0.2.0/24 -all"]
            a = ["192.0.2.1"]

            ["timeout.example.com"]
            timeout = true
            "#,
        )
        .unwrap();
        let resolver = StaticResolver::new(zone);

        assert_eq!(
            Ok(vec![RecordData::A(Ipv4Addr::new(192, 0, 2, 1))]),
            resolve(&resolver, "example.com", QueryType::A).map(|a| a.answers),
        );
        assert_eq!(
            Err(DnsError::Timeout),
            resolve(&resolver, "timeout.example.com", QueryType::Txt),
        );
    }
}
