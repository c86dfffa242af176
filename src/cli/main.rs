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

use std::fmt::Write as _;
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use structopt::StructOpt;

use spfcheck::spf::{macros, Checker, Evaluation, Limits, Query, Record};
use spfcheck::support::dns::{
    fqdn, HickoryResolver, Name, Resolver, StaticResolver,
};
use spfcheck::support::sysexits::*;
use spfcheck::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    Check(CheckSubcommand),
    /// Parse an SPF record and print it in canonical form.
    ///
    /// Exits with EX_DATAERR if the record is not valid.
    Parse(ParseSubcommand),
    /// Expand SPF macros in a string.
    ///
    /// No DNS lookups are made, so %{p} is not supported.
    Expand(ExpandSubcommand),
}

/// Evaluate SPF for a client IP address and domain.
///
/// The verdict (one of none, neutral, pass, fail, softfail, temperror,
/// permerror) is printed to standard output. The exit status is 0 for any
/// verdict other than the errors. temperror exits with EX_TEMPFAIL and
/// permerror with EX_DATAERR.
#[derive(StructOpt)]
struct CheckSubcommand {
    /// The IP address of the SMTP client.
    #[structopt(long)]
    ip: IpAddr,

    /// The domain whose policy is checked; usually the domain of the MAIL
    /// FROM address, or the HELO domain.
    #[structopt(long)]
    domain: String,

    /// The MAIL FROM address. Defaults to postmaster@<domain>.
    #[structopt(long)]
    sender: Option<String>,

    /// The HELO/EHLO domain given by the client.
    #[structopt(long)]
    helo: Option<String>,

    /// Give up after this many seconds with temperror.
    #[structopt(long)]
    timeout: Option<u64>,

    /// Path to the TOML configuration file.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Answer DNS queries from this TOML zone file instead of the network.
    #[structopt(long, parse(from_os_str))]
    records: Option<PathBuf>,

    /// Explain how the verdict was reached. Repeat for debug logging.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u32,
}

#[derive(StructOpt)]
struct ParseSubcommand {
    /// The domain the record is published at.
    #[structopt(long, default_value = "example.com")]
    domain: String,

    /// The TXT record, including the "v=spf1 " prefix.
    record: String,
}

#[derive(StructOpt)]
struct ExpandSubcommand {
    /// The IP address of the SMTP client.
    #[structopt(long)]
    ip: IpAddr,

    /// The current domain, substituted for %{d}.
    #[structopt(long)]
    domain: String,

    /// The MAIL FROM address. Defaults to postmaster@<domain>.
    #[structopt(long)]
    sender: Option<String>,

    /// The HELO/EHLO domain given by the client.
    #[structopt(long)]
    helo: Option<String>,

    /// Treat the template as a domain name, shortening the result if it is
    /// too long.
    #[structopt(long)]
    domain_spec: bool,

    /// The string to expand.
    template: String,
}

pub fn main() {
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    match cmd {
        Command::Check(cmd) => check(cmd),
        Command::Parse(cmd) => parse(cmd),
        Command::Expand(cmd) => expand(cmd),
    }
}

fn check(cmd: CheckSubcommand) {
    let config = match cmd.config {
        None => SystemConfig::default(),
        Some(ref path) => match SystemConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error in config file at '{}': {}", path.display(), e);
                EX_CONFIG.exit()
            },
        },
    };

    if let Some(ref log_config_file) = config.diagnostic.log_config {
        if let Err(e) = log4rs::init_file(
            log_config_file,
            log4rs::file::Deserializers::default(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e,
            );
            EX_CONFIG.exit();
        }
    } else {
        init_simple_log(match cmd.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        });
    }

    let query = Query {
        ip: cmd.ip,
        domain: cmd.domain.clone(),
        sender: cmd.sender.clone(),
        helo: Some(cmd.helo.clone().unwrap_or_else(|| config.check.helo.clone())),
    };
    let timeout = cmd
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.check.timeout());

    let evaluation = if let Some(ref records) = cmd.records {
        let resolver = match StaticResolver::load(records) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Error loading '{}': {}", records.display(), e);
                EX_NOINPUT.exit()
            },
        };

        block_on(evaluate(resolver, config.limits.clone(), timeout, &query))
    } else {
        block_on(async {
            let resolver = match HickoryResolver::new(&config.resolver) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("{e}");
                    EX_CONFIG.exit()
                },
            };

            evaluate(resolver, config.limits.clone(), timeout, &query).await
        })
    };

    println!("{}", evaluation.verdict);
    if cmd.verbose > 0 {
        print!("{}", describe(&evaluation, &config.limits));
    }

    let status = Sysexit::for_verdict(evaluation.verdict);
    if EX_OK != status {
        status.exit();
    }
}

async fn evaluate<R: Resolver>(
    resolver: R,
    limits: Limits,
    timeout: Duration,
    query: &Query,
) -> Evaluation {
    Checker::new(resolver)
        .with_limits(limits)
        .with_timeout(timeout)
        .evaluate(query)
        .await
}

/// The explanation printed under the verdict in verbose mode.
fn describe(evaluation: &Evaluation, limits: &Limits) -> String {
    let mut s = String::new();
    for m in &evaluation.matches {
        let _ = writeln!(s, "  matched {} at {}", m.directive, m.domain);
    }
    if let Some(ref error) = evaluation.error {
        let _ = writeln!(s, "  error: {error}");
    }
    let _ = writeln!(
        s,
        "  DNS mechanisms: {}/{}",
        evaluation.dns_mechanisms, limits.max_dns_mechanisms,
    );
    let _ = match limits.max_void_lookups {
        Some(max) => {
            writeln!(s, "  void lookups: {}/{}", evaluation.void_lookups, max)
        },
        None => writeln!(s, "  void lookups: {}", evaluation.void_lookups),
    };
    s
}

fn parse(cmd: ParseSubcommand) {
    let domain = parse_name(&cmd.domain);
    match Record::parse(&cmd.record, domain) {
        Ok(record) => {
            println!("{record}");
            if let Some(redirect) = record.redirect.as_deref() {
                if record.effective_redirect().is_none() {
                    println!("(redirect={redirect} is ignored due to 'all')");
                }
            }
        },
        Err(e) => {
            eprintln!("Invalid SPF record: {e}");
            EX_DATAERR.exit()
        },
    }
}

fn expand(cmd: ExpandSubcommand) {
    let query = Query {
        ip: cmd.ip,
        domain: cmd.domain.clone(),
        sender: cmd.sender,
        helo: cmd.helo,
    };
    let identity = query.identity();
    let domain = parse_name(&cmd.domain);

    let result = if cmd.domain_spec {
        macros::expand_domain(&cmd.template, &identity, &domain)
    } else {
        macros::expand(&cmd.template, &identity, &domain)
    };

    match result {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("Cannot expand '{}': {}", cmd.template, e);
            EX_DATAERR.exit()
        },
    }
}

fn parse_name(domain: &str) -> Arc<Name> {
    match Name::from_ascii(domain) {
        Ok(name) => Arc::new(fqdn(name)),
        Err(e) => {
            eprintln!("Invalid domain '{domain}': {e}");
            EX_USAGE.exit()
        },
    }
}

fn block_on<F: Future>(future: F) -> F::Output {
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt.block_on(future),
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            EX_SOFTWARE.exit()
        },
    }
}

fn init_simple_log(level: log::LevelFilter) {
    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}][{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message,
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply();

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {e}");
        EX_SOFTWARE.exit();
    }
}
