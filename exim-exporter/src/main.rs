use std::env;
use std::process::ExitCode;
use std::time::Duration;

use getopts::{Matches, Options};
use metrics_exporter_exim::EximExporterBuilder;
use tracing::{error, info};

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

pub fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt("l", "listen", "address to serve metrics on (default 0.0.0.0:8000)", "ADDRESS");
    opts.optopt("i", "interval", "number of seconds between polls (default 60)", "INTEGER");
    opts.optopt("t", "timeout", "number of seconds each command may run (default 30)", "INTEGER");
    opts.optopt("", "eximstats", "path to the eximstats program (default eximstats)", "PATH");
    opts.optopt(
        "",
        "mainlog",
        "path to the Exim main log (default /var/log/exim4/mainlog)",
        "PATH",
    );
    opts.optopt("", "exim", "path to the exim program (default exim)", "PATH");
    opts.optopt("", "hostname", "value of the hostname label (default: detected)", "STRING");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn seconds(matches: &Matches, name: &str) -> Result<Option<Duration>, String> {
    matches
        .opt_str(name)
        .map(|value| {
            value
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("invalid --{name} value `{value}`: {e}"))
        })
        .transpose()
}

fn configure(matches: &Matches) -> Result<EximExporterBuilder, String> {
    let mut builder = EximExporterBuilder::new();

    if let Some(listen) = matches.opt_str("listen") {
        builder = builder.with_listen_address(listen).map_err(|e| e.to_string())?;
    }
    if let Some(interval) = seconds(matches, "interval")? {
        builder = builder.with_poll_interval(interval).map_err(|e| e.to_string())?;
    }
    if let Some(timeout) = seconds(matches, "timeout")? {
        builder = builder.with_command_timeout(timeout).map_err(|e| e.to_string())?;
    }

    if matches.opt_present("eximstats") || matches.opt_present("mainlog") {
        let eximstats = matches.opt_str("eximstats").unwrap_or_else(|| "eximstats".to_owned());
        let mainlog =
            matches.opt_str("mainlog").unwrap_or_else(|| "/var/log/exim4/mainlog".to_owned());
        builder = builder
            .with_report_command(eximstats, ["-html".to_owned(), mainlog])
            .map_err(|e| e.to_string())?;
    }
    if let Some(exim) = matches.opt_str("exim") {
        builder = builder
            .with_queue_count_command(exim.as_str(), ["-bpc"])
            .and_then(|builder| builder.with_queue_listing_command(exim.as_str(), ["-bp"]))
            .map_err(|e| e.to_string())?;
    }
    if let Some(hostname) = matches.opt_str("hostname") {
        builder = builder.with_hostname(hostname);
    }

    Ok(builder)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map_or("exim-exporter", String::as_str);
    let opts = opts();

    let matches = match opts.parse(args.iter().skip(1)) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return ExitCode::FAILURE;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return ExitCode::SUCCESS;
    }

    let builder = match configure(&matches) {
        Ok(builder) => builder,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create Tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let poller = match builder.install() {
            Ok(poller) => poller,
            Err(e) => {
                error!("failed to start exporter: {}", e);
                return ExitCode::FAILURE;
            }
        };

        info!(hostname = poller.handle().hostname(), "exim exporter started");
        poller
            .run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("shutdown requested");
            })
            .await;

        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::{configure, opts};

    fn parse(args: &[&str]) -> Result<(), String> {
        let matches = opts().parse(args).map_err(|e| e.to_string())?;
        configure(&matches).map(|_| ())
    }

    #[test]
    fn accepts_every_option() {
        assert_eq!(
            parse(&[
                "--listen",
                "127.0.0.1:9636",
                "-i",
                "30",
                "-t",
                "10",
                "--eximstats",
                "/usr/sbin/eximstats",
                "--mainlog",
                "/var/log/exim/main.log",
                "--exim",
                "/usr/sbin/exim",
                "--hostname",
                "mx1",
            ]),
            Ok(())
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["--interval", "soon"]).is_err());
        assert!(parse(&["--interval", "0"]).is_err());
        assert!(parse(&["--timeout", "0"]).is_err());
        assert!(parse(&["--listen", "nowhere"]).is_err());
        assert!(parse(&["--exim", ""]).is_err());
    }
}
