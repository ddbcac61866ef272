use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use serde_json::Value;
use std::process::ExitCode;

use settle::config::{create_sample_config, load_config, override_args};
use settle::{conditions, wait_for, RemoteClient, Retrier};

const EXIT_SUCCESS: u8 = 0;
const EXIT_TIMEOUT: u8 = 1;
const EXIT_FATAL: u8 = 2;

fn cli() -> Command {
    Command::new("settle")
        .version(settle::VERSION)
        .about("Wait for remote resources to settle")
        .subcommand_required(true)
        .subcommand(
            Command::new("wait")
                .about("Poll a URL until a condition holds")
                .arg(
                    Arg::new("url")
                        .value_name("URL")
                        .required(true)
                        .help("Absolute URL or path relative to http.base_url"),
                )
                .arg(
                    Arg::new("pointer")
                        .long("pointer")
                        .short('p')
                        .value_name("POINTER")
                        .requires("equals")
                        .conflicts_with("status")
                        .help("JSON pointer into the response body, e.g. /status/phase"),
                )
                .arg(
                    Arg::new("equals")
                        .long("equals")
                        .short('e')
                        .value_name("VALUE")
                        .requires("pointer")
                        .help("Expected value at the pointer, as JSON or a bare string"),
                )
                .arg(
                    Arg::new("status")
                        .long("status")
                        .short('s')
                        .value_name("CODE")
                        .value_parser(value_parser!(u16))
                        .help("Expected HTTP status (default 200)"),
                )
                .args(override_args()),
        )
        .subcommand(
            Command::new("probe")
                .about("Fetch a URL once, retrying transient failures")
                .arg(Arg::new("url").value_name("URL").required(true))
                .args(override_args()),
        )
        .subcommand(
            Command::new("sample-config")
                .about("Write the default configuration as TOML")
                .arg(Arg::new("path").value_name("PATH").required(true)),
        )
}

/// `--equals 3` compares against the number 3, `--equals ready` against the
/// string "ready".
fn parse_expected(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run_wait(matches: &ArgMatches) -> Result<bool> {
    let config_path = matches.get_one::<String>("config");
    let config = load_config(config_path.map(|s| s.as_str()), matches)?;

    let client = RemoteClient::new(&config.http).context("Failed to build HTTP client")?;
    let retrier = Retrier::new(config.retry.clone());
    let options = config.wait.to_options();

    let url = matches
        .get_one::<String>("url")
        .context("missing URL")?
        .as_str();

    if let Some(pointer) = matches.get_one::<String>("pointer") {
        let raw = matches
            .get_one::<String>("equals")
            .context("--pointer requires --equals")?;
        let expected = parse_expected(raw);

        let outcome = wait_for(
            &format!("{url}{pointer} == {expected}"),
            || conditions::json_pointer_equals(&retrier, &client, url, pointer, &expected),
            &options,
        )
        .await?;

        if let Some(doc) = &outcome.payload {
            println!("{doc}");
        }
        Ok(outcome.success)
    } else {
        let expected = matches.get_one::<u16>("status").copied().unwrap_or(200);

        let outcome = wait_for(
            &format!("{url} status == {expected}"),
            || conditions::http_status_is(&retrier, &client, url, expected),
            &options,
        )
        .await?;

        Ok(outcome.success)
    }
}

async fn run_probe(matches: &ArgMatches) -> Result<()> {
    let config_path = matches.get_one::<String>("config");
    let config = load_config(config_path.map(|s| s.as_str()), matches)?;

    let client = RemoteClient::new(&config.http).context("Failed to build HTTP client")?;
    let url = matches
        .get_one::<String>("url")
        .context("missing URL")?
        .as_str();

    let response = Retrier::new(config.retry)
        .call(&format!("GET {url}"), || client.get(url))
        .await
        .with_context(|| format!("GET {url} failed"))?;

    println!("{}", response.body);
    Ok(())
}

/// `Ok(false)` means a wait ran out of time.
async fn run(matches: ArgMatches) -> Result<bool> {
    match matches.subcommand() {
        Some(("wait", sub)) => run_wait(sub).await,
        Some(("probe", sub)) => {
            run_probe(sub).await?;
            Ok(true)
        }
        Some(("sample-config", sub)) => {
            let path = sub.get_one::<String>("path").context("missing PATH")?;
            create_sample_config(path)?;
            Ok(true)
        }
        _ => Err(anyhow::anyhow!("unknown command")),
    }
}

fn exit_status(result: &Result<bool>) -> u8 {
    match result {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => EXIT_TIMEOUT,
        Err(_) => EXIT_FATAL,
    }
}

async fn run_to_exit_status<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let result = match cli().try_get_matches_from(args) {
        Ok(matches) => run(matches).await,
        Err(e) => {
            // --help and --version land here too
            let _ = e.print();
            return if e.use_stderr() { EXIT_FATAL } else { EXIT_SUCCESS };
        }
    };

    if let Err(e) = &result {
        log::error!("{e:#}");
    }
    exit_status(&result)
}

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    ExitCode::from(run_to_exit_status(std::env::args_os()).await)
}
