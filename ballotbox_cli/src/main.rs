use anyhow::Context;
use ballotbox::{BallotBox, Config, SqliteStore, TracingAuditSink};
use clap::{App, AppSettings, Arg, SubCommand};
use tracing_subscriber::EnvFilter;

mod command_keygen;
mod command_poll;
mod command_tally;
mod command_vote;

use command_keygen::command_keygen;
use command_poll::command_poll;
use command_tally::command_tally;
use command_vote::{command_cast, command_receipt, command_verify};

pub type SqliteBallotBox = BallotBox<SqliteStore, TracingAuditSink>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let voter = || {
        Arg::with_name("voter")
            .long("voter")
            .takes_value(true)
            .required(true)
            .help("Voter id")
    };

    let matches = App::new("BallotBox CLI")
        .version("0.1")
        .about("Cast, verify and tally encrypted ballots")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("database")
                .long("database")
                .takes_value(true)
                .help("Database url - can also be set with BALLOTBOX_DATABASE_URL"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(SubCommand::with_name("keygen").about("Generate a ballot encryption key"))
        .subcommand(
            SubCommand::with_name("poll")
                .about("Manage polls")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("add")
                        .about("Create a poll")
                        .arg(Arg::with_name("TITLE").index(1).required(true))
                        .arg(
                            Arg::with_name("OPTIONS")
                                .index(2)
                                .multiple(true)
                                .required(true)
                                .help("Option texts, in display order"),
                        )
                        .arg(
                            Arg::with_name("type")
                                .long("type")
                                .takes_value(true)
                                .possible_values(&["single", "multiple"])
                                .default_value("single"),
                        )
                        .arg(
                            Arg::with_name("status")
                                .long("status")
                                .takes_value(true)
                                .possible_values(&["draft", "active", "closed"])
                                .default_value("active"),
                        )
                        .arg(
                            Arg::with_name("allow-revote")
                                .long("allow-revote")
                                .help("Let voters replace their ballot"),
                        )
                        .arg(
                            Arg::with_name("start")
                                .long("start")
                                .takes_value(true)
                                .help("Voting opens at this RFC 3339 time"),
                        )
                        .arg(
                            Arg::with_name("end")
                                .long("end")
                                .takes_value(true)
                                .help("Voting closes at this RFC 3339 time"),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("status")
                        .about("Change a poll's status")
                        .arg(Arg::with_name("POLL-ID").index(1).required(true))
                        .arg(
                            Arg::with_name("STATUS")
                                .index(2)
                                .required(true)
                                .possible_values(&["draft", "active", "closed"]),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("show")
                        .about("Print a poll and its options")
                        .arg(Arg::with_name("POLL-ID").index(1).required(true)),
                ),
        )
        .subcommand(
            SubCommand::with_name("cast")
                .about("Cast a ballot")
                .arg(Arg::with_name("POLL-ID").index(1).required(true))
                .arg(
                    Arg::with_name("OPTION-ID")
                        .index(2)
                        .multiple(true)
                        .required(true),
                )
                .arg(voter()),
        )
        .subcommand(
            SubCommand::with_name("receipt")
                .about("Look up a receipt")
                .arg(Arg::with_name("RECEIPT-ID").index(1).required(true))
                .arg(voter()),
        )
        .subcommand(
            SubCommand::with_name("verify")
                .about("Check whether a voter has an active ballot")
                .arg(Arg::with_name("POLL-ID").index(1).required(true))
                .arg(voter()),
        )
        .subcommand(
            SubCommand::with_name("tally")
                .about("Decrypt and count every ballot in a poll")
                .arg(Arg::with_name("POLL-ID").index(1).required(true)),
        )
        .get_matches();

    let default_level = match matches.occurrences_of("v") {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Needs no configuration
    if matches.subcommand_matches("keygen").is_some() {
        command_keygen();
        return Ok(());
    }

    let mut config = Config::from_env().context("unable to load configuration")?;
    if let Some(url) = matches.value_of("database") {
        config.database_url = expand(url);
    }

    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("unable to open {}", config.database_url))?;
    let ballot_box = BallotBox::from_config(store, &config, TracingAuditSink);

    match matches.subcommand() {
        ("poll", Some(matches)) => command_poll(matches, &ballot_box).await,
        ("cast", Some(matches)) => command_cast(matches, &ballot_box).await,
        ("receipt", Some(matches)) => command_receipt(matches, &ballot_box).await,
        ("verify", Some(matches)) => command_verify(matches, &ballot_box).await,
        ("tally", Some(matches)) => command_tally(matches, &ballot_box).await,
        _ => Ok(()),
    }
}

/// Expand `~` and environment variables in a path-like argument
pub fn expand(input: &str) -> String {
    shellexpand::full(input)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| input.to_owned())
}

/// Parse a required numeric positional or flag
pub fn parse_id(matches: &clap::ArgMatches, name: &str) -> anyhow::Result<i64> {
    let value = matches
        .value_of(name)
        .with_context(|| format!("{} is required", name))?;
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be an integer, got {:?}", name, value))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
