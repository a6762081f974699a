use crate::{parse_id, print_json, SqliteBallotBox};
use anyhow::{bail, Context};
use ballotbox::{NewPoll, PollStatus, PollType, Store};
use chrono::{DateTime, Utc};

pub async fn command_poll(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    match matches.subcommand() {
        ("add", Some(matches)) => command_poll_add(matches, ballot_box).await,
        ("status", Some(matches)) => command_poll_status(matches, ballot_box).await,
        ("show", Some(matches)) => command_poll_show(matches, ballot_box).await,
        _ => Ok(()),
    }
}

async fn command_poll_add(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    let title = matches.value_of("TITLE").unwrap_or_default();
    let options: Vec<String> = matches
        .values_of("OPTIONS")
        .map(|values| values.map(str::to_owned).collect())
        .unwrap_or_default();

    let new_poll = NewPoll {
        title: title.to_owned(),
        poll_type: parse_value::<PollType>(matches, "type")?,
        allow_revote: matches.is_present("allow-revote"),
        start_date: parse_time(matches, "start")?,
        end_date: parse_time(matches, "end")?,
        status: parse_value::<PollStatus>(matches, "status")?,
        options,
    };

    if let (Some(start), Some(end)) = (new_poll.start_date, new_poll.end_date) {
        if end < start {
            bail!("--end must not be before --start");
        }
    }

    let poll = ballot_box.store().add_poll(new_poll).await?;
    tracing::info!(poll_id = poll.id, "poll created");
    print_json(&poll)
}

async fn command_poll_status(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    let poll_id = parse_id(matches, "POLL-ID")?;
    let status = parse_value::<PollStatus>(matches, "STATUS")?;

    if !ballot_box.store().set_poll_status(poll_id, status).await? {
        bail!("no poll with id {}", poll_id);
    }
    println!("poll {} is now {}", poll_id, status);
    Ok(())
}

async fn command_poll_show(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    let poll_id = parse_id(matches, "POLL-ID")?;
    let poll = ballot_box
        .store()
        .get_poll(poll_id)
        .await?
        .with_context(|| format!("no poll with id {}", poll_id))?;
    print_json(&poll)
}

fn parse_value<T>(matches: &clap::ArgMatches, name: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    matches
        .value_of(name)
        .unwrap_or_default()
        .parse()
        .map_err(anyhow::Error::msg)
}

fn parse_time(matches: &clap::ArgMatches, name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
    match matches.value_of(name) {
        Some(value) => {
            let time = DateTime::parse_from_rfc3339(value)
                .with_context(|| format!("--{} must be an RFC 3339 time", name))?;
            Ok(Some(time.with_timezone(&Utc)))
        }
        None => Ok(None),
    }
}
