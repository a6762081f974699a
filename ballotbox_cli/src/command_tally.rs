use crate::{parse_id, print_json, SqliteBallotBox};

pub async fn command_tally(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    let poll_id = parse_id(matches, "POLL-ID")?;
    let tally = ballot_box.tally(poll_id).await?;

    if tally.skipped_count > 0 {
        eprintln!(
            "ballotbox tally: {} ballot(s) could not be read and were not counted",
            tally.skipped_count
        );
    }
    print_json(&tally)
}
