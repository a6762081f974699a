use crate::{parse_id, print_json, SqliteBallotBox};
use anyhow::Context;

pub async fn command_cast(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    let poll_id = parse_id(matches, "POLL-ID")?;
    let voter_id = parse_id(matches, "voter")?;
    let selected = matches
        .values_of("OPTION-ID")
        .into_iter()
        .flatten()
        .map(|id| {
            id.trim()
                .parse()
                .with_context(|| format!("option id must be an integer, got {:?}", id))
        })
        .collect::<anyhow::Result<Vec<i64>>>()?;

    let receipt = ballot_box.cast(poll_id, voter_id, &selected).await?;
    print_json(&receipt)
}

pub async fn command_receipt(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    let receipt_id = matches.value_of("RECEIPT-ID").unwrap_or_default();
    let voter_id = parse_id(matches, "voter")?;

    let receipt = ballot_box.get_receipt(receipt_id.trim(), voter_id).await?;
    print_json(&receipt)
}

pub async fn command_verify(
    matches: &clap::ArgMatches<'_>,
    ballot_box: &SqliteBallotBox,
) -> anyhow::Result<()> {
    let poll_id = parse_id(matches, "POLL-ID")?;
    let voter_id = parse_id(matches, "voter")?;

    let verification = ballot_box.verify(poll_id, voter_id).await?;
    print_json(&verification)
}
