use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::str::FromStr;

pub type PollId = i64;
pub type VoterId = i64;
pub type OptionId = i64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollType {
    Single,
    Multiple,
}

impl PollType {
    pub fn name(&self) -> &'static str {
        match self {
            PollType::Single => "single",
            PollType::Multiple => "multiple",
        }
    }

    /// Most selections a single ballot may carry, given the poll's option count
    pub fn max_selections(&self, num_options: usize) -> usize {
        match self {
            PollType::Single => 1,
            PollType::Multiple => num_options,
        }
    }
}

impl Display for PollType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PollType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(PollType::Single),
            "multiple" => Ok(PollType::Multiple),
            _ => Err(format!("unknown poll type '{}'", s)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Draft,
    Active,
    Closed,
}

impl PollStatus {
    pub fn name(&self) -> &'static str {
        match self {
            PollStatus::Draft => "draft",
            PollStatus::Active => "active",
            PollStatus::Closed => "closed",
        }
    }
}

impl Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PollStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PollStatus::Draft),
            "active" => Ok(PollStatus::Active),
            "closed" => Ok(PollStatus::Closed),
            _ => Err(format!("unknown poll status '{}'", s)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PollOption {
    pub id: OptionId,
    pub poll_id: PollId,
    pub option_text: String,
    pub display_order: i64,
}

/// A poll as seen by the ballot box.
///
/// Polls are owned by the surrounding application; the ballot box only reads them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub title: String,
    pub poll_type: PollType,
    pub allow_revote: bool,

    /// Inclusive start of the voting window
    pub start_date: Option<DateTime<Utc>>,

    /// Inclusive end of the voting window
    pub end_date: Option<DateTime<Utc>>,

    pub status: PollStatus,

    /// Options in display order
    pub options: Vec<PollOption>,
}

impl Poll {
    /// Get an option with the given ID
    pub fn get_option(&self, option_id: OptionId) -> Option<&PollOption> {
        self.options.iter().find(|opt| opt.id == option_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    /// Whether `now` falls inside the inclusive `[start_date, end_date]` window
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_date {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if now > end {
                return false;
            }
        }
        true
    }

    pub fn max_selections(&self) -> usize {
        self.poll_type.max_selections(self.options.len())
    }
}

/// A poll to be created by a store's `add_poll`.
///
/// Used to seed stores from tests and the CLI, poll management proper lives
/// outside this crate.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewPoll {
    pub title: String,
    pub poll_type: PollType,
    pub allow_revote: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: PollStatus,
    pub options: Vec<String>,
}

impl NewPoll {
    /// An active poll with no voting window
    pub fn new(title: &str, poll_type: PollType, options: &[&str]) -> Self {
        NewPoll {
            title: title.to_owned(),
            poll_type,
            allow_revote: false,
            start_date: None,
            end_date: None,
            status: PollStatus::Active,
            options: options.iter().map(|o| o.to_string()).collect(),
        }
    }
}
