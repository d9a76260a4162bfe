//! Text command grammar.
//!
//! Commands are short slash-prefixed strings such as `/m26`, `/x27-28`,
//! `/30-` or `/h`. The optional letter picks a tier, the numbers pick a level
//! or level range. `/all` and `/help` are literals checked before the
//! grammar.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::Tier;

/// Command prefix character.
pub const PREFIX: char = '/';

/// Lowest level a filter can ask for.
pub const LEVEL_FLOOR: u32 = 0;

/// Implicit ceiling used when a range is open-ended.
pub const LEVEL_CEILING: u32 = 100;

static FILTER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/([a-z]+)?([0-9]+)?(?:-([0-9]+)?)?$").expect("filter pattern is valid")
});

// ---------------------------------------------------------------------------
// FilterSpec
// ---------------------------------------------------------------------------

/// Resolved selection criteria. `min_level <= max_level` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSpec {
    difficulty: Option<Tier>,
    min_level: u32,
    max_level: u32,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            difficulty: None,
            min_level: LEVEL_FLOOR,
            max_level: LEVEL_CEILING,
        }
    }
}

impl FilterSpec {
    /// Inclusive range between two bounds given in either order.
    pub fn new(difficulty: Option<Tier>, a: u32, b: u32) -> Self {
        Self {
            difficulty,
            min_level: a.min(b),
            max_level: a.max(b),
        }
    }

    /// Only charts of exactly `level`.
    pub fn exact(difficulty: Option<Tier>, level: u32) -> Self {
        Self::new(difficulty, level, level)
    }

    /// `level` and above, up to the implicit ceiling (or `level` itself when
    /// it already exceeds the ceiling).
    pub fn at_least(difficulty: Option<Tier>, level: u32) -> Self {
        Self::new(difficulty, level, LEVEL_CEILING.max(level))
    }

    /// From the floor up to `level`.
    pub fn at_most(difficulty: Option<Tier>, level: u32) -> Self {
        Self::new(difficulty, LEVEL_FLOOR, level)
    }

    /// Every level of one tier (or every chart when `difficulty` is `None`).
    pub fn tier(difficulty: Option<Tier>) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }

    pub fn difficulty(&self) -> Option<Tier> {
        self.difficulty
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Whether a chart at `tier`/`level` satisfies this filter.
    pub fn matches(&self, tier: Tier, level: u32) -> bool {
        (self.min_level..=self.max_level).contains(&level)
            && self.difficulty.map_or(true, |wanted| wanted == tier)
    }
}

// ---------------------------------------------------------------------------
// ParsedCommand
// ---------------------------------------------------------------------------

/// Outcome of parsing one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Does not start with the prefix; not addressed to us.
    NotACommand,
    /// `/help`
    Help,
    /// `/all`: any chart in the catalog.
    AllSongs,
    /// A tier and/or level filter.
    Filter(FilterSpec),
    /// Prefixed but not something we understand. Ignored without reply.
    Unrecognized,
}

/// Parse raw message text into a command.
pub fn parse(raw: &str) -> ParsedCommand {
    let content = raw.trim().to_lowercase();
    if !content.starts_with(PREFIX) {
        return ParsedCommand::NotACommand;
    }

    match content.as_str() {
        "/all" => return ParsedCommand::AllSongs,
        "/help" => return ParsedCommand::Help,
        _ => {}
    }

    let Some(caps) = FILTER_PATTERN.captures(&content) else {
        return ParsedCommand::Unrecognized;
    };

    let difficulty = match caps.get(1) {
        Some(letters) => match Tier::from_letters(letters.as_str()) {
            Some(tier) => Some(tier),
            None => return ParsedCommand::Unrecognized,
        },
        None => None,
    };

    // Digits only, so the sole failure here is overflow.
    let level = |i: usize| caps.get(i).map(|m| m.as_str().parse::<u32>()).transpose();
    let (Ok(low), Ok(high)) = (level(2), level(3)) else {
        return ParsedCommand::Unrecognized;
    };

    let spec = match (low, high) {
        (Some(a), Some(b)) => FilterSpec::new(difficulty, a, b),
        (Some(a), None) if content.contains('-') => FilterSpec::at_least(difficulty, a),
        (Some(a), None) => FilterSpec::exact(difficulty, a),
        (None, Some(b)) => FilterSpec::at_most(difficulty, b),
        (None, None) if difficulty.is_none() => return ParsedCommand::Unrecognized,
        (None, None) => FilterSpec::tier(difficulty),
    };

    ParsedCommand::Filter(spec)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
