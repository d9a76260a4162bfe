//! Turning parsed commands into outbound message bodies.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::catalog::{CatalogStore, Entry, Tier};
use crate::command::{ParsedCommand, LEVEL_CEILING};
use crate::selector::{self, NoMatch};
use crate::types::{CreateMessage, Embed};

/// Color for embeds that are not about a particular tier.
pub const NEUTRAL_COLOR: u32 = 0x95a5a6;

pub const EMPTY_CATALOG_TEXT: &str = "The song list is empty or still loading. Try again shortly.";
pub const NO_MATCH_TEXT: &str = "No songs matched that request.";

/// Build the reply for a parsed command, reading the store's current
/// snapshot once. `None` means the message gets no reply.
pub fn reply<R>(
    command: &ParsedCommand,
    store: &CatalogStore,
    rng: &mut R,
) -> Option<CreateMessage>
where
    R: Rng + ?Sized,
{
    let snapshot = store.snapshot();
    let catalog = &snapshot.catalog;
    let picked = match command {
        ParsedCommand::NotACommand | ParsedCommand::Unrecognized => return None,
        ParsedCommand::Help => {
            let embed = help_embed(catalog.len(), snapshot.committed_at);
            return Some(CreateMessage::new().embed(embed));
        }
        ParsedCommand::AllSongs => selector::select_any(catalog, rng),
        ParsedCommand::Filter(spec) => selector::select(catalog, spec, rng),
    };

    let body = match picked {
        Ok(entry) => CreateMessage::new().embed(song_embed(entry)),
        Err(reason) => CreateMessage::new().content(no_match_text(reason)),
    };
    Some(body)
}

/// Embed announcing a selected chart, colored by tier.
pub fn song_embed(entry: &Entry) -> Embed {
    Embed::new()
        .description(format!(
            "**{}**\n{} Lv. {}",
            entry.title, entry.difficulty, entry.level
        ))
        .color(entry.difficulty.color())
}

pub fn no_match_text(reason: NoMatch) -> &'static str {
    match reason {
        NoMatch::EmptyCatalog => EMPTY_CATALOG_TEXT,
        NoMatch::NothingMatched => NO_MATCH_TEXT,
    }
}

/// Static usage guide, with a footer describing the loaded catalog.
pub fn help_embed(entries: usize, updated_at: Option<DateTime<Utc>>) -> Embed {
    let tiers = Tier::ALL
        .iter()
        .map(|t| format!("`{}` {}", t.letter(), t.name()))
        .collect::<Vec<_>>()
        .join("\n");

    let footer = match updated_at {
        Some(at) => format!(
            "{entries} charts loaded, updated {}",
            at.format("%Y-%m-%d %H:%M UTC")
        ),
        None => "Song list not loaded yet".to_string(),
    };

    Embed::new()
        .title("Song selector")
        .description("Pick a random chart. Add a tier letter and/or a level to narrow it down.")
        .color(NEUTRAL_COLOR)
        .field("`/all`", "Any chart at all", false)
        .field("`/m26`", "MASTER, level 26 exactly", true)
        .field("`/x27-28`", "EXPERT, level 27 to 28", true)
        .field("`/30-`", format!("Any tier, level 30 to {LEVEL_CEILING}"), true)
        .field("`/-20`", "Any tier, level 20 or lower", true)
        .field("`/h`", "Any HARD chart", true)
        .field("Tier letters", tiers, false)
        .footer(footer)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
