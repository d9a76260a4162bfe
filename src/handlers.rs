//! Event handlers for the Discord bot.
//!
//! Each public function in this module handles one category of gateway event.
//! Handlers receive the shared [`BotContext`] for the REST client, catalog
//! store and bot identity.

use rand::Rng;
use tracing::{error, info};

use crate::bot::BotContext;
use crate::catalog::CatalogStore;
use crate::command::{self, ParsedCommand};
use crate::render;
use crate::types::{CreateMessage, Message, ReadyEvent};

// ---------------------------------------------------------------------------
// READY handler
// ---------------------------------------------------------------------------

/// Called when the bot receives the READY event from the gateway.
pub async fn on_ready(ctx: &BotContext, ready: &ReadyEvent) {
    info!(
        user = %ready.user.tag(),
        guilds = ready.guilds.len(),
        "bot is ready!"
    );
    ctx.state.lock().await.bot_user_id = Some(ready.user.id.clone());
}

// ---------------------------------------------------------------------------
// MESSAGE_CREATE handler
// ---------------------------------------------------------------------------

/// Called for every message the bot can see. Replies to song commands;
/// everything else is ignored. Send failures are logged, never propagated.
pub async fn on_message(ctx: &BotContext, msg: &Message) {
    let own_id = ctx.state.lock().await.bot_user_id.clone();
    if is_own_or_bot(msg, own_id.as_deref()) {
        return;
    }

    // The rng must not live across the send below.
    let reply = {
        let mut rng = rand::thread_rng();
        respond(msg, &ctx.store, &mut rng)
    };
    let Some(reply) = reply else {
        return;
    };

    if let Err(e) = ctx.http.create_message(&msg.channel_id, &reply).await {
        error!(
            error = %e,
            channel_id = %msg.channel_id,
            message_id = %msg.id,
            "failed to send reply"
        );
    }
}

/// Messages from bots (this one included) never trigger replies.
fn is_own_or_bot(msg: &Message, own_id: Option<&str>) -> bool {
    msg.author.bot || own_id == Some(msg.author.id.as_str())
}

/// Parse `msg` and build its reply, if it gets one.
fn respond<R>(msg: &Message, store: &CatalogStore, rng: &mut R) -> Option<CreateMessage>
where
    R: Rng + ?Sized,
{
    let parsed = command::parse(&msg.content);
    if parsed == ParsedCommand::NotACommand {
        return None;
    }

    info!(
        author = %msg.author.tag(),
        channel_id = %msg.channel_id,
        guild_id = msg.guild_id.as_deref().unwrap_or("-"),
        command = %msg.content.trim(),
        parsed = ?parsed,
        "received command"
    );

    render::reply(&parsed, store, rng).map(|body| body.reply_to(msg.id.clone()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Entry, Tier};
    use crate::types::User;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn message(content: &str, bot: bool) -> Message {
        Message {
            id: "100".into(),
            channel_id: "200".into(),
            guild_id: Some("300".into()),
            author: User {
                id: "400".into(),
                username: "rin".into(),
                discriminator: None,
                bot,
                global_name: None,
            },
            content: content.into(),
        }
    }

    fn store() -> CatalogStore {
        let store = CatalogStore::new();
        store.commit(Catalog::new(vec![Entry::new("Melt", Tier::Master, 26)]));
        store
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1)
    }

    // -- is_own_or_bot() ---------------------------------------------------

    #[test]
    fn bot_authors_are_skipped() {
        assert!(is_own_or_bot(&message("/m26", true), None));
        assert!(!is_own_or_bot(&message("/m26", false), None));
    }

    #[test]
    fn own_messages_are_skipped() {
        assert!(is_own_or_bot(&message("/m26", false), Some("400")));
        assert!(!is_own_or_bot(&message("/m26", false), Some("999")));
    }

    // -- respond() ---------------------------------------------------------

    #[test]
    fn chatter_gets_no_reply() {
        assert!(respond(&message("hello there", false), &store(), &mut rng()).is_none());
    }

    #[test]
    fn malformed_commands_get_no_reply() {
        assert!(respond(&message("/zz99", false), &store(), &mut rng()).is_none());
        assert!(respond(&message("/m2a", false), &store(), &mut rng()).is_none());
    }

    #[test]
    fn song_command_replies_to_the_message() {
        let reply = respond(&message("/m26", false), &store(), &mut rng()).unwrap();
        let reference = reply.message_reference.unwrap();
        assert_eq!(reference.message_id.as_deref(), Some("100"));
        let embed = &reply.embeds.unwrap()[0];
        assert_eq!(embed.description.as_deref(), Some("**Melt**\nMASTER Lv. 26"));
    }

    #[test]
    fn no_match_is_a_plain_text_reply() {
        let reply = respond(&message("/e5", false), &store(), &mut rng()).unwrap();
        assert_eq!(reply.content.as_deref(), Some(render::NO_MATCH_TEXT));
        assert!(reply.message_reference.is_some());
    }

    #[test]
    fn empty_store_reports_not_loaded() {
        let reply = respond(&message("/all", false), &CatalogStore::new(), &mut rng()).unwrap();
        assert_eq!(reply.content.as_deref(), Some(render::EMPTY_CATALOG_TEXT));
    }
}
