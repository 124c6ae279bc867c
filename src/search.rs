//! Paged message search for a single channel or guild

use crate::endpoints::{self, ApiRequest};
use crate::transport::Dispatcher;
use crate::types::{Channel, Guild, MessagePage, Result, Snowflake};
use std::fmt;
use tracing::debug;

/// Where a search is scoped
#[derive(Debug, Clone, Copy)]
pub enum SearchContext<'a> {
    Channel(&'a Channel),
    Guild(&'a Guild),
}

impl SearchContext<'_> {
    fn request(&self, author_id: &Snowflake, seek: u32) -> ApiRequest {
        match self {
            SearchContext::Channel(channel) => {
                endpoints::channel_search(&channel.id, author_id, seek)
            }
            SearchContext::Guild(guild) => endpoints::guild_search(&guild.id, author_id, seek),
        }
    }
}

impl fmt::Display for SearchContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchContext::Channel(channel) => write!(f, "channel {}", channel.label()),
            SearchContext::Guild(guild) => write!(f, "guild {} ('{}')", guild.id, guild.name),
        }
    }
}

/// Fetch the page of hits authored by `author_id` starting at offset `seek`
///
/// Pages come back in server order. A search the server refuses (403) is
/// reported as an empty page, which ends the caller's loop for that context.
pub async fn fetch_page(
    dispatcher: &mut Dispatcher,
    context: SearchContext<'_>,
    author_id: &Snowflake,
    seek: u32,
) -> Result<MessagePage> {
    let page: MessagePage = dispatcher
        .send(&context.request(author_id, seek))
        .await?
        .unwrap_or_default();

    debug!(
        "Search in {} at offset {}: {} context groups, {} total results",
        context,
        seek,
        page.context_groups.len(),
        page.total_results
    );
    Ok(page)
}
