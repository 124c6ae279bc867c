//! Deletion driver
//!
//! Consumes search pages for one context and deletes the hits they contain.
//!
//! The seek cursor is the only thing that moves pagination forward, so every
//! hit is mapped onto an explicit [`HitAction`] whose [`SeekEffect`] is fixed:
//! a real deletion removes the message from the search index and the next
//! candidate slides into the same offset, so the cursor holds; anything that
//! leaves the message in place (or pretends to remove it in a dry run) must
//! step over it.

use crate::endpoints;
use crate::search::{self, SearchContext};
use crate::transport::{DeleteOutcome, Dispatcher};
use crate::types::{Error, Message, MessagePage, Result, ResultExt, RunCounters, Snowflake};
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after each real deletion, to stay under the server's rate limit
/// instead of waiting for it to throttle us
pub const MIN_DELETE_INTERVAL: Duration = Duration::from_millis(200);

/// Consecutive non-empty pages without a hit before a context is considered drained
const MAX_HITLESS_PAGES: u32 = 2;

/// Why a hit was left in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// System entry such as a call request
    NotDeletable,
    /// The hit lives in a channel the operator asked to keep
    SkippedChannel,
    /// The server refused to delete it
    Denied,
}

/// What to do with a hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitAction {
    Skip(SkipReason),
    /// Dry run: count it but don't touch the server
    Simulate,
    Delete,
}

/// How an action moves the seek cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekEffect {
    Advance,
    Hold,
}

impl HitAction {
    pub fn seek_effect(self) -> SeekEffect {
        match self {
            HitAction::Skip(_) | HitAction::Simulate => SeekEffect::Advance,
            HitAction::Delete => SeekEffect::Hold,
        }
    }

    pub fn counts_as_deleted(self) -> bool {
        matches!(self, HitAction::Simulate | HitAction::Delete)
    }
}

/// Result of processing one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// No context group contained a hit; the cursor did not move
    NoHit,
    /// The action taken on the last hit handled
    Handled(HitAction),
}

/// Operator choices that shape a run
#[derive(Debug, Clone)]
pub struct DeletionPolicy {
    pub dry_run: bool,
    pub skip_channels: HashSet<Snowflake>,
    pub delete_interval: Duration,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_channels: HashSet::new(),
            delete_interval: MIN_DELETE_INTERVAL,
        }
    }
}

impl DeletionPolicy {
    pub fn skips(&self, channel_id: &Snowflake) -> bool {
        self.skip_channels.contains(channel_id)
    }

    /// Decide what happens to a hit
    pub fn classify(&self, hit: &Message) -> HitAction {
        if !hit.is_deletable() {
            HitAction::Skip(SkipReason::NotDeletable)
        } else if self.skips(&hit.channel_id) {
            HitAction::Skip(SkipReason::SkippedChannel)
        } else if self.dry_run {
            HitAction::Simulate
        } else {
            HitAction::Delete
        }
    }
}

/// Deletes the hits of search pages according to a [`DeletionPolicy`]
pub struct DeletionDriver {
    policy: DeletionPolicy,
}

impl DeletionDriver {
    pub fn new(policy: DeletionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DeletionPolicy {
        &self.policy
    }

    /// Walk the hits of `page`, stepping over skipped ones, until one is
    /// deleted (or would be, in a dry run)
    ///
    /// A deletion changes what the server returns at this offset, so the rest
    /// of the page is stale and left for the next fetch.
    pub async fn process_page(
        &self,
        dispatcher: &mut Dispatcher,
        page: &MessagePage,
        seek: &mut u32,
        counters: &mut RunCounters,
    ) -> Result<PageOutcome> {
        let mut last = None;

        for hit in page.hits() {
            let action = self.apply(dispatcher, hit).await?;
            if action.counts_as_deleted() {
                counters.deleted += 1;
            }
            if action.seek_effect() == SeekEffect::Advance {
                *seek += 1;
            }
            last = Some(action);
            if action.counts_as_deleted() {
                break;
            }
        }

        match last {
            Some(action) => Ok(PageOutcome::Handled(action)),
            None => {
                debug!("Page at offset {} holds only context messages", seek);
                Ok(PageOutcome::NoHit)
            }
        }
    }

    async fn apply(&self, dispatcher: &mut Dispatcher, hit: &Message) -> Result<HitAction> {
        let action = self.policy.classify(hit);
        match action {
            HitAction::Skip(SkipReason::NotDeletable) => {
                debug!(
                    "Found message {} of non-zero type {}, incrementing seek index",
                    hit.id, hit.kind
                );
            }
            HitAction::Skip(SkipReason::SkippedChannel) => {
                info!(
                    "Skipping message deletion for channel {} (message {})",
                    hit.channel_id, hit.id
                );
            }
            // only produced from a delete reply below
            HitAction::Skip(SkipReason::Denied) => {}
            HitAction::Simulate => {
                info!(
                    "Deleting message {} from channel {} (dry run)",
                    hit.id, hit.channel_id
                );
            }
            HitAction::Delete => {
                info!("Deleting message {} from channel {}", hit.id, hit.channel_id);
                let outcome = dispatcher
                    .delete(&endpoints::delete_message(&hit.channel_id, &hit.id))
                    .await
                    .context("Error deleting message")?;
                tokio::time::sleep(self.policy.delete_interval).await;

                if outcome == DeleteOutcome::Denied {
                    warn!(
                        "Not allowed to delete message {} from channel {}, incrementing seek index",
                        hit.id, hit.channel_id
                    );
                    return Ok(HitAction::Skip(SkipReason::Denied));
                }
            }
        }
        Ok(action)
    }

    /// Run the fetch/process loop for one context until its search runs dry
    pub async fn drain(
        &self,
        dispatcher: &mut Dispatcher,
        context: SearchContext<'_>,
        author_id: &Snowflake,
        counters: &mut RunCounters,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut seek = 0;
        let mut hitless_pages = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let page = search::fetch_page(dispatcher, context, author_id, seek)
                .await
                .context(format!("Error fetching messages for {}", context))?;
            if page.is_empty() {
                info!("No more messages to delete for {}", context);
                return Ok(());
            }

            match self.process_page(dispatcher, &page, &mut seek, counters).await? {
                PageOutcome::NoHit => {
                    hitless_pages += 1;
                    if hitless_pages >= MAX_HITLESS_PAGES {
                        warn!(
                            "Search for {} keeps returning pages without hits at offset {}, moving on",
                            context, seek
                        );
                        return Ok(());
                    }
                }
                PageOutcome::Handled(_) => hitless_pages = 0,
            }
        }
    }
}
