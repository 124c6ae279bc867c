//! Target enumeration
//!
//! Discovers everything the account can have written to (open DMs,
//! relationships without an open DM, guilds) and drains each one in turn.

use crate::driver::{DeletionDriver, DeletionPolicy};
use crate::endpoints::{self, ApiRequest};
use crate::search::SearchContext;
use crate::transport::Dispatcher;
use crate::types::{Channel, Error, Guild, Me, Relationship, Result, ResultExt, RunCounters};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs a full purge for one account
pub struct TargetEnumerator {
    dispatcher: Dispatcher,
    driver: DeletionDriver,
    cancel: CancellationToken,
}

impl TargetEnumerator {
    pub fn new(dispatcher: Dispatcher, policy: DeletionPolicy, cancel: CancellationToken) -> Self {
        Self {
            dispatcher,
            driver: DeletionDriver::new(policy),
            cancel,
        }
    }

    /// Delete every reachable message and report the totals
    ///
    /// The first unrecoverable error ends the run. Messages deleted up to that
    /// point stay deleted; running again picks up whatever search still finds.
    pub async fn run(mut self) -> Result<RunCounters> {
        let mut counters = RunCounters::default();
        let result = self.purge(&mut counters).await;
        counters.requests = self.dispatcher.requests();

        match result {
            Ok(()) => {
                info!(
                    "Finished deleting messages: {} deleted in {} total requests",
                    counters.deleted, counters.requests
                );
                Ok(counters)
            }
            Err(e) if matches!(e.root(), Error::Cancelled) => {
                warn!(
                    "Cancelled: {} deleted in {} total requests before stopping",
                    counters.deleted, counters.requests
                );
                Err(Error::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    async fn purge(&mut self, counters: &mut RunCounters) -> Result<()> {
        self.check_cancelled()?;
        let me: Me = self
            .dispatcher
            .send_expecting(&endpoints::me())
            .await
            .context("Error fetching profile information")?;
        debug!("Authenticated as {}", me.id);

        let channels: Vec<Channel> = self
            .fetch_list(&endpoints::channels())
            .await
            .context("Error fetching channels")?;
        info!("Found {} open channels", channels.len());

        for channel in &channels {
            self.check_cancelled()?;
            if self.driver.policy().skips(&channel.id) {
                info!("Skipping message deletion for channel {}", channel.label());
                continue;
            }
            self.driver
                .drain(
                    &mut self.dispatcher,
                    SearchContext::Channel(channel),
                    &me.id,
                    counters,
                    &self.cancel,
                )
                .await?;
        }

        let relationships: Vec<Relationship> = self
            .fetch_list(&endpoints::relationships())
            .await
            .context("Error fetching relationships")?;

        for relation in &relationships {
            self.check_cancelled()?;
            if let Some(open) = open_channel_for(&channels, relation) {
                debug!(
                    "Skipping resolving relation {} (type {}) because channel {} is already open",
                    relation.id, relation.kind, open.id
                );
                continue;
            }

            let request = endpoints::open_dm(&relation.recipient.id)?;
            let channel: Option<Channel> = self
                .dispatcher
                .send(&request)
                .await
                .context("Error resolving relationship to channel")?;
            let Some(channel) = channel else {
                warn!(
                    "Could not resolve relationship with '{}' to a channel",
                    relation.recipient.username
                );
                continue;
            };

            info!(
                "Resolved relationship with '{}' to channel {}",
                relation.recipient.username, channel.id
            );
            if self.driver.policy().skips(&channel.id) {
                info!("Skipping message deletion for channel {}", channel.id);
                continue;
            }
            self.driver
                .drain(
                    &mut self.dispatcher,
                    SearchContext::Channel(&channel),
                    &me.id,
                    counters,
                    &self.cancel,
                )
                .await?;
        }

        let guilds: Vec<Guild> = self
            .fetch_list(&endpoints::guilds())
            .await
            .context("Error fetching guilds")?;
        info!("Found {} guilds", guilds.len());

        for guild in &guilds {
            self.check_cancelled()?;
            if !self.driver.policy().skip_channels.is_empty()
                && let Err(e) = self.log_kept_guild_channels(guild).await
            {
                warn!("{}", e);
            }
            self.driver
                .drain(
                    &mut self.dispatcher,
                    SearchContext::Guild(guild),
                    &me.id,
                    counters,
                    &self.cancel,
                )
                .await?;
        }

        Ok(())
    }

    /// Guild search mixes hits from every channel, so skipped channels are
    /// only honoured per message. Say up front which ones that applies to.
    async fn log_kept_guild_channels(&mut self, guild: &Guild) -> Result<()> {
        let channels: Vec<Channel> = self
            .fetch_list(&endpoints::guild_channels(&guild.id))
            .await
            .context(format!("Error fetching channels for guild {}", guild.id))?;

        for channel in channels
            .iter()
            .filter(|c| self.driver.policy().skips(&c.id))
        {
            info!(
                "Messages in channel {} of guild '{}' will be kept",
                channel.label(),
                guild.name
            );
        }
        Ok(())
    }

    async fn fetch_list<T: DeserializeOwned>(&mut self, request: &ApiRequest) -> Result<Vec<T>> {
        Ok(self.dispatcher.send(request).await?.unwrap_or_default())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The already-open one-to-one channel with a relationship's counterpart
fn open_channel_for<'a>(channels: &'a [Channel], relation: &Relationship) -> Option<&'a Channel> {
    channels.iter().find(|channel| {
        channel
            .sole_recipient()
            .is_some_and(|r| r.id == relation.recipient.id)
    })
}
