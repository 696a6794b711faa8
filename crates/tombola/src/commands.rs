//! # Command Facade
//!
//! **Everything the chat gateway is allowed to ask for.**
//!
//! The gateway parses a chat command, calls one method on [`GameCore`], and
//! renders the returned report (or the error's `Display` text) back into the
//! channel. Nothing here knows about any chat platform.
//!
//! Ledger work is blocking file IO, so every ledger call runs on the blocking
//! pool under the session ledger timeout. A stalled store surfaces as
//! [`CommandError::LedgerTimeout`] instead of parking the gateway's task.
//!
//! ```text
//!  gateway ──► GameCore ──► DrawEngine   (what comes out of a pack)
//!                  │──────► Ledger       (who owns what)
//!                  └──────► SessionHub   (raids and expeditions)
//! ```

use crossbeam_channel::Receiver;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use tombola_economy::{
    Catalog, DrawEngine, DrawOutcome, FileStore, ItemId, Ledger, LedgerResult, MessageReward,
    MessageSample, ParticipantId, PoolId, Rarity,
};
use tombola_session::{
    Broadcaster, HttpNarrator, JoinOutcome, SessionAnnouncement, SessionBroadcast, SessionHub,
    SessionKind, SessionStatus, Trigger,
};

use crate::config::{GameConfig, RewardsConfig};
use crate::error::{CommandError, CommandResult, StartupError};

/// One drawn item, ready to print.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawnItem {
    /// Item id.
    pub item: ItemId,
    /// Catalog name.
    pub name: String,
    /// Rarity tier.
    pub rarity: Rarity,
    /// The pool's label for that tier.
    pub tier_label: String,
}

/// Result of a daily draw or an opened pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawReport {
    /// Raw draw result.
    pub outcome: DrawOutcome,
    /// Printable lines, one per slot.
    pub items: Vec<DrawnItem>,
    /// Packs of this pool left after opening. `None` for the daily draw.
    pub packs_left: Option<u32>,
}

/// One inventory row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryLine {
    /// Item id.
    pub item: ItemId,
    /// Catalog name.
    pub name: String,
    /// Rarity tier.
    pub rarity: Rarity,
    /// Copies owned.
    pub count: u32,
}

/// Unopened packs of one pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackLine {
    /// Pool id.
    pub pool: PoolId,
    /// Pool name.
    pub name: String,
    /// Unopened packs.
    pub count: u32,
}

/// A participant's holdings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryView {
    /// Currency balance.
    pub balance: u64,
    /// Owned items, rarest first.
    pub items: Vec<InventoryLine>,
    /// Unopened packs.
    pub packs: Vec<PackLine>,
    /// Current loadout.
    pub loadout: Vec<ItemId>,
}

/// What a chat message earned.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageReport {
    /// Passive reward decision.
    pub reward: MessageReward,
    /// Session the message happened to start, if any.
    pub started: Option<SessionAnnouncement>,
}

/// The game, as the gateway sees it.
pub struct GameCore {
    engine: Arc<DrawEngine>,
    ledger: Arc<Ledger>,
    hub: Arc<SessionHub>,
    rewards: RewardsConfig,
    operators: HashSet<ParticipantId>,
    ledger_timeout: Duration,
}

impl std::fmt::Debug for GameCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameCore")
            .field("rewards", &self.rewards)
            .field("operators", &self.operators.len())
            .field("ledger_timeout", &self.ledger_timeout)
            .finish_non_exhaustive()
    }
}

impl GameCore {
    /// Assembles a core from already-built parts.
    #[must_use]
    pub fn new(
        engine: Arc<DrawEngine>,
        ledger: Arc<Ledger>,
        hub: Arc<SessionHub>,
        rewards: RewardsConfig,
        operators: &[u64],
        ledger_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            ledger,
            hub,
            rewards,
            operators: operators.iter().copied().map(ParticipantId).collect(),
            ledger_timeout,
        }
    }

    /// Builds the whole game from configuration.
    ///
    /// Must be called inside a tokio runtime. Returns the receiving end of the
    /// session broadcast channel for the gateway to drain.
    pub fn from_config(
        config: &GameConfig,
    ) -> Result<(Self, Receiver<SessionBroadcast>), StartupError> {
        config.validate()?;

        let catalog = Arc::new(Catalog::load(&config.catalog_path)?);
        info!(
            items = catalog.item_count(),
            pools = catalog.pool_ids().len(),
            path = %config.catalog_path.display(),
            "catalog loaded"
        );

        let store = FileStore::open(&config.ledger.data_dir)?;
        info!(dir = %store.dir().display(), "ledger store opened");
        let ledger = Arc::new(Ledger::new(Arc::new(store), config.ledger.settings.clone())?);

        let (broadcaster, updates) = Broadcaster::channel(config.session.broadcast_capacity);
        let narrator = Arc::new(HttpNarrator::from_config(&config.narrator));
        let hub = SessionHub::new(
            config.session.clone(),
            Arc::clone(&ledger),
            Arc::clone(&catalog),
            narrator,
            broadcaster,
        )?;

        let engine = Arc::new(DrawEngine::new(catalog));
        let core = Self::new(
            engine,
            ledger,
            hub,
            config.rewards.clone(),
            &config.operators,
            config.session.ledger_timeout(),
        );
        Ok((core, updates))
    }

    /// The session hub.
    #[must_use]
    pub const fn hub(&self) -> &Arc<SessionHub> {
        &self.hub
    }

    /// The ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// True when `participant` may run operator commands.
    #[must_use]
    pub fn is_operator(&self, participant: ParticipantId) -> bool {
        self.operators.contains(&participant)
    }

    // ------------------------------------------------------------------
    // Draws
    // ------------------------------------------------------------------

    /// Today's free draw from the daily pool.
    pub async fn daily_draw(&self, participant: ParticipantId) -> CommandResult<DrawReport> {
        let outcome = self.engine.draw(self.rewards.daily_pool)?;
        let claim = outcome.clone();
        let claimed = self
            .ledger_call("claim_daily_draw", move |l| l.claim_daily_draw(participant, &claim))
            .await?;
        if !claimed {
            debug!(%participant, "daily draw already claimed");
            return Err(CommandError::DailyAlreadyClaimed);
        }
        Ok(self.report(outcome, None))
    }

    /// Opens one of the participant's packs for `pool`.
    pub async fn open_pack(
        &self,
        participant: ParticipantId,
        pool: PoolId,
    ) -> CommandResult<DrawReport> {
        self.known_pool(pool)?;
        let outcome = self.engine.draw(pool)?;
        let opened = outcome.clone();
        let left = self
            .ledger_call("open_pack", move |l| l.open_pack(participant, &opened))
            .await?;
        Ok(self.report(outcome, Some(left)))
    }

    /// Gives `count` packs of `pool` to `target`. Operators only.
    pub async fn grant_pack(
        &self,
        caller: ParticipantId,
        target: ParticipantId,
        pool: PoolId,
        count: u32,
    ) -> CommandResult<u32> {
        self.require_operator(caller)?;
        self.known_pool(pool)?;
        let total = self
            .ledger_call("grant_pool_pack", move |l| l.grant_pool_pack(target, pool, count))
            .await?;
        info!(%caller, %target, pool, count, total, "packs granted");
        Ok(total)
    }

    // ------------------------------------------------------------------
    // Holdings
    // ------------------------------------------------------------------

    /// Current balance.
    pub async fn balance(&self, participant: ParticipantId) -> CommandResult<u64> {
        self.ledger_call("balance", move |l| l.balance(participant)).await
    }

    /// Everything the participant holds.
    pub async fn inventory(&self, participant: ParticipantId) -> CommandResult<InventoryView> {
        let record = self.ledger_call("snapshot", move |l| l.snapshot(participant)).await?;
        let catalog = self.engine.catalog();

        let mut items: Vec<InventoryLine> = record
            .items()
            .iter()
            .map(|(&item, &count)| {
                let entry = catalog.item(item);
                InventoryLine {
                    item,
                    name: entry.map_or_else(|| format!("item {item}"), |e| e.name.clone()),
                    rarity: entry.map_or(Rarity::Common, |e| e.rarity),
                    count,
                }
            })
            .collect();
        items.sort_by(|a, b| b.rarity.cmp(&a.rarity).then(a.item.cmp(&b.item)));

        let packs = record
            .packs()
            .iter()
            .filter(|&(_, &count)| count > 0)
            .map(|(&pool, &count)| PackLine {
                pool,
                name: catalog
                    .pool(pool)
                    .map_or_else(|| format!("pool {pool}"), |p| p.config().name.clone()),
                count,
            })
            .collect();

        Ok(InventoryView {
            balance: record.balance(),
            items,
            packs,
            loadout: record.loadout().to_vec(),
        })
    }

    /// Replaces the loadout used for sessions.
    pub async fn set_loadout(&self, participant: ParticipantId, items: &[ItemId]) -> CommandResult<()> {
        let items = items.to_vec();
        self.ledger_call("set_loadout", move |l| l.set_loadout(participant, &items))
            .await
    }

    // ------------------------------------------------------------------
    // Chat activity
    // ------------------------------------------------------------------

    /// Handles an ordinary chat message: passive reward, then a chance to
    /// start a session.
    pub async fn on_message(
        &self,
        participant: ParticipantId,
        text: &str,
    ) -> CommandResult<MessageReport> {
        let sample = MessageSample::from_text(text);
        let min_length = self.rewards.min_message_length;
        let cooldown = self.rewards.message_cooldown();
        let reward = self
            .ledger_call("try_claim_message_reward", move |l| {
                l.try_claim_message_reward(participant, sample, min_length, cooldown)
            })
            .await?;
        let started = self.hub.on_community_message();
        Ok(MessageReport { reward, started })
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Joins the running session with the participant's loadout.
    pub async fn join_session(&self, participant: ParticipantId) -> CommandResult<JoinOutcome> {
        Ok(self.hub.join(participant).await?)
    }

    /// Starts a session on demand. Operators only.
    pub fn force_start(
        &self,
        caller: ParticipantId,
        kind: SessionKind,
    ) -> CommandResult<SessionAnnouncement> {
        self.require_operator(caller)?;
        let announcement = self.hub.start(kind, Trigger::Operator)?;
        info!(%caller, session = %announcement.session, %kind, "session forced");
        Ok(announcement)
    }

    /// What the session slot is doing.
    #[must_use]
    pub fn session_status(&self) -> SessionStatus {
        self.hub.status()
    }

    /// Stops schedulers and any running session.
    pub fn shutdown(&self) {
        self.hub.shutdown();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn ledger_call<T, F>(&self, op: &'static str, call: F) -> CommandResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> LedgerResult<T> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        let task = tokio::task::spawn_blocking(move || call(&ledger));
        match tokio::time::timeout(self.ledger_timeout, task).await {
            Ok(Ok(result)) => result.map_err(CommandError::from),
            Ok(Err(join)) => {
                warn!(op, error = %join, "ledger task failed");
                Err(CommandError::LedgerTask(join.to_string()))
            }
            Err(_) => {
                let timeout_ms = u64::try_from(self.ledger_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(op, timeout_ms, "ledger call timed out");
                Err(CommandError::LedgerTimeout)
            }
        }
    }

    fn require_operator(&self, caller: ParticipantId) -> CommandResult<()> {
        if self.is_operator(caller) {
            Ok(())
        } else {
            debug!(%caller, "operator command refused");
            Err(CommandError::NotAuthorized)
        }
    }

    fn known_pool(&self, pool: PoolId) -> CommandResult<()> {
        if self.engine.catalog().pool(pool).is_some() {
            Ok(())
        } else {
            Err(CommandError::UnknownPool(pool))
        }
    }

    fn report(&self, outcome: DrawOutcome, packs_left: Option<u32>) -> DrawReport {
        let catalog = self.engine.catalog();
        let table = catalog.pool(outcome.pool);
        let items = outcome
            .items
            .iter()
            .zip(&outcome.rarities)
            .map(|(&item, &rarity)| DrawnItem {
                item,
                name: catalog
                    .item(item)
                    .map_or_else(|| format!("item {item}"), |e| e.name.clone()),
                rarity,
                tier_label: table.map_or_else(
                    || rarity.as_str().to_string(),
                    |t| t.tier_label(rarity).to_string(),
                ),
            })
            .collect();
        DrawReport {
            outcome,
            items,
            packs_left,
        }
    }
}
