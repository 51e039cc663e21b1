//! Engine configuration: clocks, retry limits and the stake tier catalog.

use crate::engine::GameKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },

    #[error("Invalid tier {entry_fee}/{payout}: {reason}")]
    InvalidTier {
        entry_fee: i64,
        payout: i64,
        reason: String,
    },
}

/// Result type for configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Timers and limits shared by every match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a seeker waits in the queue before giving up
    pub search_timeout: Duration,
    /// Waiting entries read per search attempt
    pub search_batch: usize,
    /// Pause between pairing and arming
    pub splash: Duration,
    /// Countdown between arming and the first move
    pub countdown: Duration,
    /// Rolling per-turn clock
    pub turn_timeout: Duration,
    /// Extra time the waiting player allows before enforcing a timeout
    pub turn_grace: Duration,
    /// Lives per player; each timeout costs one
    pub lives: u8,
    /// Age after which a settlement guard lock may be taken over
    pub settlement_lock_ttl: Duration,
    /// Attempts at escrow before a match aborts
    pub arm_retry_limit: u32,
    /// Pause between escrow attempts
    pub arm_retry_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(60),
            search_batch: 20,
            splash: Duration::from_secs(3),
            countdown: Duration::from_secs(3),
            turn_timeout: Duration::from_secs(15),
            turn_grace: Duration::from_secs(5),
            lives: 3,
            settlement_lock_ttl: Duration::from_secs(30),
            arm_retry_limit: 3,
            arm_retry_delay: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `DUEL_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    ///
    /// # Errors
    ///
    /// Returns error if the loaded values fail `validate`
    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();
        let config = Self {
            search_timeout: env_secs("DUEL_SEARCH_TIMEOUT_SECS", defaults.search_timeout),
            search_batch: parse_env_or("DUEL_SEARCH_BATCH", defaults.search_batch),
            splash: env_secs("DUEL_SPLASH_SECS", defaults.splash),
            countdown: env_secs("DUEL_COUNTDOWN_SECS", defaults.countdown),
            turn_timeout: env_secs("DUEL_TURN_TIMEOUT_SECS", defaults.turn_timeout),
            turn_grace: env_secs("DUEL_TURN_GRACE_SECS", defaults.turn_grace),
            lives: parse_env_or("DUEL_LIVES", defaults.lives),
            settlement_lock_ttl: env_secs("DUEL_SETTLEMENT_LOCK_TTL_SECS", defaults.settlement_lock_ttl),
            arm_retry_limit: parse_env_or("DUEL_ARM_RETRY_LIMIT", defaults.arm_retry_limit),
            arm_retry_delay: Duration::from_millis(parse_env_or(
                "DUEL_ARM_RETRY_DELAY_MS",
                defaults.arm_retry_delay.as_millis() as u64,
            )),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ConfigResult<()> {
        if self.search_timeout.is_zero() {
            return Err(invalid("DUEL_SEARCH_TIMEOUT_SECS", "Must be greater than 0"));
        }

        if self.search_batch == 0 {
            return Err(invalid("DUEL_SEARCH_BATCH", "Must be greater than 0"));
        }

        if self.turn_timeout.is_zero() {
            return Err(invalid("DUEL_TURN_TIMEOUT_SECS", "Must be greater than 0"));
        }

        if self.lives == 0 {
            return Err(invalid("DUEL_LIVES", "Must be at least 1"));
        }

        if self.arm_retry_limit == 0 {
            return Err(invalid("DUEL_ARM_RETRY_LIMIT", "Must be at least 1"));
        }

        // A lock must outlive the slowest ledger commit
        if self.settlement_lock_ttl < crate::db::timeouts::Budget::Transaction.duration() {
            return Err(invalid(
                "DUEL_SETTLEMENT_LOCK_TTL_SECS",
                &format!(
                    "Must be at least the ledger transaction timeout ({:?})",
                    crate::db::timeouts::Budget::Transaction.duration()
                ),
            ));
        }

        Ok(())
    }
}

/// A fixed stake: entry fee and the prize paid to a winner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tier {
    pub game: GameKind,
    pub entry_fee: i64,
    pub payout: i64,
}

impl Tier {
    /// Create a tier.
    ///
    /// The payout must stay below the two collected fees so the house keeps
    /// a positive edge on every decisive match.
    ///
    /// # Errors
    ///
    /// * `ConfigError::InvalidTier` - Non-positive amounts or payout ≥ 2 × fee
    pub fn new(game: GameKind, entry_fee: i64, payout: i64) -> ConfigResult<Self> {
        let reject = |reason: &str| ConfigError::InvalidTier {
            entry_fee,
            payout,
            reason: reason.to_string(),
        };

        if entry_fee <= 0 {
            return Err(reject("entry fee must be positive"));
        }
        if payout <= 0 {
            return Err(reject("payout must be positive"));
        }
        let pot = entry_fee
            .checked_mul(2)
            .ok_or_else(|| reject("entry fee too large"))?;
        if payout >= pot {
            return Err(reject("payout must be below twice the entry fee"));
        }

        Ok(Self {
            game,
            entry_fee,
            payout,
        })
    }

    /// Queue partition key, `"{game}-{fee}-{payout}"`
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.game, self.entry_fee, self.payout)
    }

    /// House edge on a decisive match
    pub fn house_edge(&self) -> i64 {
        2 * self.entry_fee - self.payout
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} for {}", self.game, self.entry_fee, self.payout)
    }
}

/// The tiers a player may choose from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCatalog {
    tiers: Vec<Tier>,
}

impl TierCatalog {
    pub fn new(tiers: Vec<Tier>) -> Self {
        Self { tiers }
    }

    /// Default lobby: three stakes per game
    pub fn standard() -> ConfigResult<Self> {
        let mut tiers = Vec::new();
        for game in [GameKind::Grid, GameKind::Card] {
            for (fee, payout) in [(10, 18), (25, 45), (100, 180)] {
                tiers.push(Tier::new(game, fee, payout)?);
            }
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Tiers for one game, cheapest first
    pub fn for_game(&self, game: GameKind) -> Vec<Tier> {
        let mut tiers: Vec<Tier> = self.tiers.iter().filter(|t| t.game == game).copied().collect();
        tiers.sort_by_key(|t| t.entry_fee);
        tiers
    }

    /// Look up a tier by its queue key
    pub fn find(&self, key: &str) -> Option<Tier> {
        self.tiers.iter().find(|t| t.key() == key).copied()
    }

    /// Tiers a balance can afford
    pub fn affordable(&self, game: GameKind, total_balance: i64) -> Vec<Tier> {
        self.for_game(game)
            .into_iter()
            .filter(|t| t.entry_fee <= total_balance)
            .collect()
    }
}

fn invalid(var: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var: var.to_string(),
        reason: reason.to_string(),
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_env_or(key, default.as_secs()))
}

/// Helper to parse environment variable with default fallback
pub(crate) fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
