//! Price Oracle Contract for prediction-market collateral
//!
//! Keeps a fixed-size ring buffer of price observations per position token and
//! derives a time-weighted average price from their cumulative price integrals.
//! A deviation circuit breaker refuses observations that jump too far from the
//! current TWAP, and staleness reads let consumers refuse outdated prices.

#![no_std]

use fixed_point_math::{deviation_bps, PRICE_SCALE};
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, Address, Env, Symbol,
    Vec,
};

/// Number of observation slots kept per asset
pub const OBSERVATION_CAPACITY: u32 = 60;

/// Default TWAP lookback window (30 minutes)
pub const DEFAULT_TWAP_WINDOW: u64 = 1_800;

/// Default age after which the latest price counts as stale (5 minutes)
pub const DEFAULT_STALENESS_THRESHOLD: u64 = 300;

/// Default maximum deviation from TWAP before the breaker trips (8%)
pub const DEFAULT_MAX_DEVIATION_BPS: u32 = 800;

#[contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    // Initialization errors
    AlreadyInitialized = 1,
    NotInitialized = 2,

    // Authorization errors
    Unauthorized = 3,
    UpdaterAlreadyAuthorized = 4,
    UpdaterNotFound = 5,

    // Validation errors
    InvalidPrice = 6,
    ArrayLengthMismatch = 7,
    InvalidIndex = 8,
    InvalidConfig = 9,

    // State errors
    InsufficientObservations = 10,

    // Math errors
    MathOverflow = 11,
}

/// A single recorded price point
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PriceObservation {
    pub timestamp: u64,
    /// Price scaled by 1e18, within [0, 1e18]
    pub price: i128,
    /// Left-endpoint integral of price over time up to `timestamp`
    pub cumulative_price: i128,
}

/// Per-asset oracle state, created on the first observation
#[contracttype]
#[derive(Clone, Debug)]
pub struct OracleAssetState {
    pub observations: Vec<PriceObservation>,
    pub write_index: u32,
    pub count: u32,
    pub circuit_breaker_tripped: bool,
    pub last_twap: i128,
}

/// Tunable oracle windows
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OracleConfig {
    /// TWAP lookback in seconds
    pub twap_window: u64,
    /// Maximum age of the latest observation in seconds
    pub staleness_threshold: u64,
    /// Deviation from TWAP (basis points) above which an observation trips the breaker
    pub max_deviation_bps: u32,
}

impl OracleConfig {
    pub fn default() -> Self {
        Self {
            twap_window: DEFAULT_TWAP_WINDOW,
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            max_deviation_bps: DEFAULT_MAX_DEVIATION_BPS,
        }
    }
}

/// Event symbols
const EVT_INIT: Symbol = symbol_short!("orc_init");
const EVT_OBS_REC: Symbol = symbol_short!("obs_rec");
const EVT_OBS_SKIP: Symbol = symbol_short!("obs_skip");
const EVT_CB_TRIP: Symbol = symbol_short!("cb_trip");
const EVT_CB_RESET: Symbol = symbol_short!("cb_reset");
const EVT_UPD_AUTH: Symbol = symbol_short!("upd_auth");
const EVT_UPD_REV: Symbol = symbol_short!("upd_rev");
const EVT_CFG_UPD: Symbol = symbol_short!("cfg_upd");

#[contract]
pub struct PriceOracle;

#[contractimpl]
impl PriceOracle {
    /// Initialize the oracle with its admin
    ///
    /// # Arguments
    /// * `admin` - Address allowed to manage updaters, config and breaker resets
    ///
    /// # Events
    /// Emits `orc_init`
    pub fn initialize(env: Env, admin: Address) -> Result<(), ContractError> {
        if env.storage().instance().has(&symbol_short!("admin")) {
            return Err(ContractError::AlreadyInitialized);
        }

        env.storage().instance().set(&symbol_short!("admin"), &admin);
        env.storage()
            .instance()
            .set(&symbol_short!("config"), &OracleConfig::default());

        env.events().publish((EVT_INIT,), (admin,));
        Ok(())
    }

    // ========================================================================
    // Observation recording
    // ========================================================================

    /// Record a price observation for `asset` at the current ledger time
    ///
    /// Returns `true` when the observation was stored and `false` when it was
    /// rejected by the deviation circuit breaker. A rejection still persists the
    /// tripped flag.
    ///
    /// # Arguments
    /// * `updater` - An authorized price updater
    /// * `asset` - Position token the price refers to
    /// * `price` - Price scaled by 1e18, at most 1e18
    ///
    /// # Events
    /// Emits `obs_rec` on storage, `cb_trip` on rejection
    pub fn record_observation(
        env: Env,
        updater: Address,
        asset: Address,
        price: i128,
    ) -> Result<bool, ContractError> {
        Self::require_updater(&env, &updater)?;
        let config = Self::load_config(&env);

        Self::apply_observation(&env, &config, &asset, price)
    }

    /// Record one observation per `(asset, price)` pair
    ///
    /// Pairs with an out-of-range price are skipped with an `obs_skip` event
    /// instead of failing the batch. Returns how many observations were stored.
    pub fn batch_record_observations(
        env: Env,
        updater: Address,
        assets: Vec<Address>,
        prices: Vec<i128>,
    ) -> Result<u32, ContractError> {
        Self::require_updater(&env, &updater)?;

        if assets.len() != prices.len() {
            return Err(ContractError::ArrayLengthMismatch);
        }

        let config = Self::load_config(&env);
        let mut stored = 0u32;

        for (asset, price) in assets.iter().zip(prices.iter()) {
            if !Self::is_valid_price(price) {
                env.events().publish((EVT_OBS_SKIP, asset), (price,));
                continue;
            }

            if Self::apply_observation(&env, &config, &asset, price)? {
                stored += 1;
            }
        }

        Ok(stored)
    }

    // ========================================================================
    // Price reads
    // ========================================================================

    /// Time-weighted average price over the configured window
    ///
    /// # Returns
    /// `(twap, timestamp of the latest observation)`
    pub fn get_twap(env: Env, asset: Address) -> Result<(i128, u64), ContractError> {
        let state = Self::load_state(&env, &asset);
        let config = Self::load_config(&env);

        let twap = Self::compute_twap(&state, env.ledger().timestamp(), config.twap_window)?;
        let latest = Self::latest_observation(&state).ok_or(ContractError::InsufficientObservations)?;

        Ok((twap, latest.timestamp))
    }

    /// Most recent stored price and its timestamp
    pub fn get_latest_price(env: Env, asset: Address) -> Result<(i128, u64), ContractError> {
        let state = Self::load_state(&env, &asset);
        let latest = Self::latest_observation(&state).ok_or(ContractError::InsufficientObservations)?;

        Ok((latest.price, latest.timestamp))
    }

    /// True when no observation exists or the latest one is older than the staleness threshold
    pub fn is_price_stale(env: Env, asset: Address) -> bool {
        let state = Self::load_state(&env, &asset);
        let config = Self::load_config(&env);

        match Self::latest_observation(&state) {
            Some(latest) => {
                env.ledger().timestamp().saturating_sub(latest.timestamp)
                    > config.staleness_threshold
            }
            None => true,
        }
    }

    pub fn is_circuit_breaker_triggered(env: Env, asset: Address) -> bool {
        Self::load_state(&env, &asset).circuit_breaker_tripped
    }

    /// Raw ring slot `index` for `asset`
    pub fn get_observation(
        env: Env,
        asset: Address,
        index: u32,
    ) -> Result<PriceObservation, ContractError> {
        let state = Self::load_state(&env, &asset);
        if index >= state.count {
            return Err(ContractError::InvalidIndex);
        }

        state.observations.get(index).ok_or(ContractError::InvalidIndex)
    }

    pub fn get_observation_count(env: Env, asset: Address) -> u32 {
        Self::load_state(&env, &asset).count
    }

    /// TWAP cached by the last stored observation, 0 if none was computed yet
    pub fn get_last_twap(env: Env, asset: Address) -> i128 {
        Self::load_state(&env, &asset).last_twap
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Clear a tripped deviation breaker (admin only)
    pub fn reset_circuit_breaker(env: Env, asset: Address) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        let mut state = Self::load_state(&env, &asset);
        state.circuit_breaker_tripped = false;
        Self::save_state(&env, &asset, &state);

        env.events()
            .publish((EVT_CB_RESET, asset), (env.ledger().timestamp(),));
        Ok(())
    }

    /// Allow `updater` to record observations (admin only)
    pub fn authorize_updater(env: Env, updater: Address) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        let key = (symbol_short!("updater"), updater.clone());
        if env.storage().persistent().has(&key) {
            return Err(ContractError::UpdaterAlreadyAuthorized);
        }
        env.storage().persistent().set(&key, &true);

        env.events().publish((EVT_UPD_AUTH,), (updater,));
        Ok(())
    }

    /// Remove `updater` from the authorized set (admin only)
    pub fn revoke_updater(env: Env, updater: Address) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        let key = (symbol_short!("updater"), updater.clone());
        if !env.storage().persistent().has(&key) {
            return Err(ContractError::UpdaterNotFound);
        }
        env.storage().persistent().remove(&key);

        env.events().publish((EVT_UPD_REV,), (updater,));
        Ok(())
    }

    pub fn is_authorized_updater(env: Env, updater: Address) -> bool {
        env.storage()
            .persistent()
            .has(&(symbol_short!("updater"), updater))
    }

    pub fn get_config(env: Env) -> OracleConfig {
        Self::load_config(&env)
    }

    /// Replace the oracle windows (admin only)
    pub fn update_config(env: Env, new_config: OracleConfig) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        if new_config.twap_window == 0
            || new_config.staleness_threshold == 0
            || new_config.max_deviation_bps == 0
            || new_config.max_deviation_bps > 10_000
        {
            return Err(ContractError::InvalidConfig);
        }

        env.storage()
            .instance()
            .set(&symbol_short!("config"), &new_config);

        env.events().publish(
            (EVT_CFG_UPD,),
            (
                new_config.twap_window,
                new_config.staleness_threshold,
                new_config.max_deviation_bps,
            ),
        );
        Ok(())
    }

    pub fn get_admin(env: Env) -> Result<Address, ContractError> {
        env.storage()
            .instance()
            .get(&symbol_short!("admin"))
            .ok_or(ContractError::NotInitialized)
    }

    // Helper functions

    fn apply_observation(
        env: &Env,
        config: &OracleConfig,
        asset: &Address,
        price: i128,
    ) -> Result<bool, ContractError> {
        if !Self::is_valid_price(price) {
            return Err(ContractError::InvalidPrice);
        }

        let now = env.ledger().timestamp();
        let mut state = Self::load_state(env, asset);

        let cumulative_price = match Self::latest_observation(&state) {
            Some(prev) => {
                let elapsed = now.saturating_sub(prev.timestamp) as i128;
                prev.price
                    .checked_mul(elapsed)
                    .and_then(|area| prev.cumulative_price.checked_add(area))
                    .ok_or(ContractError::MathOverflow)?
            }
            None => 0,
        };

        if state.count >= 2 && !state.circuit_breaker_tripped {
            let twap = Self::compute_twap(&state, now, config.twap_window)?;
            if twap != 0 {
                let deviation = deviation_bps(price, twap).ok_or(ContractError::MathOverflow)?;
                if deviation > config.max_deviation_bps as i128 {
                    state.circuit_breaker_tripped = true;
                    Self::save_state(env, asset, &state);

                    log!(env, "deviation breaker tripped", price, twap, deviation);
                    env.events()
                        .publish((EVT_CB_TRIP, asset.clone()), (price, twap, deviation));
                    return Ok(false);
                }
            }
        }

        let observation = PriceObservation {
            timestamp: now,
            price,
            cumulative_price,
        };

        if state.observations.len() < OBSERVATION_CAPACITY {
            state.observations.push_back(observation);
        } else {
            state.observations.set(state.write_index, observation);
        }
        state.write_index = (state.write_index + 1) % OBSERVATION_CAPACITY;
        if state.count < OBSERVATION_CAPACITY {
            state.count += 1;
        }

        if state.count >= 2 {
            state.last_twap = Self::compute_twap(&state, now, config.twap_window)?;
        }

        Self::save_state(env, asset, &state);

        env.events()
            .publish((EVT_OBS_REC, asset.clone()), (price, now));
        Ok(true)
    }

    /// TWAP from the oldest in-window observation.
    ///
    /// The latest cumulative value is extrapolated to `now` at the latest price,
    /// then divided by the stored span `latest.timestamp - oldest.timestamp`.
    fn compute_twap(state: &OracleAssetState, now: u64, window: u64) -> Result<i128, ContractError> {
        if state.count < 2 {
            return Err(ContractError::InsufficientObservations);
        }

        let latest = Self::latest_observation(state).ok_or(ContractError::InsufficientObservations)?;
        let target_time = latest.timestamp.saturating_sub(window);

        let start = Self::oldest_index(state);
        let mut oldest = state
            .observations
            .get(start)
            .ok_or(ContractError::InsufficientObservations)?;

        for offset in 0..state.count {
            let index = (start + offset) % OBSERVATION_CAPACITY;
            if let Some(observation) = state.observations.get(index) {
                if observation.timestamp >= target_time {
                    oldest = observation;
                    break;
                }
            }
        }

        let time_delta = latest.timestamp.saturating_sub(oldest.timestamp);
        if time_delta == 0 {
            return Ok(latest.price);
        }

        let carried = latest
            .price
            .checked_mul(now.saturating_sub(latest.timestamp) as i128)
            .and_then(|area| latest.cumulative_price.checked_add(area))
            .ok_or(ContractError::MathOverflow)?;

        carried
            .checked_sub(oldest.cumulative_price)
            .and_then(|integral| integral.checked_div(time_delta as i128))
            .ok_or(ContractError::MathOverflow)
    }

    fn latest_observation(state: &OracleAssetState) -> Option<PriceObservation> {
        if state.count == 0 {
            return None;
        }

        let index = (state.write_index + OBSERVATION_CAPACITY - 1) % OBSERVATION_CAPACITY;
        state.observations.get(index)
    }

    fn oldest_index(state: &OracleAssetState) -> u32 {
        if state.count < OBSERVATION_CAPACITY {
            0
        } else {
            state.write_index
        }
    }

    fn is_valid_price(price: i128) -> bool {
        (0..=PRICE_SCALE).contains(&price)
    }

    fn load_state(env: &Env, asset: &Address) -> OracleAssetState {
        env.storage()
            .persistent()
            .get(&(symbol_short!("obs"), asset.clone()))
            .unwrap_or(OracleAssetState {
                observations: Vec::new(env),
                write_index: 0,
                count: 0,
                circuit_breaker_tripped: false,
                last_twap: 0,
            })
    }

    fn save_state(env: &Env, asset: &Address, state: &OracleAssetState) {
        env.storage()
            .persistent()
            .set(&(symbol_short!("obs"), asset.clone()), state);
    }

    fn load_config(env: &Env) -> OracleConfig {
        env.storage()
            .instance()
            .get(&symbol_short!("config"))
            .unwrap_or(OracleConfig::default())
    }

    fn check_admin(env: &Env) -> Result<(), ContractError> {
        let admin: Address = env
            .storage()
            .instance()
            .get(&symbol_short!("admin"))
            .ok_or(ContractError::NotInitialized)?;
        admin.require_auth();
        Ok(())
    }

    fn require_updater(env: &Env, updater: &Address) -> Result<(), ContractError> {
        updater.require_auth();

        if !env
            .storage()
            .persistent()
            .has(&(symbol_short!("updater"), updater.clone()))
        {
            return Err(ContractError::Unauthorized);
        }
        Ok(())
    }
}
