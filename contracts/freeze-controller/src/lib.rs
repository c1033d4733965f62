//! Freeze Controller Contract
//!
//! Aggregates every switch that can halt lending activity: the global pause,
//! the global circuit breaker, per-market circuit breakers that expire after a
//! cooldown, guardian market freezes and the pre-resolution freeze window.
//! Each action class gets its own decision. Only borrowing honours every
//! switch; liquidation stops only on a global pause and repayment never stops.

#![no_std]

use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, Address, BytesN, Env,
    IntoVal, Symbol, Val, Vec,
};

/// Window before resolution in which new borrowing is refused (24 hours)
pub const PRE_RESOLUTION_FREEZE_WINDOW: u64 = 86_400;

/// Default market circuit breaker cooldown (1 hour)
pub const DEFAULT_COOLDOWN: u64 = 3_600;

/// Upper bound for a configurable cooldown (7 days)
pub const MAX_COOLDOWN: u64 = 7 * 86_400;

#[contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    MarketNotRegistered = 3,
    InvalidCooldown = 4,
}

/// Why an action is blocked, `Allowed` when it is not
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FreezeReason {
    Allowed = 0,
    GloballyPaused = 1,
    GlobalCircuitBreaker = 2,
    MarketCircuitBreaker = 3,
    MarketNotRegistered = 4,
    PreResolutionFreeze = 5,
    MarketFrozen = 6,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FreezeDecision {
    pub allowed: bool,
    pub reason: FreezeReason,
}

impl FreezeDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: FreezeReason::Allowed,
        }
    }

    fn block(reason: FreezeReason) -> Self {
        Self {
            allowed: false,
            reason,
        }
    }
}

/// Local mirror of the market registry's Market record for cross-contract deserialization.
#[contracttype]
#[derive(Clone, Debug)]
pub struct Market {
    pub condition_id: BytesN<32>,
    pub resolution_time: u64,
    pub is_frozen: bool,
    pub is_registered: bool,
    pub outcome_count: u32,
}

const EVT_INIT: Symbol = symbol_short!("frz_init");
const EVT_PAUSED: Symbol = symbol_short!("paused");
const EVT_UNPAUSED: Symbol = symbol_short!("unpaused");
const EVT_GCB_TRIP: Symbol = symbol_short!("gcb_trip");
const EVT_GCB_RESET: Symbol = symbol_short!("gcb_rst");
const EVT_MCB_TRIP: Symbol = symbol_short!("mcb_trip");
const EVT_MCB_RESET: Symbol = symbol_short!("mcb_rst");
const EVT_MKT_FREEZE: Symbol = symbol_short!("mkt_frz");
const EVT_MKT_UNFREEZE: Symbol = symbol_short!("mkt_unfrz");
const EVT_COOLDOWN_UPD: Symbol = symbol_short!("cd_upd");
const EVT_GUARDIAN_SET: Symbol = symbol_short!("grd_set");

#[contract]
pub struct FreezeController;

#[contractimpl]
impl FreezeController {
    /// Initialize the controller
    ///
    /// # Arguments
    /// * `admin` - Configures cooldown, guardian and registry
    /// * `guardian` - Operates pauses, circuit breakers and market freezes
    /// * `market_registry` - Source of market resolution times and freeze flags
    pub fn initialize(
        env: Env,
        admin: Address,
        guardian: Address,
        market_registry: Address,
    ) -> Result<(), ContractError> {
        if env.storage().instance().has(&symbol_short!("admin")) {
            return Err(ContractError::AlreadyInitialized);
        }

        env.storage().instance().set(&symbol_short!("admin"), &admin);
        env.storage()
            .instance()
            .set(&symbol_short!("guardian"), &guardian);
        env.storage()
            .instance()
            .set(&symbol_short!("registry"), &market_registry);
        env.storage()
            .instance()
            .set(&symbol_short!("cooldown"), &DEFAULT_COOLDOWN);
        env.storage().instance().set(&symbol_short!("paused"), &false);
        env.storage().instance().set(&symbol_short!("gcb"), &false);

        env.events().publish((EVT_INIT,), (admin, guardian));
        Ok(())
    }

    // ========================================================================
    // Action decisions
    // ========================================================================

    /// Whether new debt may be drawn against `market_id`
    ///
    /// Reasons are checked in order: global pause, global circuit breaker,
    /// market circuit breaker, unknown market, pre-resolution freeze, manual
    /// market freeze.
    pub fn can_borrow(env: Env, market_id: BytesN<32>) -> FreezeDecision {
        if Self::is_paused(env.clone()) {
            return FreezeDecision::block(FreezeReason::GloballyPaused);
        }
        if Self::is_global_circuit_breaker_active(env.clone()) {
            return FreezeDecision::block(FreezeReason::GlobalCircuitBreaker);
        }
        if Self::is_market_circuit_breaker_active(env.clone(), market_id.clone()) {
            return FreezeDecision::block(FreezeReason::MarketCircuitBreaker);
        }

        let market = match Self::fetch_market(&env, &market_id) {
            Ok(market) => market,
            Err(_) => return FreezeDecision::block(FreezeReason::MarketNotRegistered),
        };

        if Self::pre_resolution_freeze(&market, env.ledger().timestamp()) {
            return FreezeDecision::block(FreezeReason::PreResolutionFreeze);
        }
        if market.is_frozen || Self::is_market_frozen(env.clone(), market_id) {
            return FreezeDecision::block(FreezeReason::MarketFrozen);
        }

        FreezeDecision::allow()
    }

    /// Liquidations continue through market freezes so risk can always be reduced
    pub fn can_liquidate(env: Env, _market_id: BytesN<32>) -> FreezeDecision {
        if Self::is_paused(env) {
            return FreezeDecision::block(FreezeReason::GloballyPaused);
        }
        FreezeDecision::allow()
    }

    pub fn can_withdraw(env: Env) -> FreezeDecision {
        if Self::is_paused(env) {
            return FreezeDecision::block(FreezeReason::GloballyPaused);
        }
        FreezeDecision::allow()
    }

    /// Repayment is never blocked
    pub fn can_repay(_env: Env) -> FreezeDecision {
        FreezeDecision::allow()
    }

    /// True once `market_id` is within 24 hours of resolution or already past it
    pub fn is_in_pre_resolution_freeze(
        env: Env,
        market_id: BytesN<32>,
    ) -> Result<bool, ContractError> {
        let market = Self::fetch_market(&env, &market_id)?;
        Ok(Self::pre_resolution_freeze(&market, env.ledger().timestamp()))
    }

    /// True while a tripped market breaker is inside its cooldown
    pub fn is_market_circuit_breaker_active(env: Env, market_id: BytesN<32>) -> bool {
        match Self::get_market_breaker_tripped_at(env.clone(), market_id) {
            Some(tripped_at) => {
                env.ledger().timestamp() < tripped_at.saturating_add(Self::get_cooldown(env))
            }
            None => false,
        }
    }

    pub fn get_market_breaker_tripped_at(env: Env, market_id: BytesN<32>) -> Option<u64> {
        env.storage()
            .persistent()
            .get(&(symbol_short!("mcb"), market_id))
    }

    pub fn is_paused(env: Env) -> bool {
        env.storage()
            .instance()
            .get(&symbol_short!("paused"))
            .unwrap_or(false)
    }

    pub fn is_global_circuit_breaker_active(env: Env) -> bool {
        env.storage()
            .instance()
            .get(&symbol_short!("gcb"))
            .unwrap_or(false)
    }

    /// Guardian freeze flag kept by this controller
    pub fn is_market_frozen(env: Env, market_id: BytesN<32>) -> bool {
        env.storage()
            .persistent()
            .get(&(symbol_short!("frozen"), market_id))
            .unwrap_or(false)
    }

    pub fn get_cooldown(env: Env) -> u64 {
        env.storage()
            .instance()
            .get(&symbol_short!("cooldown"))
            .unwrap_or(DEFAULT_COOLDOWN)
    }

    // ========================================================================
    // Guardian controls
    // ========================================================================

    pub fn pause(env: Env) -> Result<(), ContractError> {
        let guardian = Self::require_guardian(&env)?;
        env.storage().instance().set(&symbol_short!("paused"), &true);

        env.events()
            .publish((EVT_PAUSED,), (guardian, env.ledger().timestamp()));
        Ok(())
    }

    pub fn unpause(env: Env) -> Result<(), ContractError> {
        let guardian = Self::require_guardian(&env)?;
        env.storage().instance().set(&symbol_short!("paused"), &false);

        env.events()
            .publish((EVT_UNPAUSED,), (guardian, env.ledger().timestamp()));
        Ok(())
    }

    pub fn trip_global_circuit_breaker(env: Env) -> Result<(), ContractError> {
        let guardian = Self::require_guardian(&env)?;
        env.storage().instance().set(&symbol_short!("gcb"), &true);

        log!(&env, "global circuit breaker tripped", guardian);
        env.events()
            .publish((EVT_GCB_TRIP,), (guardian, env.ledger().timestamp()));
        Ok(())
    }

    pub fn reset_global_circuit_breaker(env: Env) -> Result<(), ContractError> {
        let guardian = Self::require_guardian(&env)?;
        env.storage().instance().set(&symbol_short!("gcb"), &false);

        env.events()
            .publish((EVT_GCB_RESET,), (guardian, env.ledger().timestamp()));
        Ok(())
    }

    /// Trip the breaker of `market_id`; tripping again restarts the cooldown
    pub fn trip_market_circuit_breaker(env: Env, market_id: BytesN<32>) -> Result<(), ContractError> {
        Self::require_guardian(&env)?;

        let now = env.ledger().timestamp();
        env.storage()
            .persistent()
            .set(&(symbol_short!("mcb"), market_id.clone()), &now);

        log!(&env, "market circuit breaker tripped", market_id, now);
        env.events()
            .publish((EVT_MCB_TRIP, market_id), (now, Self::get_cooldown(env.clone())));
        Ok(())
    }

    pub fn reset_market_circuit_breaker(env: Env, market_id: BytesN<32>) -> Result<(), ContractError> {
        Self::require_guardian(&env)?;

        env.storage()
            .persistent()
            .remove(&(symbol_short!("mcb"), market_id.clone()));

        env.events()
            .publish((EVT_MCB_RESET, market_id), (env.ledger().timestamp(),));
        Ok(())
    }

    pub fn freeze_market(env: Env, market_id: BytesN<32>) -> Result<(), ContractError> {
        Self::require_guardian(&env)?;

        env.storage()
            .persistent()
            .set(&(symbol_short!("frozen"), market_id.clone()), &true);

        env.events()
            .publish((EVT_MKT_FREEZE, market_id), (env.ledger().timestamp(),));
        Ok(())
    }

    pub fn unfreeze_market(env: Env, market_id: BytesN<32>) -> Result<(), ContractError> {
        Self::require_guardian(&env)?;

        env.storage()
            .persistent()
            .remove(&(symbol_short!("frozen"), market_id.clone()));

        env.events()
            .publish((EVT_MKT_UNFREEZE, market_id), (env.ledger().timestamp(),));
        Ok(())
    }

    // ========================================================================
    // Admin configuration
    // ========================================================================

    /// Set the market circuit breaker cooldown in seconds (admin only)
    pub fn set_cooldown(env: Env, cooldown: u64) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        if cooldown == 0 || cooldown > MAX_COOLDOWN {
            return Err(ContractError::InvalidCooldown);
        }
        env.storage()
            .instance()
            .set(&symbol_short!("cooldown"), &cooldown);

        env.events().publish((EVT_COOLDOWN_UPD,), (cooldown,));
        Ok(())
    }

    pub fn set_guardian(env: Env, guardian: Address) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        env.storage()
            .instance()
            .set(&symbol_short!("guardian"), &guardian);

        env.events().publish((EVT_GUARDIAN_SET,), (guardian,));
        Ok(())
    }

    pub fn set_market_registry(env: Env, market_registry: Address) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        env.storage()
            .instance()
            .set(&symbol_short!("registry"), &market_registry);
        Ok(())
    }

    pub fn guardian(env: Env) -> Result<Address, ContractError> {
        env.storage()
            .instance()
            .get(&symbol_short!("guardian"))
            .ok_or(ContractError::NotInitialized)
    }

    // Helper functions

    fn pre_resolution_freeze(market: &Market, now: u64) -> bool {
        now >= market.resolution_time
            || market.resolution_time - now < PRE_RESOLUTION_FREEZE_WINDOW
    }

    fn fetch_market(env: &Env, market_id: &BytesN<32>) -> Result<Market, ContractError> {
        let registry: Address = env
            .storage()
            .instance()
            .get(&symbol_short!("registry"))
            .ok_or(ContractError::NotInitialized)?;

        let args: Vec<Val> = Vec::from_array(env, [market_id.into_val(env)]);
        match env.try_invoke_contract::<Market, ContractError>(
            &registry,
            &Symbol::new(env, "get_market"),
            args,
        ) {
            Ok(Ok(market)) if market.is_registered => Ok(market),
            _ => Err(ContractError::MarketNotRegistered),
        }
    }

    fn require_guardian(env: &Env) -> Result<Address, ContractError> {
        let guardian: Address = env
            .storage()
            .instance()
            .get(&symbol_short!("guardian"))
            .ok_or(ContractError::NotInitialized)?;
        guardian.require_auth();
        Ok(guardian)
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
}

#[cfg(test)]
mod test {
    use super::*;
    use soroban_sdk::testutils::{Address as _, Ledger as _, MockAuth, MockAuthInvoke};

    const NOW: u64 = 1_700_000_000;

    #[contract]
    pub struct MockMarketRegistry;

    #[contractimpl]
    impl MockMarketRegistry {
        pub fn get_market(env: Env, market_id: BytesN<32>) -> Market {
            env.storage().persistent().get(&market_id).unwrap()
        }

        pub fn set_market(env: Env, market: Market) {
            env.storage().persistent().set(&market.condition_id, &market);
        }
    }

    struct Setup<'a> {
        controller: FreezeControllerClient<'a>,
        registry: MockMarketRegistryClient<'a>,
        guardian: Address,
    }

    fn setup(env: &Env) -> Setup<'_> {
        env.mock_all_auths();
        env.ledger().set_timestamp(NOW);

        let registry_id = env.register(MockMarketRegistry, ());
        let registry = MockMarketRegistryClient::new(env, &registry_id);

        let controller_id = env.register(FreezeController, ());
        let controller = FreezeControllerClient::new(env, &controller_id);

        let guardian = Address::generate(env);
        controller.initialize(&Address::generate(env), &guardian, &registry_id);

        Setup {
            controller,
            registry,
            guardian,
        }
    }

    fn add_market(env: &Env, registry: &MockMarketRegistryClient, seed: u8, resolves_in: u64, is_frozen: bool) -> BytesN<32> {
        let condition_id = BytesN::from_array(env, &[seed; 32]);
        registry.set_market(&Market {
            condition_id: condition_id.clone(),
            resolution_time: NOW + resolves_in,
            is_frozen,
            is_registered: true,
            outcome_count: 2,
        });
        condition_id
    }

    #[test]
    fn test_open_market_allows_everything() {
        let env = Env::default();
        let s = setup(&env);
        let market = add_market(&env, &s.registry, 1, 10 * 86_400, false);

        assert_eq!(s.controller.can_borrow(&market), FreezeDecision::allow());
        assert_eq!(s.controller.can_liquidate(&market), FreezeDecision::allow());
        assert_eq!(s.controller.can_withdraw(), FreezeDecision::allow());
        assert_eq!(s.controller.can_repay(), FreezeDecision::allow());
    }

    #[test]
    fn test_borrow_block_priority() {
        let env = Env::default();
        let s = setup(&env);
        // Within the freeze window and manually frozen in the registry
        let market = add_market(&env, &s.registry, 1, 3_600, true);

        s.controller.pause();
        s.controller.trip_global_circuit_breaker();
        s.controller.trip_market_circuit_breaker(&market);

        assert_eq!(s.controller.can_borrow(&market).reason, FreezeReason::GloballyPaused);

        s.controller.unpause();
        assert_eq!(s.controller.can_borrow(&market).reason, FreezeReason::GlobalCircuitBreaker);

        s.controller.reset_global_circuit_breaker();
        assert_eq!(s.controller.can_borrow(&market).reason, FreezeReason::MarketCircuitBreaker);

        s.controller.reset_market_circuit_breaker(&market);
        assert_eq!(s.controller.can_borrow(&market).reason, FreezeReason::PreResolutionFreeze);

        let frozen_far = add_market(&env, &s.registry, 2, 30 * 86_400, true);
        assert_eq!(
            s.controller.can_borrow(&frozen_far),
            FreezeDecision::block(FreezeReason::MarketFrozen)
        );
    }

    #[test]
    fn test_unregistered_market_blocks_borrow() {
        let env = Env::default();
        let s = setup(&env);
        let unknown = BytesN::from_array(&env, &[99; 32]);

        assert_eq!(s.controller.can_borrow(&unknown).reason, FreezeReason::MarketNotRegistered);
        assert_eq!(
            s.controller.try_is_in_pre_resolution_freeze(&unknown),
            Err(Ok(ContractError::MarketNotRegistered))
        );
    }

    #[test]
    fn test_pre_resolution_freeze_window() {
        let env = Env::default();
        let s = setup(&env);

        let open = add_market(&env, &s.registry, 1, PRE_RESOLUTION_FREEZE_WINDOW, false);
        let closing = add_market(&env, &s.registry, 2, PRE_RESOLUTION_FREEZE_WINDOW - 1, false);
        let resolved = add_market(&env, &s.registry, 3, 0, false);

        assert!(!s.controller.is_in_pre_resolution_freeze(&open));
        assert!(s.controller.is_in_pre_resolution_freeze(&closing));
        assert!(s.controller.is_in_pre_resolution_freeze(&resolved));

        env.ledger().set_timestamp(NOW + 1);
        assert!(s.controller.is_in_pre_resolution_freeze(&open));
        assert_eq!(s.controller.can_borrow(&open).reason, FreezeReason::PreResolutionFreeze);
    }

    #[test]
    fn test_market_circuit_breaker_cooldown() {
        let env = Env::default();
        let s = setup(&env);
        let market = add_market(&env, &s.registry, 1, 30 * 86_400, false);

        assert!(!s.controller.is_market_circuit_breaker_active(&market));

        s.controller.trip_market_circuit_breaker(&market);
        assert_eq!(s.controller.get_market_breaker_tripped_at(&market), Some(NOW));
        assert!(s.controller.is_market_circuit_breaker_active(&market));

        env.ledger().set_timestamp(NOW + DEFAULT_COOLDOWN - 1);
        assert!(s.controller.is_market_circuit_breaker_active(&market));

        env.ledger().set_timestamp(NOW + DEFAULT_COOLDOWN);
        assert!(!s.controller.is_market_circuit_breaker_active(&market));
        assert!(s.controller.can_borrow(&market).allowed);
    }

    #[test]
    fn test_breaker_trips_at_genesis_timestamp() {
        let env = Env::default();
        let s = setup(&env);
        let market = add_market(&env, &s.registry, 1, 30 * 86_400, false);

        env.ledger().set_timestamp(0);
        s.controller.trip_market_circuit_breaker(&market);
        assert!(s.controller.is_market_circuit_breaker_active(&market));
    }

    #[test]
    fn test_liquidation_bypasses_market_freezes() {
        let env = Env::default();
        let s = setup(&env);
        let market = add_market(&env, &s.registry, 1, 600, true);

        s.controller.trip_market_circuit_breaker(&market);
        s.controller.trip_global_circuit_breaker();
        s.controller.freeze_market(&market);

        assert!(!s.controller.can_borrow(&market).allowed);
        assert!(s.controller.can_liquidate(&market).allowed);
        assert!(s.controller.can_withdraw().allowed);

        s.controller.pause();
        assert_eq!(
            s.controller.can_liquidate(&market),
            FreezeDecision::block(FreezeReason::GloballyPaused)
        );
        assert_eq!(s.controller.can_withdraw().reason, FreezeReason::GloballyPaused);
        assert!(s.controller.can_repay().allowed);
    }

    #[test]
    fn test_guardian_market_freeze() {
        let env = Env::default();
        let s = setup(&env);
        let market = add_market(&env, &s.registry, 1, 30 * 86_400, false);

        s.controller.freeze_market(&market);
        assert!(s.controller.is_market_frozen(&market));
        assert_eq!(s.controller.can_borrow(&market).reason, FreezeReason::MarketFrozen);

        s.controller.unfreeze_market(&market);
        assert!(!s.controller.is_market_frozen(&market));
        assert!(s.controller.can_borrow(&market).allowed);
    }

    #[test]
    fn test_set_cooldown() {
        let env = Env::default();
        let s = setup(&env);
        let market = add_market(&env, &s.registry, 1, 30 * 86_400, false);

        s.controller.set_cooldown(&600);
        assert_eq!(s.controller.get_cooldown(), 600);

        s.controller.trip_market_circuit_breaker(&market);
        env.ledger().set_timestamp(NOW + 600);
        assert!(!s.controller.is_market_circuit_breaker_active(&market));

        assert_eq!(s.controller.try_set_cooldown(&0), Err(Ok(ContractError::InvalidCooldown)));
        assert_eq!(
            s.controller.try_set_cooldown(&(MAX_COOLDOWN + 1)),
            Err(Ok(ContractError::InvalidCooldown))
        );
    }

    #[test]
    fn test_pause_requires_guardian() {
        let env = Env::default();
        let s = setup(&env);
        let stranger = Address::generate(&env);

        env.mock_auths(&[MockAuth {
            address: &stranger,
            invoke: &MockAuthInvoke {
                contract: &s.controller.address,
                fn_name: "pause",
                args: ().into_val(&env),
                sub_invokes: &[],
            },
        }]);
        assert!(s.controller.try_pause().is_err());
        assert!(!s.controller.is_paused());

        env.mock_auths(&[MockAuth {
            address: &s.guardian,
            invoke: &MockAuthInvoke {
                contract: &s.controller.address,
                fn_name: "pause",
                args: ().into_val(&env),
                sub_invokes: &[],
            },
        }]);
        s.controller.pause();
        assert!(s.controller.is_paused());
    }

    #[test]
    fn test_replace_guardian() {
        let env = Env::default();
        let s = setup(&env);
        let next = Address::generate(&env);

        s.controller.set_guardian(&next);
        assert_eq!(s.controller.guardian(), next);
    }
}
