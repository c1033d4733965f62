//! Risk Tier Scheduler Contract
//!
//! Maps a prediction market's distance to resolution onto a maximum
//! collateral factor. The closer a market gets to resolving, the less a
//! position token can be borrowed against, down to nothing in the last day.

#![no_std]

use fixed_point_math::apply_bps;
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, Address, BytesN, Env,
    IntoVal, Symbol, Val, Vec,
};

const SECONDS_PER_HOUR: u64 = 3_600;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// Time to resolution from which the NORMAL tier applies
pub const NORMAL_TIER_MIN: u64 = 7 * SECONDS_PER_DAY;
/// Time to resolution from which the MEDIUM_RISK tier applies
pub const MEDIUM_TIER_MIN: u64 = 2 * SECONDS_PER_DAY;
/// Time to resolution from which the HIGH_RISK tier applies; below it the market is FROZEN
pub const HIGH_TIER_MIN: u64 = SECONDS_PER_DAY;

#[contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    MarketNotRegistered = 3,
    InvalidTierConfig = 4,
    InvalidAmount = 5,
    MathOverflow = 6,
}

/// Collateral factor tier of a market
#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LtvTier {
    Normal = 0,
    MediumRisk = 1,
    HighRisk = 2,
    Frozen = 3,
}

/// Maximum LTV per non-frozen tier, in basis points
///
/// Must satisfy `10000 >= normal_bps >= medium_bps >= high_bps`. The frozen
/// tier is always 0.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LtvTiers {
    pub normal_bps: u32,
    pub medium_bps: u32,
    pub high_bps: u32,
}

impl LtvTiers {
    pub fn default() -> Self {
        Self {
            normal_bps: 5000, // 50%
            medium_bps: 3500, // 35%
            high_bps: 2000,   // 20%
        }
    }

    fn for_tier(&self, tier: LtvTier) -> u32 {
        match tier {
            LtvTier::Normal => self.normal_bps,
            LtvTier::MediumRisk => self.medium_bps,
            LtvTier::HighRisk => self.high_bps,
            LtvTier::Frozen => 0,
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

const EVT_INIT: Symbol = symbol_short!("sch_init");
const EVT_TIER_UPD: Symbol = symbol_short!("tier_upd");
const EVT_REG_SET: Symbol = symbol_short!("reg_set");

#[contract]
pub struct RiskTierScheduler;

#[contractimpl]
impl RiskTierScheduler {
    /// Initialize with an admin and the market registry to read resolution times from
    pub fn initialize(
        env: Env,
        admin: Address,
        market_registry: Address,
    ) -> Result<(), ContractError> {
        if env.storage().instance().has(&symbol_short!("admin")) {
            return Err(ContractError::AlreadyInitialized);
        }

        env.storage().instance().set(&symbol_short!("admin"), &admin);
        env.storage()
            .instance()
            .set(&symbol_short!("registry"), &market_registry);
        env.storage()
            .instance()
            .set(&symbol_short!("tiers"), &LtvTiers::default());

        env.events().publish((EVT_INIT,), (admin, market_registry));
        Ok(())
    }

    /// Current tier of `market_id`
    ///
    /// A manually frozen market is FROZEN regardless of its resolution time.
    pub fn get_ltv_tier(env: Env, market_id: BytesN<32>) -> Result<LtvTier, ContractError> {
        let market = Self::fetch_market(&env, &market_id)?;
        Ok(Self::tier_for(&market, env.ledger().timestamp()))
    }

    /// Maximum LTV of `market_id` in basis points
    pub fn get_max_ltv(env: Env, market_id: BytesN<32>) -> Result<u32, ContractError> {
        let tier = Self::get_ltv_tier(env.clone(), market_id)?;
        Ok(Self::load_tiers(&env).for_tier(tier))
    }

    /// `collateral_value * max_ltv / 10000`, in the unit of `collateral_value`
    pub fn calculate_max_borrow(
        env: Env,
        collateral_value: i128,
        market_id: BytesN<32>,
    ) -> Result<i128, ContractError> {
        if collateral_value < 0 {
            return Err(ContractError::InvalidAmount);
        }

        let ltv = Self::get_max_ltv(env, market_id)?;
        apply_bps(collateral_value, ltv).ok_or(ContractError::MathOverflow)
    }

    pub fn is_borrowing_allowed(env: Env, market_id: BytesN<32>) -> Result<bool, ContractError> {
        Ok(Self::get_ltv_tier(env, market_id)? != LtvTier::Frozen)
    }

    /// Seconds until `market_id` resolves, 0 once resolution time has passed
    pub fn get_time_to_resolution(env: Env, market_id: BytesN<32>) -> Result<u64, ContractError> {
        let market = Self::fetch_market(&env, &market_id)?;
        Ok(market.resolution_time.saturating_sub(env.ledger().timestamp()))
    }

    pub fn get_ltv_tiers(env: Env) -> LtvTiers {
        Self::load_tiers(&env)
    }

    /// Replace the three non-zero tier values (admin only)
    pub fn update_ltv_tiers(
        env: Env,
        normal_bps: u32,
        medium_bps: u32,
        high_bps: u32,
    ) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        if normal_bps > 10_000 || normal_bps < medium_bps || medium_bps < high_bps {
            return Err(ContractError::InvalidTierConfig);
        }

        let tiers = LtvTiers {
            normal_bps,
            medium_bps,
            high_bps,
        };
        env.storage().instance().set(&symbol_short!("tiers"), &tiers);

        env.events()
            .publish((EVT_TIER_UPD,), (normal_bps, medium_bps, high_bps));
        Ok(())
    }

    /// Point the scheduler at another market registry (admin only)
    pub fn set_market_registry(env: Env, market_registry: Address) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        env.storage()
            .instance()
            .set(&symbol_short!("registry"), &market_registry);

        env.events().publish((EVT_REG_SET,), (market_registry,));
        Ok(())
    }

    pub fn admin(env: Env) -> Result<Address, ContractError> {
        env.storage()
            .instance()
            .get(&symbol_short!("admin"))
            .ok_or(ContractError::NotInitialized)
    }

    fn tier_for(market: &Market, now: u64) -> LtvTier {
        if market.is_frozen {
            return LtvTier::Frozen;
        }

        let time_to_resolution = market.resolution_time.saturating_sub(now);
        if time_to_resolution >= NORMAL_TIER_MIN {
            LtvTier::Normal
        } else if time_to_resolution >= MEDIUM_TIER_MIN {
            LtvTier::MediumRisk
        } else if time_to_resolution >= HIGH_TIER_MIN {
            LtvTier::HighRisk
        } else {
            LtvTier::Frozen
        }
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

    fn load_tiers(env: &Env) -> LtvTiers {
        env.storage()
            .instance()
            .get(&symbol_short!("tiers"))
            .unwrap_or(LtvTiers::default())
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
    use soroban_sdk::testutils::{Address as _, Ledger as _};

    const NOW: u64 = 1_700_000_000;

    // -- Mock market registry ----------------------------------------------

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

    fn setup(env: &Env) -> (RiskTierSchedulerClient<'_>, MockMarketRegistryClient<'_>) {
        env.mock_all_auths();
        env.ledger().set_timestamp(NOW);

        let registry_id = env.register(MockMarketRegistry, ());
        let registry = MockMarketRegistryClient::new(env, &registry_id);

        let scheduler_id = env.register(RiskTierScheduler, ());
        let scheduler = RiskTierSchedulerClient::new(env, &scheduler_id);
        scheduler.initialize(&Address::generate(env), &registry_id);

        (scheduler, registry)
    }

    fn market_resolving_in(env: &Env, registry: &MockMarketRegistryClient, seed: u8, seconds: u64) -> BytesN<32> {
        let condition_id = BytesN::from_array(env, &[seed; 32]);
        registry.set_market(&Market {
            condition_id: condition_id.clone(),
            resolution_time: NOW + seconds,
            is_frozen: false,
            is_registered: true,
            outcome_count: 2,
        });
        condition_id
    }

    #[test]
    fn test_tiers_by_time_to_resolution() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);

        let month = market_resolving_in(&env, &registry, 1, 30 * SECONDS_PER_DAY);
        let five_days = market_resolving_in(&env, &registry, 2, 5 * SECONDS_PER_DAY);
        let thirty_hours = market_resolving_in(&env, &registry, 3, 30 * SECONDS_PER_HOUR);
        let twelve_hours = market_resolving_in(&env, &registry, 4, 12 * SECONDS_PER_HOUR);

        assert_eq!(scheduler.get_max_ltv(&month), 5000);
        assert_eq!(scheduler.get_max_ltv(&five_days), 3500);
        assert_eq!(scheduler.get_max_ltv(&thirty_hours), 2000);
        assert_eq!(scheduler.get_max_ltv(&twelve_hours), 0);

        assert_eq!(scheduler.get_ltv_tier(&month), LtvTier::Normal);
        assert_eq!(scheduler.get_ltv_tier(&five_days), LtvTier::MediumRisk);
        assert_eq!(scheduler.get_ltv_tier(&thirty_hours), LtvTier::HighRisk);
        assert_eq!(scheduler.get_ltv_tier(&twelve_hours), LtvTier::Frozen);
    }

    #[test]
    fn test_tier_boundaries() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);

        let seven_days = market_resolving_in(&env, &registry, 1, NORMAL_TIER_MIN);
        let two_days = market_resolving_in(&env, &registry, 2, MEDIUM_TIER_MIN);
        let one_day = market_resolving_in(&env, &registry, 3, HIGH_TIER_MIN);
        let just_under = market_resolving_in(&env, &registry, 4, HIGH_TIER_MIN - 1);

        assert_eq!(scheduler.get_ltv_tier(&seven_days), LtvTier::Normal);
        assert_eq!(scheduler.get_ltv_tier(&two_days), LtvTier::MediumRisk);
        assert_eq!(scheduler.get_ltv_tier(&one_day), LtvTier::HighRisk);
        assert_eq!(scheduler.get_ltv_tier(&just_under), LtvTier::Frozen);
    }

    #[test]
    fn test_tier_decays_as_time_passes() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);
        let market = market_resolving_in(&env, &registry, 9, 8 * SECONDS_PER_DAY);

        assert_eq!(scheduler.get_max_ltv(&market), 5000);

        env.ledger().set_timestamp(NOW + 2 * SECONDS_PER_DAY);
        assert_eq!(scheduler.get_max_ltv(&market), 3500);

        env.ledger().set_timestamp(NOW + 7 * SECONDS_PER_DAY);
        assert_eq!(scheduler.get_max_ltv(&market), 2000);
        assert!(scheduler.is_borrowing_allowed(&market));

        env.ledger().set_timestamp(NOW + 9 * SECONDS_PER_DAY);
        assert_eq!(scheduler.get_time_to_resolution(&market), 0);
        assert_eq!(scheduler.get_ltv_tier(&market), LtvTier::Frozen);
        assert!(!scheduler.is_borrowing_allowed(&market));
    }

    #[test]
    fn test_manual_freeze_forces_frozen() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);

        let condition_id = BytesN::from_array(&env, &[7; 32]);
        registry.set_market(&Market {
            condition_id: condition_id.clone(),
            resolution_time: NOW + 60 * SECONDS_PER_DAY,
            is_frozen: true,
            is_registered: true,
            outcome_count: 2,
        });

        assert_eq!(scheduler.get_ltv_tier(&condition_id), LtvTier::Frozen);
        assert_eq!(scheduler.get_max_ltv(&condition_id), 0);
        assert_eq!(scheduler.calculate_max_borrow(&1_000_000_000, &condition_id), 0);
    }

    #[test]
    fn test_unregistered_market() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);

        let unknown = BytesN::from_array(&env, &[42; 32]);
        assert_eq!(scheduler.try_get_max_ltv(&unknown), Err(Ok(ContractError::MarketNotRegistered)));

        let condition_id = BytesN::from_array(&env, &[43; 32]);
        registry.set_market(&Market {
            condition_id: condition_id.clone(),
            resolution_time: NOW + 60 * SECONDS_PER_DAY,
            is_frozen: false,
            is_registered: false,
            outcome_count: 2,
        });
        assert_eq!(scheduler.try_get_ltv_tier(&condition_id), Err(Ok(ContractError::MarketNotRegistered)));
    }

    #[test]
    fn test_calculate_max_borrow() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);
        let market = market_resolving_in(&env, &registry, 1, 30 * SECONDS_PER_DAY);

        // 500 USDC of collateral value at 50% LTV
        assert_eq!(scheduler.calculate_max_borrow(&500_000_000, &market), 250_000_000);
        assert_eq!(scheduler.try_calculate_max_borrow(&-1, &market), Err(Ok(ContractError::InvalidAmount)));
    }

    #[test]
    fn test_update_ltv_tiers() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);
        let market = market_resolving_in(&env, &registry, 1, 3 * SECONDS_PER_DAY);

        scheduler.update_ltv_tiers(&6000, &4000, &1000);
        assert_eq!(
            scheduler.get_ltv_tiers(),
            LtvTiers {
                normal_bps: 6000,
                medium_bps: 4000,
                high_bps: 1000
            }
        );
        assert_eq!(scheduler.get_max_ltv(&market), 4000);

        // Equal tiers are allowed
        scheduler.update_ltv_tiers(&3000, &3000, &3000);

        assert_eq!(scheduler.try_update_ltv_tiers(&3000, &4000, &1000), Err(Ok(ContractError::InvalidTierConfig)));
        assert_eq!(scheduler.try_update_ltv_tiers(&5000, &3000, &3500), Err(Ok(ContractError::InvalidTierConfig)));
        assert_eq!(scheduler.try_update_ltv_tiers(&10_001, &3000, &1000), Err(Ok(ContractError::InvalidTierConfig)));
    }

    #[test]
    fn test_update_ltv_tiers_requires_admin() {
        let env = Env::default();
        let (scheduler, _) = setup(&env);

        env.set_auths(&[]);
        assert!(scheduler.try_update_ltv_tiers(&6000, &4000, &1000).is_err());
        assert_eq!(scheduler.get_ltv_tiers(), LtvTiers::default());
    }

    #[test]
    fn test_double_initialize() {
        let env = Env::default();
        let (scheduler, registry) = setup(&env);

        assert_eq!(
            scheduler.try_initialize(&Address::generate(&env), &registry.address),
            Err(Ok(ContractError::AlreadyInitialized))
        );
    }
}
