//! Liquidation Engine Contract
//!
//! Tracks borrower positions per collateral asset, values them with the
//! price oracle's TWAP and lets liquidators repay part of an unhealthy
//! position's debt in exchange for discounted collateral. Position amounts are
//! written by the lending orchestrator; this contract never moves funds except
//! during a liquidation.

#![no_std]

use fixed_point_math::{add_bps, mul_div, rescale, LOAN_DECIMALS, PRICE_DECIMALS, PRICE_SCALE};
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, symbol_short, token, Address, BytesN,
    Env, IntoVal, Symbol, Val, Vec,
};

// ============================================================================
// Error Types
// ============================================================================

#[contracterror]
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum ContractError {
    // Initialization errors
    AlreadyInitialized = 1,
    NotInitialized = 2,
    NotConfigured = 3,
    AlreadyConfigured = 4,

    // Validation errors
    ZeroAmount = 5,
    InvalidAmount = 6,
    InvalidThreshold = 7,
    InvalidBonus = 8,
    InvalidCloseFactor = 9,

    // Liquidation errors
    NotLiquidatable = 10,
    ExceedsCloseFactor = 11,
    Reentrancy = 12,

    // Cross-contract errors
    PriceUnavailable = 13,

    // Math errors
    MathOverflow = 14,
}

// ============================================================================
// Data Structures
// ============================================================================

/// Upper bound for the liquidation bonus (50%)
pub const MAX_LIQUIDATION_BONUS_BPS: u32 = 5_000;

/// Risk parameters, all in basis points
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LiquidationParameters {
    /// Share of collateral value that counts toward the health factor
    pub liquidation_threshold_bps: u32,
    /// Extra collateral paid to the liquidator on top of the repaid value
    pub liquidation_bonus_bps: u32,
    /// Largest share of outstanding debt one liquidation may repay
    pub close_factor_bps: u32,
}

impl LiquidationParameters {
    pub fn default() -> Self {
        Self {
            liquidation_threshold_bps: 7_500,
            liquidation_bonus_bps: 1_000,
            close_factor_bps: 5_000,
        }
    }
}

/// Borrower position for one collateral asset
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Position {
    pub asset: Address,
    pub market_id: BytesN<32>,
    /// Outcome token units, 18 decimals
    pub collateral_amount: i128,
    /// Loan currency, 6 decimals
    pub debt_amount: i128,
    pub last_update_timestamp: u64,
}

/// Outcome of the most recent liquidation of a position
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LiquidationRecord {
    pub liquidator: Address,
    pub repay_amount: i128,
    pub collateral_seized: i128,
    pub debt_remaining: i128,
    pub collateral_remaining: i128,
    pub timestamp: u64,
}

/// Addresses supplied by `configure`
#[contracttype]
#[derive(Clone, Debug)]
pub struct Wiring {
    pub orchestrator: Address,
    pub custody: Address,
    pub pool: Address,
    pub loan_token: Address,
}

// ============================================================================
// Event Symbols
// ============================================================================

const EVT_INIT: Symbol = symbol_short!("liq_init");
const EVT_CONFIGURED: Symbol = symbol_short!("liq_cfg");
const EVT_DEBT_UPD: Symbol = symbol_short!("pos_debt");
const EVT_COLL_UPD: Symbol = symbol_short!("pos_coll");
const EVT_LIQUIDATED: Symbol = symbol_short!("liq_exec");
const EVT_SEIZED: Symbol = symbol_short!("coll_szd");
const EVT_PARAMS_UPD: Symbol = symbol_short!("prm_upd");

// ============================================================================
// Contract Implementation
// ============================================================================

#[contract]
pub struct LiquidationEngine;

#[contractimpl]
impl LiquidationEngine {
    /// Initialize the engine
    ///
    /// # Arguments
    /// * `admin` - Governs parameters and wiring
    /// * `price_oracle` - Contract answering `get_twap(asset) -> (price, timestamp)`
    pub fn initialize(env: Env, admin: Address, price_oracle: Address) -> Result<(), ContractError> {
        if env.storage().instance().has(&symbol_short!("admin")) {
            return Err(ContractError::AlreadyInitialized);
        }

        env.storage().instance().set(&symbol_short!("admin"), &admin);
        env.storage()
            .instance()
            .set(&symbol_short!("oracle"), &price_oracle);
        env.storage()
            .instance()
            .set(&symbol_short!("params"), &LiquidationParameters::default());

        env.events().publish((EVT_INIT,), (admin, price_oracle));
        Ok(())
    }

    /// Wire the orchestrator, custody, liquidity pool and loan token (admin only, once)
    pub fn configure(
        env: Env,
        orchestrator: Address,
        custody: Address,
        pool: Address,
        loan_token: Address,
    ) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        if env.storage().instance().has(&symbol_short!("wiring")) {
            return Err(ContractError::AlreadyConfigured);
        }

        let wiring = Wiring {
            orchestrator: orchestrator.clone(),
            custody,
            pool,
            loan_token,
        };
        env.storage().instance().set(&symbol_short!("wiring"), &wiring);

        env.events().publish((EVT_CONFIGURED,), (orchestrator,));
        Ok(())
    }

    // ========================================================================
    // Position bookkeeping
    // ========================================================================

    /// Overwrite the debt of a position (orchestrator only)
    pub fn update_position_debt(
        env: Env,
        borrower: Address,
        asset: Address,
        market_id: BytesN<32>,
        debt: i128,
    ) -> Result<(), ContractError> {
        let wiring = Self::load_wiring(&env)?;
        wiring.orchestrator.require_auth();

        if debt < 0 {
            return Err(ContractError::InvalidAmount);
        }

        let mut position = Self::position_or_empty(&env, &borrower, &asset, &market_id);
        position.market_id = market_id;
        position.debt_amount = debt;
        position.last_update_timestamp = env.ledger().timestamp();
        Self::save_position(&env, &borrower, &asset, &position);

        env.events()
            .publish((EVT_DEBT_UPD, borrower), (asset, debt));
        Ok(())
    }

    /// Overwrite the collateral of a position (orchestrator only)
    pub fn update_position_collateral(
        env: Env,
        borrower: Address,
        asset: Address,
        market_id: BytesN<32>,
        collateral: i128,
    ) -> Result<(), ContractError> {
        let wiring = Self::load_wiring(&env)?;
        wiring.orchestrator.require_auth();

        if collateral < 0 {
            return Err(ContractError::InvalidAmount);
        }

        let mut position = Self::position_or_empty(&env, &borrower, &asset, &market_id);
        position.market_id = market_id;
        position.collateral_amount = collateral;
        position.last_update_timestamp = env.ledger().timestamp();
        Self::save_position(&env, &borrower, &asset, &position);

        env.events()
            .publish((EVT_COLL_UPD, borrower), (asset, collateral));
        Ok(())
    }

    pub fn get_position(env: Env, borrower: Address, asset: Address) -> Option<Position> {
        env.storage()
            .persistent()
            .get(&(symbol_short!("pos"), borrower, asset))
    }

    // ========================================================================
    // Risk views
    // ========================================================================

    /// Health factor in 18-decimal fixed point; below 1.0 the position is liquidatable
    ///
    /// # Arguments
    /// * `collateral_value` - Collateral value in loan currency (6 decimals)
    /// * `debt` - Outstanding debt in loan currency (6 decimals)
    pub fn calculate_health_factor(
        env: Env,
        collateral_value: i128,
        debt: i128,
    ) -> Result<i128, ContractError> {
        if debt == 0 {
            return Ok(i128::MAX);
        }

        let params = Self::get_parameters(env.clone());
        let weighted = collateral_value
            .checked_mul(params.liquidation_threshold_bps as i128)
            .ok_or(ContractError::MathOverflow)?;
        let denominator = debt
            .checked_mul(fixed_point_math::BPS_DENOMINATOR)
            .ok_or(ContractError::MathOverflow)?;

        mul_div(&env, weighted, PRICE_SCALE, denominator).ok_or(ContractError::MathOverflow)
    }

    /// Collateral of a position valued at the TWAP, in loan currency
    pub fn get_collateral_value(
        env: Env,
        borrower: Address,
        asset: Address,
    ) -> Result<i128, ContractError> {
        let collateral = Self::get_position(env.clone(), borrower, asset.clone())
            .map(|p| p.collateral_amount)
            .unwrap_or(0);
        Self::value_collateral(&env, &asset, collateral)
    }

    pub fn get_health_factor(
        env: Env,
        borrower: Address,
        asset: Address,
    ) -> Result<i128, ContractError> {
        let debt = Self::get_position(env.clone(), borrower.clone(), asset.clone())
            .map(|p| p.debt_amount)
            .unwrap_or(0);
        if debt == 0 {
            return Ok(i128::MAX);
        }

        let value = Self::get_collateral_value(env.clone(), borrower, asset)?;
        Self::calculate_health_factor(env, value, debt)
    }

    pub fn is_liquidatable(env: Env, borrower: Address, asset: Address) -> Result<bool, ContractError> {
        let health = Self::get_health_factor(env, borrower, asset)?;
        Ok(health < PRICE_SCALE)
    }

    /// Largest repay amount a single liquidation accepts
    pub fn get_max_liquidation(
        env: Env,
        borrower: Address,
        asset: Address,
    ) -> Result<i128, ContractError> {
        let debt = Self::get_position(env.clone(), borrower, asset)
            .map(|p| p.debt_amount)
            .unwrap_or(0);
        Self::close_factor_cap(&env, debt)
    }

    /// Collateral units paid out for repaying `repay_amount` of loan currency
    pub fn calculate_seize_amount(
        env: Env,
        asset: Address,
        repay_amount: i128,
    ) -> Result<i128, ContractError> {
        let (price, _) = Self::fetch_twap(&env, &asset)?;
        if price == 0 {
            return Ok(0);
        }

        let params = Self::get_parameters(env.clone());
        let with_bonus = add_bps(repay_amount, params.liquidation_bonus_bps)
            .ok_or(ContractError::MathOverflow)?;
        let scaled = rescale(with_bonus, LOAN_DECIMALS, PRICE_DECIMALS)
            .ok_or(ContractError::MathOverflow)?;

        mul_div(&env, scaled, PRICE_SCALE, price).ok_or(ContractError::MathOverflow)
    }

    // ========================================================================
    // Liquidation
    // ========================================================================

    /// Repay part of an unhealthy position and receive its collateral plus the bonus
    ///
    /// The orchestrator and the liquidator both authorize. The loan token moves
    /// from the liquidator to the pool and the custody releases the seized
    /// collateral to the liquidator.
    ///
    /// # Returns
    /// The collateral units seized
    pub fn execute_liquidation(
        env: Env,
        liquidator: Address,
        borrower: Address,
        asset: Address,
        repay_amount: i128,
    ) -> Result<i128, ContractError> {
        if env.storage().instance().has(&symbol_short!("lock")) {
            return Err(ContractError::Reentrancy);
        }
        env.storage().instance().set(&symbol_short!("lock"), &true);

        let seized = Self::liquidate(&env, &liquidator, &borrower, &asset, repay_amount)?;

        env.storage().instance().remove(&symbol_short!("lock"));
        Ok(seized)
    }

    pub fn get_liquidation_record(
        env: Env,
        borrower: Address,
        asset: Address,
    ) -> Option<LiquidationRecord> {
        env.storage()
            .persistent()
            .get(&(symbol_short!("liq_rec"), borrower, asset))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub fn update_parameters(
        env: Env,
        liquidation_threshold_bps: u32,
        liquidation_bonus_bps: u32,
        close_factor_bps: u32,
    ) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        if liquidation_threshold_bps > 10_000 {
            return Err(ContractError::InvalidThreshold);
        }
        if liquidation_bonus_bps > MAX_LIQUIDATION_BONUS_BPS {
            return Err(ContractError::InvalidBonus);
        }
        if close_factor_bps > 10_000 {
            return Err(ContractError::InvalidCloseFactor);
        }

        let params = LiquidationParameters {
            liquidation_threshold_bps,
            liquidation_bonus_bps,
            close_factor_bps,
        };
        env.storage().instance().set(&symbol_short!("params"), &params);

        env.events().publish(
            (EVT_PARAMS_UPD,),
            (liquidation_threshold_bps, liquidation_bonus_bps, close_factor_bps),
        );
        Ok(())
    }

    pub fn get_parameters(env: Env) -> LiquidationParameters {
        env.storage()
            .instance()
            .get(&symbol_short!("params"))
            .unwrap_or(LiquidationParameters::default())
    }

    pub fn set_price_oracle(env: Env, price_oracle: Address) -> Result<(), ContractError> {
        Self::check_admin(&env)?;

        env.storage()
            .instance()
            .set(&symbol_short!("oracle"), &price_oracle);
        Ok(())
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn liquidate(
        env: &Env,
        liquidator: &Address,
        borrower: &Address,
        asset: &Address,
        repay_amount: i128,
    ) -> Result<i128, ContractError> {
        let wiring = Self::load_wiring(env)?;
        wiring.orchestrator.require_auth();
        liquidator.require_auth();

        if repay_amount <= 0 {
            return Err(ContractError::ZeroAmount);
        }

        let mut position = Self::get_position(env.clone(), borrower.clone(), asset.clone())
            .ok_or(ContractError::NotLiquidatable)?;
        if !Self::is_liquidatable(env.clone(), borrower.clone(), asset.clone())? {
            return Err(ContractError::NotLiquidatable);
        }
        if repay_amount > Self::close_factor_cap(env, position.debt_amount)? {
            return Err(ContractError::ExceedsCloseFactor);
        }

        let seize = Self::calculate_seize_amount(env.clone(), asset.clone(), repay_amount)?
            .min(position.collateral_amount);

        position.debt_amount = position
            .debt_amount
            .checked_sub(repay_amount)
            .ok_or(ContractError::MathOverflow)?;
        position.collateral_amount = position
            .collateral_amount
            .checked_sub(seize)
            .ok_or(ContractError::MathOverflow)?;
        position.last_update_timestamp = env.ledger().timestamp();
        Self::save_position(env, borrower, asset, &position);

        let record = LiquidationRecord {
            liquidator: liquidator.clone(),
            repay_amount,
            collateral_seized: seize,
            debt_remaining: position.debt_amount,
            collateral_remaining: position.collateral_amount,
            timestamp: env.ledger().timestamp(),
        };
        env.storage().persistent().set(
            &(symbol_short!("liq_rec"), borrower.clone(), asset.clone()),
            &record,
        );

        token::Client::new(env, &wiring.loan_token).transfer(liquidator, &wiring.pool, &repay_amount);

        let args: Vec<Val> = Vec::from_array(
            env,
            [
                borrower.into_val(env),
                liquidator.into_val(env),
                asset.into_val(env),
                seize.into_val(env),
            ],
        );
        env.invoke_contract::<()>(&wiring.custody, &Symbol::new(env, "seize_collateral"), args);

        env.events().publish(
            (EVT_LIQUIDATED, borrower.clone()),
            (liquidator.clone(), repay_amount, seize),
        );
        env.events()
            .publish((EVT_SEIZED, asset.clone()), (liquidator.clone(), seize));

        Ok(seize)
    }

    fn value_collateral(env: &Env, asset: &Address, collateral: i128) -> Result<i128, ContractError> {
        if collateral == 0 {
            return Ok(0);
        }

        let (price, _) = Self::fetch_twap(env, asset)?;
        let value = mul_div(env, collateral, price, PRICE_SCALE).ok_or(ContractError::MathOverflow)?;
        rescale(value, PRICE_DECIMALS, LOAN_DECIMALS).ok_or(ContractError::MathOverflow)
    }

    fn close_factor_cap(env: &Env, debt: i128) -> Result<i128, ContractError> {
        let params = Self::get_parameters(env.clone());
        fixed_point_math::apply_bps(debt, params.close_factor_bps).ok_or(ContractError::MathOverflow)
    }

    fn fetch_twap(env: &Env, asset: &Address) -> Result<(i128, u64), ContractError> {
        let oracle: Address = env
            .storage()
            .instance()
            .get(&symbol_short!("oracle"))
            .ok_or(ContractError::NotInitialized)?;

        let args: Vec<Val> = Vec::from_array(env, [asset.into_val(env)]);
        match env.try_invoke_contract::<(i128, u64), ContractError>(
            &oracle,
            &Symbol::new(env, "get_twap"),
            args,
        ) {
            Ok(Ok(twap)) => Ok(twap),
            _ => Err(ContractError::PriceUnavailable),
        }
    }

    fn position_or_empty(
        env: &Env,
        borrower: &Address,
        asset: &Address,
        market_id: &BytesN<32>,
    ) -> Position {
        Self::get_position(env.clone(), borrower.clone(), asset.clone()).unwrap_or(Position {
            asset: asset.clone(),
            market_id: market_id.clone(),
            collateral_amount: 0,
            debt_amount: 0,
            last_update_timestamp: 0,
        })
    }

    fn save_position(env: &Env, borrower: &Address, asset: &Address, position: &Position) {
        env.storage().persistent().set(
            &(symbol_short!("pos"), borrower.clone(), asset.clone()),
            position,
        );
    }

    fn load_wiring(env: &Env) -> Result<Wiring, ContractError> {
        env.storage()
            .instance()
            .get(&symbol_short!("wiring"))
            .ok_or(ContractError::NotConfigured)
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

// ============================================================================
// Tests
// ============================================================================
