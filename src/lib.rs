#![no_std]
#![deny(unsafe_code)]
#![deny(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
    String, Symbol, Vec,
};

mod storage;

/// Contract error codes. Auth failures are signaled by host panic (require_auth).
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u32)]
pub enum EscrowError {
    /// Caller is not the operator.
    Unauthorized = 1,
    /// An offering already exists for this partner token.
    DuplicateOffering = 2,
    /// No offering is registered for this partner token.
    UnknownOffering = 3,
    /// Deadline reached; the offering no longer accepts investments.
    OfferingClosed = 4,
    /// Deadline not reached; operator finalization is not yet allowed.
    OfferingNotYetClosed = 5,
    /// Investment would sell more tokens than the approved amount.
    OversellRejected = 6,
    /// Caller has no outstanding position in this offering.
    NoOutstandingPosition = 7,
    /// Offering was already finished or withdrawn.
    AlreadyFinalized = 8,
    /// Escrowed token balance is below the approved amount.
    InsufficientEscrow = 9,
    /// Contract is not initialized (operator not set).
    NotInitialized = 10,
    /// `initialize` was already called.
    AlreadyInitialized = 11,
    /// Amount is zero, negative, or rounds to a zero principal.
    InvalidAmount = 12,
    /// Deadline is not strictly in the future.
    InvalidDeadline = 13,
    /// Partner token may not be the value asset.
    InvalidToken = 14,
    /// Metadata string exceeds MAX_METADATA_LEN bytes.
    MetadataTooLarge = 15,
    /// A settlement call is already executing.
    SettlementInProgress = 16,
    /// Checked arithmetic on amounts overflowed `i128`.
    ArithmeticOverflow = 17,
}

// ── Event symbols ────────────────────────────────────────────
const EVENT_INIT: Symbol = symbol_short!("init");
const EVENT_PARTNER_ADDED: Symbol = symbol_short!("ptr_add");
const EVENT_PARTNER_DELETED: Symbol = symbol_short!("ptr_del");
const EVENT_INVEST: Symbol = symbol_short!("invest");
const EVENT_RETURN: Symbol = symbol_short!("inv_ret");
const EVENT_CONFIRM: Symbol = symbol_short!("inv_conf");
const EVENT_FINISH: Symbol = symbol_short!("finish");
const EVENT_WITHDRAW: Symbol = symbol_short!("withdrawn");
const EVENT_FEE_SWEEP: Symbol = symbol_short!("fee_sweep");

/// Contract version identifier. Bumped when storage or semantics change.
pub const CONTRACT_VERSION: u32 = 1;

/// Maximum number of offerings returned in a single page.
const MAX_PAGE_LIMIT: u32 = 20;

/// Maximum metadata length in bytes.
const MAX_METADATA_LEN: u32 = 1_024;

// ── Data structures ──────────────────────────────────────────

/// A partner's time-boxed token sale.
///
/// `invested_amount` is the sum of all outstanding positions, in value-units.
/// `tokens_sold` counts tokens already delivered to investors and
/// `tokens_reserved` the tokens owed to outstanding positions
/// (`sum(position / rate)`); together they never exceed `approved_amount`.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct Offering {
    pub token: Address,
    pub wallet: Address,
    pub rate: i128,
    pub deadline: u64,
    pub approved_amount: i128,
    pub invested_amount: i128,
    pub metadata: String,
    pub tokens_sold: i128,
    pub tokens_reserved: i128,
    /// Set by `withdraw_earned`: principal and unsold reserve already released.
    pub withdrawn: bool,
}

/// Outcome of `finish_offering`.
#[contracttype]
#[derive(Clone, Debug, PartialEq)]
pub struct Settlement {
    /// Tokens delivered to investors by this call.
    pub tokens_distributed: i128,
    /// Principal forwarded to the partner wallet by this call.
    pub principal_forwarded: i128,
    /// Unsold tokens returned to the partner wallet by this call.
    pub reserve_returned: i128,
    /// Number of positions settled.
    pub positions: u32,
}

// ── Contract ─────────────────────────────────────────────────
#[contract]
pub struct PartnerEscrow;

#[contractimpl]
impl PartnerEscrow {
    /// Require `caller` to authorize and to be the configured operator.
    fn require_operator(env: &Env, caller: &Address) -> Result<(), EscrowError> {
        caller.require_auth();
        let operator = storage::get_operator(env)?;
        if *caller != operator {
            return Err(EscrowError::Unauthorized);
        }
        Ok(())
    }

    fn now(env: &Env) -> u64 {
        env.ledger().timestamp()
    }

    /// Resolve a missing offering into the error a finalization call reports.
    fn missing_offering(env: &Env, token: &Address) -> EscrowError {
        if storage::is_finalized(env, token) {
            EscrowError::AlreadyFinalized
        } else {
            EscrowError::UnknownOffering
        }
    }

    /// Split a bundled payment into `(principal, fee)`.
    ///
    /// The principal is the largest `p` with `p + p / fee_denominator <= tx_value`,
    /// i.e. `floor(((tx_value + 1) * d - 1) / (d + 1))`; the fee takes the
    /// remainder. A payment of exactly `p + p / d` splits back into `p`.
    fn split_payment(env: &Env, tx_value: i128) -> Result<(i128, i128), EscrowError> {
        if tx_value <= 0 {
            return Err(EscrowError::InvalidAmount);
        }
        let denominator = storage::get_fee_denominator(env)? as i128;
        let principal = tx_value
            .checked_add(1)
            .and_then(|v| v.checked_mul(denominator))
            .ok_or(EscrowError::ArithmeticOverflow)?
            .saturating_sub(1)
            / (denominator + 1);
        if principal <= 0 {
            return Err(EscrowError::InvalidAmount);
        }
        Ok((principal, tx_value - principal))
    }

    // ── Configuration ─────────────────────────────────────────

    /// One-time setup of the operator, the value asset and the fee denominator
    /// (`fee = principal / fee_denominator`).
    pub fn initialize(
        env: Env,
        operator: Address,
        value_asset: Address,
        fee_denominator: u32,
    ) -> Result<(), EscrowError> {
        if storage::has_operator(&env) {
            return Err(EscrowError::AlreadyInitialized);
        }
        operator.require_auth();
        if fee_denominator == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        storage::set_config(&env, &operator, &value_asset, fee_denominator);
        env.events()
            .publish((EVENT_INIT, operator), (value_asset, fee_denominator));
        Ok(())
    }

    pub fn get_operator(env: Env) -> Option<Address> {
        storage::get_operator(&env).ok()
    }

    pub fn get_value_asset(env: Env) -> Option<Address> {
        storage::get_value_asset(&env).ok()
    }

    pub fn get_fee_denominator(env: Env) -> u32 {
        storage::get_fee_denominator(&env).unwrap_or(0)
    }

    // ── Partner registry ──────────────────────────────────────

    /// Register an offering for `token`. Operator only.
    ///
    /// The operator must transfer at least `approved_amount` of `token` to this
    /// contract beforehand; the escrowed balance is checked here.
    pub fn add_partner(
        env: Env,
        caller: Address,
        token: Address,
        wallet: Address,
        rate: i128,
        approved_amount: i128,
        deadline: u64,
        metadata: String,
    ) -> Result<(), EscrowError> {
        Self::require_operator(&env, &caller)?;

        if storage::has_partner(&env, &token) {
            return Err(EscrowError::DuplicateOffering);
        }
        if deadline <= Self::now(&env) {
            return Err(EscrowError::InvalidDeadline);
        }
        if rate <= 0 || approved_amount < 0 {
            return Err(EscrowError::InvalidAmount);
        }
        if token == storage::get_value_asset(&env)? {
            return Err(EscrowError::InvalidToken);
        }
        if metadata.len() > MAX_METADATA_LEN {
            return Err(EscrowError::MetadataTooLarge);
        }

        let escrowed = token::Client::new(&env, &token).balance(&env.current_contract_address());
        if escrowed < approved_amount {
            log!(
                &env,
                "escrow shortfall: held {}, approved {}",
                escrowed,
                approved_amount
            );
            return Err(EscrowError::InsufficientEscrow);
        }

        let offering = Offering {
            token: token.clone(),
            wallet: wallet.clone(),
            rate,
            deadline,
            approved_amount,
            invested_amount: 0,
            metadata,
            tokens_sold: 0,
            tokens_reserved: 0,
            withdrawn: false,
        };
        storage::set_partner(&env, &offering);
        storage::push_partner_key(&env, &token);
        storage::clear_finalized(&env, &token);

        env.events().publish(
            (EVENT_PARTNER_ADDED, token),
            (wallet, rate, approved_amount, deadline),
        );
        Ok(())
    }

    /// Remove an offering, its key and its investment entries. Operator only.
    ///
    /// Moves no funds. Principal still held for open positions stays in the
    /// contract with no claim record left to recover it, so outstanding
    /// positions must be settled beforehand. The event reports that amount as
    /// `stranded_principal` alongside the tokens still reserved.
    pub fn delete_partner(env: Env, caller: Address, token: Address) -> Result<(), EscrowError> {
        Self::require_operator(&env, &caller)?;
        let offering = storage::load_partner(&env, &token)?;

        storage::clear_investments(&env, &token);
        storage::remove_partner(&env, &token);

        let stranded_principal = offering.invested_amount;
        if stranded_principal > 0 {
            log!(&env, "deleted with open positions: principal {}", stranded_principal);
        }
        env.events().publish(
            (EVENT_PARTNER_DELETED, token),
            (stranded_principal, offering.tokens_reserved),
        );
        Ok(())
    }

    pub fn get_partner(env: Env, token: Address) -> Option<Offering> {
        storage::get_partner(&env, &token)
    }

    /// Active partner tokens in registration order.
    pub fn get_partners(env: Env) -> Vec<Address> {
        storage::get_partner_keys(&env)
    }

    /// Return a page of active offerings. Limit capped at MAX_PAGE_LIMIT (20).
    /// Ordering: registration order among the offerings still active.
    pub fn get_partners_page(env: Env, start: u32, limit: u32) -> (Vec<Offering>, Option<u32>) {
        let keys = storage::get_partner_keys(&env);
        let count = keys.len();

        let effective_limit = if limit == 0 || limit > MAX_PAGE_LIMIT {
            MAX_PAGE_LIMIT
        } else {
            limit
        };

        if start >= count {
            return (Vec::new(&env), None);
        }

        let end = core::cmp::min(start + effective_limit, count);
        let mut results = Vec::new(&env);
        for i in start..end {
            if let Some(offering) = keys.get(i).and_then(|t| storage::get_partner(&env, &t)) {
                results.push_back(offering);
            }
        }

        let next_cursor = if end < count { Some(end) } else { None };
        (results, next_cursor)
    }

    /// Outstanding principal of `investor` in `token`'s offering (0 if none).
    pub fn get_invested(env: Env, token: Address, investor: Address) -> i128 {
        storage::get_investment(&env, &token, &investor)
    }

    /// Every investor that has held a position in the current offering, in
    /// first-investment order. Settled investors stay listed with a zero position.
    pub fn get_investors(env: Env, token: Address) -> Vec<Address> {
        storage::get_investors(&env, &token)
    }

    // ── Investment ledger ─────────────────────────────────────

    /// Preview how `tx_value` splits into `(principal, fee)`.
    pub fn quote_investment(env: Env, tx_value: i128) -> Result<(i128, i128), EscrowError> {
        Self::split_payment(&env, tx_value)
    }

    /// Invest in `token`'s offering by paying `tx_value` of the value asset.
    ///
    /// The payment bundles principal and fee; the principal joins the
    /// investor's position in escrow and the fee goes to the fee treasury.
    /// Returns the principal credited.
    pub fn invest(
        env: Env,
        investor: Address,
        token: Address,
        tx_value: i128,
    ) -> Result<i128, EscrowError> {
        investor.require_auth();
        let value_asset = storage::get_value_asset(&env)?;
        let mut offering = storage::load_partner(&env, &token)?;
        if Self::now(&env) >= offering.deadline {
            return Err(EscrowError::OfferingClosed);
        }

        let (principal, fee) = Self::split_payment(&env, tx_value)?;

        let position = storage::get_investment(&env, &token, &investor);
        let new_position = position
            .checked_add(principal)
            .ok_or(EscrowError::ArithmeticOverflow)?;
        let invested = offering
            .invested_amount
            .checked_add(principal)
            .ok_or(EscrowError::ArithmeticOverflow)?;

        let owed_delta = new_position / offering.rate - position / offering.rate;
        let reserved = offering
            .tokens_reserved
            .checked_add(owed_delta)
            .ok_or(EscrowError::ArithmeticOverflow)?;
        let committed = offering
            .tokens_sold
            .checked_add(reserved)
            .ok_or(EscrowError::ArithmeticOverflow)?;
        if offering.approved_amount == 0
            || invested / offering.rate > offering.approved_amount
            || committed > offering.approved_amount
        {
            log!(
                &env,
                "oversell: committed {}, approved {}",
                committed,
                offering.approved_amount
            );
            return Err(EscrowError::OversellRejected);
        }

        let contract_addr = env.current_contract_address();
        token::Client::new(&env, &value_asset).transfer(&investor, &contract_addr, &tx_value);

        storage::set_investment(&env, &token, &investor, new_position);
        storage::add_investor(&env, &token, &investor);
        offering.invested_amount = invested;
        offering.tokens_reserved = reserved;
        storage::set_partner(&env, &offering);

        let fees = storage::get_fee_balance(&env)
            .checked_add(fee)
            .ok_or(EscrowError::ArithmeticOverflow)?;
        storage::set_fee_balance(&env, fees);

        env.events()
            .publish((EVENT_INVEST, token, investor), (principal, fee));
        Ok(principal)
    }

    // ── Settlement ────────────────────────────────────────────

    /// Refund the caller's outstanding principal. The fee is not refunded.
    ///
    /// Not deadline-gated, but unavailable once `withdraw_earned` has released
    /// the escrowed principal to the partner.
    pub fn return_investment(
        env: Env,
        investor: Address,
        token: Address,
    ) -> Result<i128, EscrowError> {
        investor.require_auth();
        storage::acquire_lock(&env)?;
        let value_asset = storage::get_value_asset(&env)?;
        let mut offering = storage::load_partner(&env, &token)?;
        if offering.withdrawn {
            return Err(EscrowError::AlreadyFinalized);
        }

        let position = storage::get_investment(&env, &token, &investor);
        if position <= 0 {
            return Err(EscrowError::NoOutstandingPosition);
        }

        storage::set_investment(&env, &token, &investor, 0);
        offering.invested_amount -= position;
        offering.tokens_reserved -= position / offering.rate;
        storage::set_partner(&env, &offering);

        let contract_addr = env.current_contract_address();
        token::Client::new(&env, &value_asset).transfer(&contract_addr, &investor, &position);

        env.events()
            .publish((EVENT_RETURN, token, investor), position);
        storage::release_lock(&env);
        Ok(position)
    }

    /// Settle the caller's position: deliver `position / rate` tokens and
    /// forward the principal to the partner wallet. Returns the tokens delivered.
    ///
    /// After `withdraw_earned` the principal has already reached the wallet, so
    /// only tokens move.
    pub fn confirm_investment(
        env: Env,
        investor: Address,
        token: Address,
    ) -> Result<i128, EscrowError> {
        investor.require_auth();
        storage::acquire_lock(&env)?;
        let mut offering = storage::load_partner(&env, &token)?;

        let position = storage::get_investment(&env, &token, &investor);
        if position <= 0 {
            return Err(EscrowError::NoOutstandingPosition);
        }
        let tokens = position / offering.rate;

        storage::set_investment(&env, &token, &investor, 0);
        offering.invested_amount -= position;
        offering.tokens_reserved -= tokens;
        offering.tokens_sold += tokens;
        storage::set_partner(&env, &offering);

        let contract_addr = env.current_contract_address();
        if tokens > 0 {
            token::Client::new(&env, &token).transfer(&contract_addr, &investor, &tokens);
        }
        let forwarded = if offering.withdrawn { 0 } else { position };
        if forwarded > 0 {
            let value_asset = storage::get_value_asset(&env)?;
            token::Client::new(&env, &value_asset).transfer(
                &contract_addr,
                &offering.wallet,
                &forwarded,
            );
        }

        env.events()
            .publish((EVENT_CONFIRM, token, investor), (tokens, forwarded));
        storage::release_lock(&env);
        Ok(tokens)
    }

    /// Settle every outstanding position, return the unsold reserve to the
    /// partner wallet and remove the offering. Operator only, after the deadline.
    ///
    /// All positions are zeroed and the registry entry removed before any
    /// transfer is issued.
    pub fn finish_offering(
        env: Env,
        caller: Address,
        token: Address,
    ) -> Result<Settlement, EscrowError> {
        Self::require_operator(&env, &caller)?;
        storage::acquire_lock(&env)?;
        let offering = storage::get_partner(&env, &token)
            .ok_or_else(|| Self::missing_offering(&env, &token))?;
        if Self::now(&env) < offering.deadline {
            return Err(EscrowError::OfferingNotYetClosed);
        }

        let mut payouts: Vec<(Address, i128)> = Vec::new(&env);
        let mut principal_total: i128 = 0;
        let mut tokens_total: i128 = 0;
        for investor in storage::get_investors(&env, &token).iter() {
            let position = storage::get_investment(&env, &token, &investor);
            if position <= 0 {
                continue;
            }
            let tokens = position / offering.rate;
            principal_total = principal_total
                .checked_add(position)
                .ok_or(EscrowError::ArithmeticOverflow)?;
            tokens_total = tokens_total
                .checked_add(tokens)
                .ok_or(EscrowError::ArithmeticOverflow)?;
            payouts.push_back((investor, tokens));
        }

        // After a withdraw the reserve is already with the partner and the
        // principal already forwarded.
        let (forwarded, reserve) = if offering.withdrawn {
            (0, 0)
        } else {
            let sold = offering.tokens_sold + tokens_total;
            (principal_total, offering.approved_amount - sold)
        };

        storage::clear_investments(&env, &token);
        storage::remove_partner(&env, &token);
        storage::set_finalized(&env, &token);

        let contract_addr = env.current_contract_address();
        let sale_token = token::Client::new(&env, &token);
        for (investor, tokens) in payouts.iter() {
            if tokens > 0 {
                sale_token.transfer(&contract_addr, &investor, &tokens);
            }
        }
        if forwarded > 0 {
            let value_asset = storage::get_value_asset(&env)?;
            token::Client::new(&env, &value_asset).transfer(
                &contract_addr,
                &offering.wallet,
                &forwarded,
            );
        }
        if reserve > 0 {
            sale_token.transfer(&contract_addr, &offering.wallet, &reserve);
        }

        let settlement = Settlement {
            tokens_distributed: tokens_total,
            principal_forwarded: forwarded,
            reserve_returned: reserve,
            positions: payouts.len(),
        };
        env.events()
            .publish((EVENT_FINISH, token, caller), settlement.clone());
        storage::release_lock(&env);
        Ok(settlement)
    }

    /// Release the outstanding principal and the reserve beyond outstanding
    /// obligations to the partner wallet, keeping the offering registered so
    /// investors can still confirm. Operator only, after the deadline, once.
    ///
    /// Returns `(principal_forwarded, reserve_returned)`.
    pub fn withdraw_earned(
        env: Env,
        caller: Address,
        token: Address,
    ) -> Result<(i128, i128), EscrowError> {
        Self::require_operator(&env, &caller)?;
        storage::acquire_lock(&env)?;
        let mut offering = storage::get_partner(&env, &token)
            .ok_or_else(|| Self::missing_offering(&env, &token))?;
        if offering.withdrawn {
            return Err(EscrowError::AlreadyFinalized);
        }
        if Self::now(&env) < offering.deadline {
            return Err(EscrowError::OfferingNotYetClosed);
        }

        let principal = offering.invested_amount;
        let reserve = offering.approved_amount - offering.tokens_sold - offering.tokens_reserved;

        offering.withdrawn = true;
        storage::set_partner(&env, &offering);

        let contract_addr = env.current_contract_address();
        if principal > 0 {
            let value_asset = storage::get_value_asset(&env)?;
            token::Client::new(&env, &value_asset).transfer(
                &contract_addr,
                &offering.wallet,
                &principal,
            );
        }
        if reserve > 0 {
            token::Client::new(&env, &token).transfer(&contract_addr, &offering.wallet, &reserve);
        }

        env.events()
            .publish((EVENT_WITHDRAW, token, caller), (principal, reserve));
        storage::release_lock(&env);
        Ok((principal, reserve))
    }

    // ── Fee treasury ──────────────────────────────────────────

    /// Accrued origination fees, in value-units.
    pub fn get_fee_balance(env: Env) -> i128 {
        storage::get_fee_balance(&env)
    }

    /// Sweep all accrued fees to `recipient`. Operator only. Returns the amount swept.
    pub fn withdraw_fees(env: Env, caller: Address, recipient: Address) -> Result<i128, EscrowError> {
        Self::require_operator(&env, &caller)?;
        let value_asset = storage::get_value_asset(&env)?;
        let amount = storage::get_fee_balance(&env);
        storage::set_fee_balance(&env, 0);

        if amount > 0 {
            let contract_addr = env.current_contract_address();
            token::Client::new(&env, &value_asset).transfer(&contract_addr, &recipient, &amount);
        }

        env.events()
            .publish((EVENT_FEE_SWEEP, caller), (recipient, amount));
        Ok(amount)
    }

    /// Return the current contract version.
    pub fn get_version(env: Env) -> u32 {
        let _ = env;
        CONTRACT_VERSION
    }
}

mod test_auth;
mod test_invariants;
