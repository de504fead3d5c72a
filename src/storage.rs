use soroban_sdk::{contracttype, Address, Env, Vec};

use crate::{EscrowError, Offering};

/// Storage keys. Configuration, the registry, the investment ledger and the fee
/// treasury live in persistent storage; the settlement lock lives in instance
/// storage for the duration of a single invocation.
#[contracttype]
#[derive(Clone)]
pub enum DataKey {
    /// Single operator allowed to run registry and finalization operations.
    Operator,
    /// Token contract used as the native value unit (principal, fees).
    ValueAsset,
    /// `fee = principal / FeeDenominator`.
    FeeDenominator,
    /// Accrued origination fees, in value-units.
    FeeBalance,
    /// Ordered list of active partner token addresses.
    PartnerKeys,
    /// Offering terms and counters keyed by partner token.
    Partner(Address),
    /// Outstanding principal for (partner token, investor).
    Investment(Address, Address),
    /// Investors that have ever held a position in the current offering of a token.
    Investors(Address),
    /// Set once `finish_offering` has run for a token; cleared by the next `add_partner`.
    Finalized(Address),
    /// Held in instance storage while a settlement call is executing.
    SettlementLock,
}

// ── Configuration ────────────────────────────────────────────

pub fn has_operator(env: &Env) -> bool {
    env.storage().persistent().has(&DataKey::Operator)
}

pub fn get_operator(env: &Env) -> Result<Address, EscrowError> {
    env.storage()
        .persistent()
        .get::<DataKey, Address>(&DataKey::Operator)
        .ok_or(EscrowError::NotInitialized)
}

pub fn set_config(env: &Env, operator: &Address, value_asset: &Address, fee_denominator: u32) {
    let store = env.storage().persistent();
    store.set(&DataKey::Operator, operator);
    store.set(&DataKey::ValueAsset, value_asset);
    store.set(&DataKey::FeeDenominator, &fee_denominator);
}

pub fn get_value_asset(env: &Env) -> Result<Address, EscrowError> {
    env.storage()
        .persistent()
        .get::<DataKey, Address>(&DataKey::ValueAsset)
        .ok_or(EscrowError::NotInitialized)
}

pub fn get_fee_denominator(env: &Env) -> Result<u32, EscrowError> {
    env.storage()
        .persistent()
        .get::<DataKey, u32>(&DataKey::FeeDenominator)
        .ok_or(EscrowError::NotInitialized)
}

// ── Fee treasury ─────────────────────────────────────────────

pub fn get_fee_balance(env: &Env) -> i128 {
    env.storage()
        .persistent()
        .get::<DataKey, i128>(&DataKey::FeeBalance)
        .unwrap_or(0)
}

pub fn set_fee_balance(env: &Env, amount: i128) {
    env.storage().persistent().set(&DataKey::FeeBalance, &amount);
}

// ── Partner registry ─────────────────────────────────────────

pub fn has_partner(env: &Env, token: &Address) -> bool {
    env.storage()
        .persistent()
        .has(&DataKey::Partner(token.clone()))
}

pub fn get_partner(env: &Env, token: &Address) -> Option<Offering> {
    env.storage()
        .persistent()
        .get::<DataKey, Offering>(&DataKey::Partner(token.clone()))
}

/// Load an offering or fail with `UnknownOffering`.
pub fn load_partner(env: &Env, token: &Address) -> Result<Offering, EscrowError> {
    get_partner(env, token).ok_or(EscrowError::UnknownOffering)
}

pub fn set_partner(env: &Env, offering: &Offering) {
    env.storage()
        .persistent()
        .set(&DataKey::Partner(offering.token.clone()), offering);
}

pub fn get_partner_keys(env: &Env) -> Vec<Address> {
    env.storage()
        .persistent()
        .get::<DataKey, Vec<Address>>(&DataKey::PartnerKeys)
        .unwrap_or_else(|| Vec::new(env))
}

pub fn push_partner_key(env: &Env, token: &Address) {
    let mut keys = get_partner_keys(env);
    keys.push_back(token.clone());
    env.storage().persistent().set(&DataKey::PartnerKeys, &keys);
}

/// Drop the offering entry and its key; the remaining keys keep their order.
pub fn remove_partner(env: &Env, token: &Address) {
    env.storage()
        .persistent()
        .remove(&DataKey::Partner(token.clone()));

    let old_keys = get_partner_keys(env);
    let mut keys = Vec::new(env);
    for key in old_keys.iter() {
        if key != *token {
            keys.push_back(key);
        }
    }
    env.storage().persistent().set(&DataKey::PartnerKeys, &keys);
}

pub fn is_finalized(env: &Env, token: &Address) -> bool {
    env.storage()
        .persistent()
        .has(&DataKey::Finalized(token.clone()))
}

pub fn set_finalized(env: &Env, token: &Address) {
    env.storage()
        .persistent()
        .set(&DataKey::Finalized(token.clone()), &true);
}

pub fn clear_finalized(env: &Env, token: &Address) {
    env.storage()
        .persistent()
        .remove(&DataKey::Finalized(token.clone()));
}

// ── Investment ledger ────────────────────────────────────────

pub fn get_investment(env: &Env, token: &Address, investor: &Address) -> i128 {
    env.storage()
        .persistent()
        .get::<DataKey, i128>(&DataKey::Investment(token.clone(), investor.clone()))
        .unwrap_or(0)
}

pub fn set_investment(env: &Env, token: &Address, investor: &Address, amount: i128) {
    env.storage()
        .persistent()
        .set(&DataKey::Investment(token.clone(), investor.clone()), &amount);
}

pub fn get_investors(env: &Env, token: &Address) -> Vec<Address> {
    env.storage()
        .persistent()
        .get::<DataKey, Vec<Address>>(&DataKey::Investors(token.clone()))
        .unwrap_or_else(|| Vec::new(env))
}

/// Append `investor` to the offering's roll unless already present.
pub fn add_investor(env: &Env, token: &Address, investor: &Address) {
    let mut investors = get_investors(env, token);
    if investors.iter().any(|i| i == *investor) {
        return;
    }
    investors.push_back(investor.clone());
    env.storage()
        .persistent()
        .set(&DataKey::Investors(token.clone()), &investors);
}

/// Remove every investment entry and the roll itself for `token`.
pub fn clear_investments(env: &Env, token: &Address) {
    let store = env.storage().persistent();
    for investor in get_investors(env, token).iter() {
        store.remove(&DataKey::Investment(token.clone(), investor));
    }
    store.remove(&DataKey::Investors(token.clone()));
}

// ── Settlement lock ──────────────────────────────────────────

pub fn acquire_lock(env: &Env) -> Result<(), EscrowError> {
    let locked: bool = env
        .storage()
        .instance()
        .get(&DataKey::SettlementLock)
        .unwrap_or(false);
    if locked {
        return Err(EscrowError::SettlementInProgress);
    }
    env.storage().instance().set(&DataKey::SettlementLock, &true);
    Ok(())
}

pub fn release_lock(env: &Env) {
    env.storage().instance().remove(&DataKey::SettlementLock);
}
