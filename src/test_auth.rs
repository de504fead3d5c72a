#![cfg(test)]
use soroban_sdk::{
    testutils::{Address as _, Ledger, MockAuth, MockAuthInvoke},
    token, Address, Env, IntoVal, String,
};

use crate::{EscrowError, PartnerEscrow, PartnerEscrowClient};

const FEE_DENOMINATOR: u32 = 5_000;
const DEADLINE: u64 = 500;

struct Fixture {
    env: Env,
    client: PartnerEscrowClient<'static>,
    operator: Address,
    value_asset: Address,
    sale_token: Address,
    wallet: Address,
}

/// Operator, value asset and one funded offering, built with blanket auth mocks.
fn setup() -> Fixture {
    let env = Env::default();
    env.mock_all_auths();
    env.ledger().with_mut(|li| li.timestamp = 100);
    let contract_id = env.register_contract(None, PartnerEscrow);
    let client = PartnerEscrowClient::new(&env, &contract_id);
    let operator = Address::generate(&env);
    let value_asset = env.register_stellar_asset_contract(Address::generate(&env));
    let sale_token = env.register_stellar_asset_contract(Address::generate(&env));
    let wallet = Address::generate(&env);

    client.initialize(&operator, &value_asset, &FEE_DENOMINATOR);
    token::StellarAssetClient::new(&env, &sale_token).mint(&contract_id, &1_000);
    client.add_partner(
        &operator,
        &sale_token,
        &wallet,
        &10,
        &1_000,
        &DEADLINE,
        &String::from_str(&env, "auth"),
    );
    Fixture {
        env,
        client,
        operator,
        value_asset,
        sale_token,
        wallet,
    }
}

impl Fixture {
    fn fund_and_invest(&self, investor: &Address, amount: i128) {
        token::StellarAssetClient::new(&self.env, &self.value_asset).mint(investor, &amount);
        self.client.invest(investor, &self.sale_token, &amount);
    }

    /// Replace the blanket mocks with an empty set so every auth is enforced.
    fn enforce_auth(&self) {
        self.env.mock_auths(&[]);
    }

    fn close(&self) {
        self.env.ledger().with_mut(|li| li.timestamp = DEADLINE);
    }
}

// ── non-operator callers ──────────────────────────────────────

#[test]
fn add_partner_by_stranger_is_unauthorized() {
    let f = setup();
    let attacker = Address::generate(&f.env);
    let other = f.env.register_stellar_asset_contract(Address::generate(&f.env));
    let result = f.client.try_add_partner(
        &attacker,
        &other,
        &attacker,
        &1,
        &0,
        &DEADLINE,
        &String::from_str(&f.env, "x"),
    );
    assert_eq!(result, Err(Ok(EscrowError::Unauthorized)));
    assert_eq!(f.client.get_partners().len(), 1);
}

#[test]
fn delete_partner_by_stranger_is_unauthorized() {
    let f = setup();
    let attacker = Address::generate(&f.env);
    let result = f.client.try_delete_partner(&attacker, &f.sale_token);
    assert_eq!(result, Err(Ok(EscrowError::Unauthorized)));
    assert!(f.client.get_partner(&f.sale_token).is_some());
}

#[test]
fn finish_offering_by_partner_wallet_is_unauthorized() {
    let f = setup();
    let investor = Address::generate(&f.env);
    f.fund_and_invest(&investor, 100);
    f.close();

    let result = f.client.try_finish_offering(&f.wallet, &f.sale_token);
    assert_eq!(result, Err(Ok(EscrowError::Unauthorized)));
    assert_eq!(f.client.get_invested(&f.sale_token, &investor), 100);
}

#[test]
fn withdraw_earned_by_stranger_is_unauthorized() {
    let f = setup();
    f.close();
    let attacker = Address::generate(&f.env);
    let result = f.client.try_withdraw_earned(&attacker, &f.sale_token);
    assert_eq!(result, Err(Ok(EscrowError::Unauthorized)));
    assert!(!f.client.get_partner(&f.sale_token).unwrap().withdrawn);
}

#[test]
fn withdraw_fees_by_stranger_is_unauthorized() {
    let f = setup();
    let investor = Address::generate(&f.env);
    f.fund_and_invest(&investor, 10_000);
    let attacker = Address::generate(&f.env);

    let result = f.client.try_withdraw_fees(&attacker, &attacker);
    assert_eq!(result, Err(Ok(EscrowError::Unauthorized)));
    assert_eq!(f.client.get_fee_balance(), 1);
}

// ── missing authorization ─────────────────────────────────────

#[test]
fn initialize_missing_auth_no_mutation() {
    let env = Env::default();
    let client = PartnerEscrowClient::new(&env, &env.register_contract(None, PartnerEscrow));
    let operator = Address::generate(&env);
    let value_asset = Address::generate(&env);
    assert!(client
        .try_initialize(&operator, &value_asset, &FEE_DENOMINATOR)
        .is_err());
    assert!(client.get_operator().is_none());
}

#[test]
fn initialize_with_operator_signature_succeeds() {
    let env = Env::default();
    let contract_id = env.register_contract(None, PartnerEscrow);
    let client = PartnerEscrowClient::new(&env, &contract_id);
    let operator = Address::generate(&env);
    let value_asset = Address::generate(&env);

    client
        .mock_auths(&[MockAuth {
            address: &operator,
            invoke: &MockAuthInvoke {
                contract: &contract_id,
                fn_name: "initialize",
                args: (&operator, &value_asset, FEE_DENOMINATOR).into_val(&env),
                sub_invokes: &[],
            },
        }])
        .initialize(&operator, &value_asset, &FEE_DENOMINATOR);

    assert_eq!(client.get_operator(), Some(operator));
}

#[test]
fn delete_partner_missing_auth_no_mutation() {
    let f = setup();
    f.enforce_auth();
    assert!(f
        .client
        .try_delete_partner(&f.operator, &f.sale_token)
        .is_err());
    assert_eq!(f.client.get_partners().len(), 1);
}

#[test]
fn finish_offering_missing_auth_no_mutation() {
    let f = setup();
    let investor = Address::generate(&f.env);
    f.fund_and_invest(&investor, 100);
    f.close();
    f.enforce_auth();

    assert!(f
        .client
        .try_finish_offering(&f.operator, &f.sale_token)
        .is_err());
    assert_eq!(f.client.get_invested(&f.sale_token, &investor), 100);
}

#[test]
fn invest_on_behalf_of_another_account_fails() {
    let f = setup();
    let victim = Address::generate(&f.env);
    token::StellarAssetClient::new(&f.env, &f.value_asset).mint(&victim, &100);
    f.enforce_auth();

    assert!(f.client.try_invest(&victim, &f.sale_token, &100).is_err());
    assert_eq!(f.client.get_invested(&f.sale_token, &victim), 0);
    assert_eq!(
        token::Client::new(&f.env, &f.value_asset).balance(&victim),
        100
    );
}

#[test]
fn return_investment_missing_auth_no_mutation() {
    let f = setup();
    let investor = Address::generate(&f.env);
    f.fund_and_invest(&investor, 100);
    f.enforce_auth();

    assert!(f
        .client
        .try_return_investment(&investor, &f.sale_token)
        .is_err());
    assert_eq!(f.client.get_invested(&f.sale_token, &investor), 100);
}

#[test]
fn confirm_investment_missing_auth_no_mutation() {
    let f = setup();
    let investor = Address::generate(&f.env);
    f.fund_and_invest(&investor, 100);
    f.enforce_auth();

    assert!(f
        .client
        .try_confirm_investment(&investor, &f.sale_token)
        .is_err());
    assert_eq!(f.client.get_partner(&f.sale_token).unwrap().tokens_sold, 0);
}

#[test]
#[should_panic]
fn withdraw_fees_without_signature_panics() {
    let f = setup();
    f.enforce_auth();
    f.client.withdraw_fees(&f.operator, &f.operator);
}
