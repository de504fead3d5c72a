#![cfg(test)]
//! Randomized operation sequences against a single offering, checking the
//! escrow accounting after every step.

extern crate std;

use arbitrary::{Arbitrary, Unstructured};
use soroban_sdk::{
    testutils::{Address as _, Ledger},
    token, Address, Env, String, Vec,
};

use crate::{PartnerEscrow, PartnerEscrowClient};

const RATE: i128 = 10;
const APPROVED: i128 = 1_000;
const START: u64 = 1_000;
const DEADLINE: u64 = START + 100;
const INVESTORS: u32 = 4;
const STEPS: usize = 64;

#[derive(Arbitrary, Debug)]
enum Op {
    Invest { investor: u8, amount: u16 },
    Return { investor: u8 },
    Confirm { investor: u8 },
    Advance { seconds: u8 },
    Withdraw,
    Finish,
}

struct World {
    env: Env,
    client: PartnerEscrowClient<'static>,
    contract_id: Address,
    operator: Address,
    value_asset: Address,
    sale_token: Address,
    investors: Vec<Address>,
}

fn world() -> World {
    let env = Env::default();
    env.mock_all_auths();
    env.ledger().with_mut(|li| li.timestamp = START);
    let contract_id = env.register_contract(None, PartnerEscrow);
    let client = PartnerEscrowClient::new(&env, &contract_id);
    let operator = Address::generate(&env);
    let value_asset = env.register_stellar_asset_contract(Address::generate(&env));
    let sale_token = env.register_stellar_asset_contract(Address::generate(&env));
    let wallet = Address::generate(&env);

    client.initialize(&operator, &value_asset, &5_000);
    token::StellarAssetClient::new(&env, &sale_token).mint(&contract_id, &APPROVED);
    client.add_partner(
        &operator,
        &sale_token,
        &wallet,
        &RATE,
        &APPROVED,
        &DEADLINE,
        &String::from_str(&env, "fuzz"),
    );

    let mut investors = Vec::new(&env);
    for _ in 0..INVESTORS {
        investors.push_back(Address::generate(&env));
    }
    World {
        env,
        client,
        contract_id,
        operator,
        value_asset,
        sale_token,
        investors,
    }
}

impl World {
    fn investor(&self, index: u8) -> Address {
        self.investors.get(index as u32 % INVESTORS).unwrap()
    }

    fn apply(&self, op: &Op) {
        match *op {
            Op::Invest { investor, amount } => {
                let investor = self.investor(investor);
                let value = amount as i128 % 3_000 + 1;
                token::StellarAssetClient::new(&self.env, &self.value_asset)
                    .mint(&investor, &value);
                let _ = self.client.try_invest(&investor, &self.sale_token, &value);
            }
            Op::Return { investor } => {
                let investor = self.investor(investor);
                let _ = self.client.try_return_investment(&investor, &self.sale_token);
            }
            Op::Confirm { investor } => {
                let investor = self.investor(investor);
                let _ = self.client.try_confirm_investment(&investor, &self.sale_token);
            }
            Op::Advance { seconds } => {
                self.env
                    .ledger()
                    .with_mut(|li| li.timestamp += seconds as u64);
            }
            Op::Withdraw => {
                let _ = self.client.try_withdraw_earned(&self.operator, &self.sale_token);
            }
            Op::Finish => {
                let _ = self.client.try_finish_offering(&self.operator, &self.sale_token);
            }
        }
    }

    fn check(&self) {
        let sale = token::Client::new(&self.env, &self.sale_token);
        let value = token::Client::new(&self.env, &self.value_asset);
        let held_tokens = sale.balance(&self.contract_id);
        let held_value = value.balance(&self.contract_id);
        let fees = self.client.get_fee_balance();

        let Some(offering) = self.client.get_partner(&self.sale_token) else {
            // Finished: every token and all principal have left escrow.
            assert_eq!(held_tokens, 0);
            assert_eq!(held_value, fees);
            return;
        };

        let mut positions = 0i128;
        let mut owed = 0i128;
        for investor in self.client.get_investors(&self.sale_token).iter() {
            let position = self.client.get_invested(&self.sale_token, &investor);
            assert!(position >= 0);
            positions += position;
            owed += position / offering.rate;
        }

        assert_eq!(offering.invested_amount, positions);
        assert_eq!(offering.tokens_reserved, owed);
        assert!(offering.tokens_sold + offering.tokens_reserved <= offering.approved_amount);

        if offering.withdrawn {
            assert_eq!(held_tokens, offering.tokens_reserved);
            assert_eq!(held_value, fees);
        } else {
            assert_eq!(held_tokens, offering.approved_amount - offering.tokens_sold);
            assert_eq!(held_value, fees + offering.invested_amount);
        }
    }
}

/// Deterministic byte stream (xorshift64) to drive `Unstructured`.
fn entropy(seed: u64) -> [u8; 1_024] {
    let mut state = seed;
    let mut bytes = [0u8; 1_024];
    for chunk in bytes.chunks_mut(8) {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        chunk.copy_from_slice(&state.to_le_bytes());
    }
    bytes
}

fn run(seed: u64) {
    let w = world();
    let bytes = entropy(seed);
    let mut u = Unstructured::new(&bytes);
    w.check();
    for _ in 0..STEPS {
        let Ok(op) = Op::arbitrary(&mut u) else {
            break;
        };
        w.apply(&op);
        w.check();
    }

    // Drain whatever is left through the operator path.
    w.env.ledger().with_mut(|li| li.timestamp = DEADLINE);
    let _ = w.client.try_finish_offering(&w.operator, &w.sale_token);
    w.check();
    assert!(w.client.get_partner(&w.sale_token).is_none());
}

#[test]
fn accounting_holds_across_random_sequences() {
    for seed in [
        0x9E37_79B9_7F4A_7C15u64,
        0xD1B5_4A32_D192_ED03,
        0x2545_F491_4F6C_DD1D,
        0xA076_1D64_78BD_642F,
        0xE703_7ED1_A0B4_28DB,
        0x8EBC_6AF0_9C88_C6E3,
    ] {
        run(seed);
    }
}

#[test]
fn accounting_holds_when_deadline_passes_early() {
    let w = world();
    let bytes = entropy(0x5851_F42D_4C95_7F2D);
    let mut u = Unstructured::new(&bytes);
    for step in 0..STEPS {
        if step == STEPS / 4 {
            w.env.ledger().with_mut(|li| li.timestamp = DEADLINE);
            let _ = w.client.try_withdraw_earned(&w.operator, &w.sale_token);
            w.check();
        }
        let Ok(op) = Op::arbitrary(&mut u) else {
            break;
        };
        w.apply(&op);
        w.check();
    }
}
