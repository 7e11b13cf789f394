//! Amount arithmetic in smallest currency units

use super::{PartyTransactionType, Swap, SwapParty};
use crate::currency::Currencies;
use crate::error::WatchtowerResult;

use rust_decimal::Decimal;

/// Scale by the digits multiplier and floor to whole units
pub fn round_amount(value: Decimal, digits_multiplier: Decimal) -> Decimal {
    (value * digits_multiplier).floor()
}

/// Amount the party must lock, net of the counterparty's redeem reward
pub fn required_amount(
    swap: &Swap,
    role: SwapParty,
    currencies: &Currencies,
) -> WatchtowerResult<Decimal> {
    let sold = swap.sold_currency(role);
    let currency = currencies.get(sold)?;
    let is_base = swap.base_currency() == sold;

    let side_amount = if is_base {
        swap.qty
    } else {
        swap.qty * swap.price
    };

    let required = round_amount(side_amount, currency.digits_multiplier);
    let reward = swap.counter_party(role).reward_for_redeem() * currency.digits_multiplier;

    Ok(required - reward)
}

pub fn is_required_amount_locked(
    swap: &Swap,
    role: SwapParty,
    locked: Decimal,
    currencies: &Currencies,
) -> WatchtowerResult<bool> {
    Ok(locked >= required_amount(swap, role, currencies)?)
}

/// Sum of persisted, confirmed lock and additional lock amounts
pub fn confirmed_locked_amount(swap: &Swap, role: SwapParty) -> Decimal {
    swap.party(role)
        .transactions_of(&PartyTransactionType::LOCKS)
        .filter(|t| t.transaction.is_confirmed())
        .map(|t| t.amount())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::fixtures::currencies;
    use crate::swap::fixtures;
    use crate::swap::{PartyTransaction, Side, Transaction, TransactionStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn lock(id: i64, amount: &str, status: TransactionStatus) -> PartyTransaction {
        PartyTransaction {
            id,
            party_id: 2,
            transaction_id: id,
            transaction: Transaction {
                id,
                currency: "BTC".into(),
                tx_id: format!("tx{}", id),
                block_height: 100,
                confirmations: 1,
                status,
            },
            kind: if id == 1 {
                PartyTransactionType::Lock
            } else {
                PartyTransactionType::AdditionalLock
            },
            amount: amount.into(),
        }
    }

    #[test]
    fn test_round_amount_floors() {
        assert_eq!(round_amount(dec!(1.234567891), dec!(100000000)), dec!(123456789));
        assert_eq!(round_amount(dec!(0.000000009), dec!(100000000)), dec!(0));
    }

    #[test]
    fn test_required_amount_with_reward() {
        let mut swap = fixtures::swap(Utc::now());
        swap.symbol = "LTC/BTC".into();
        swap.qty = dec!(1.23456789);
        swap.price = dec!(2.0);
        swap.acceptor.side = Side::Buy;
        swap.initiator
            .requisites
            .as_mut()
            .unwrap()
            .reward_for_redeem = dec!(0.001);

        // acceptor buys LTC, sells qty * price BTC
        let required = required_amount(&swap, SwapParty::Acceptor, &currencies()).unwrap();
        assert_eq!(required, dec!(246913578) - dec!(100000));
    }

    #[test]
    fn test_partial_locks_sum_to_required() {
        let mut swap = fixtures::swap(Utc::now());
        swap.symbol = "LTC/BTC".into();
        swap.qty = dec!(1.23456789);
        swap.price = dec!(2.0);
        swap.initiator
            .requisites
            .as_mut()
            .unwrap()
            .reward_for_redeem = dec!(0.001);

        let currencies = currencies();
        let required = required_amount(&swap, SwapParty::Acceptor, &currencies).unwrap();

        swap.acceptor.transactions = vec![lock(1, "146813578", TransactionStatus::Confirmed)];
        let first = confirmed_locked_amount(&swap, SwapParty::Acceptor);
        assert!(first < required);

        swap.acceptor
            .transactions
            .push(lock(2, "100000000", TransactionStatus::Confirmed));
        swap.acceptor
            .transactions
            .push(lock(3, "500", TransactionStatus::Pending));

        let total = confirmed_locked_amount(&swap, SwapParty::Acceptor);
        assert_eq!(total, required);
        assert!(is_required_amount_locked(&swap, SwapParty::Acceptor, total, &currencies).unwrap());
    }

    #[test]
    fn test_unknown_sold_currency() {
        let mut swap = fixtures::swap(Utc::now());
        swap.symbol = "DOGE/BTC".into();
        assert!(required_amount(&swap, SwapParty::Initiator, &currencies()).is_err());
    }
}
