//! Property-based tests for reconciliation invariants
//!
//! - Conservation: balances from any expense set sum to exactly zero
//! - Exact splits: equal shares always add back up to the expense amount
//! - Cancellation: settlements zero every resident's balance
//! - Shape: no self-settlements, no non-positive amounts, at most n - 1

use bigdecimal::BigDecimal;
use householder_core::{
    simplify_debts, BalanceCalculator, Expense, ExpenseId, ReconciliationId, Resident, ResidentId,
};
use proptest::prelude::*;

/// Strategy for a roster of 1..=8 residents with distinct, unordered ids
fn roster_strategy() -> impl Strategy<Value = Vec<Resident>> {
    prop::collection::btree_set(1i64..1_000, 1..=8)
        .prop_map(|ids| {
            ids.into_iter()
                .rev()
                .map(|id| Resident::new(ResidentId(id), format!("resident-{}", id)))
                .collect::<Vec<_>>()
        })
}

/// Strategy for amounts between 0.01 and 10,000.00
fn amount_strategy() -> impl Strategy<Value = BigDecimal> {
    (1i64..1_000_000).prop_map(|cents| BigDecimal::new(cents.into(), 2))
}

/// Roster plus expenses whose payers are drawn from it
fn household_strategy() -> impl Strategy<Value = (Vec<Resident>, Vec<Expense>)> {
    roster_strategy().prop_flat_map(|roster| {
        let count = roster.len();
        let expenses = prop::collection::vec((0..count, amount_strategy()), 0..20);
        (Just(roster), expenses).prop_map(|(roster, picks)| {
            let expenses: Vec<Expense> = picks
                .into_iter()
                .enumerate()
                .map(|(i, (payer, amount))| {
                    Expense::new(ExpenseId(i as i64 + 1), roster[payer].id, amount, "generated")
                })
                .collect();
            (roster, expenses)
        })
    })
}

proptest! {
    #[test]
    fn balances_always_sum_to_zero((roster, expenses) in household_strategy()) {
        let calculator = BalanceCalculator::new(&roster, 2).unwrap();
        let balances = calculator.calculate(&expenses).unwrap();

        prop_assert_eq!(balances.len(), roster.len());
        prop_assert_eq!(balances.total(), BigDecimal::from(0));
    }

    #[test]
    fn equal_shares_add_up_exactly((roster, expenses) in household_strategy()) {
        let calculator = BalanceCalculator::new(&roster, 2).unwrap();

        for expense in &expenses {
            let shares = calculator.split(expense).unwrap();
            let total: BigDecimal = shares.iter().map(|s| &s.amount).sum();
            prop_assert_eq!(&total, &expense.amount);

            // resident id order, remainder cents on the first residents
            for pair in shares.windows(2) {
                prop_assert!(pair[0].resident < pair[1].resident);
                prop_assert!(pair[0].amount >= pair[1].amount);
            }
        }
    }

    #[test]
    fn settlements_cancel_every_balance((roster, expenses) in household_strategy()) {
        let calculator = BalanceCalculator::new(&roster, 2).unwrap();
        let balances = calculator.calculate(&expenses).unwrap();

        let settlements = simplify_debts(&balances, ReconciliationId(1)).unwrap();

        prop_assert!(settlements.len() < roster.len());
        for settlement in &settlements {
            prop_assert_ne!(settlement.payer, settlement.payee);
            prop_assert!(settlement.amount > BigDecimal::from(0));
        }

        for (resident, balance) in balances.iter() {
            let received: BigDecimal = settlements
                .iter()
                .filter(|s| s.payee == resident)
                .map(|s| &s.amount)
                .sum();
            let paid: BigDecimal = settlements
                .iter()
                .filter(|s| s.payer == resident)
                .map(|s| &s.amount)
                .sum();
            prop_assert_eq!(&(received - paid), balance);
        }
    }

    #[test]
    fn calculation_is_reproducible((roster, expenses) in household_strategy()) {
        let mut sorted = roster.clone();
        sorted.sort_by_key(|r| r.id);

        let first = BalanceCalculator::new(&roster, 2).unwrap().calculate(&expenses).unwrap();
        let second = BalanceCalculator::new(&sorted, 2).unwrap().calculate(&expenses).unwrap();
        prop_assert_eq!(
            simplify_debts(&first, ReconciliationId(1)).unwrap(),
            simplify_debts(&second, ReconciliationId(1)).unwrap()
        );
    }
}
