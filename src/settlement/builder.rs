//! Debt simplification
//!
//! Turns net balances into pairwise settlements.
//!
//! # Algorithm
//!
//! 1. Split residents into creditors (balance > 0) and debtors (balance < 0)
//! 2. Pair the largest creditor with the largest debtor, lower resident id
//!    first on ties
//! 3. Settle `min(credit, |debt|)` from the debtor to the creditor
//! 4. Drop whoever reached zero and repeat
//!
//! Every step zeroes at least one party, so a roster of `n` residents needs
//! at most `n - 1` settlements. The greedy pairing is optimal for the common
//! one-payer and small-cycle cases but is a heuristic, not a proven minimum.
//!
//! # Example
//!
//! ```text
//! Balances:      A: +60   B: -30   C: -30
//! Settlements:   B pays A 30
//!                C pays A 30
//! ```

use bigdecimal::BigDecimal;

use crate::settlement::balance::{BalanceCalculator, Balances};
use crate::traits::InsertSettlement;
use crate::types::*;

/// Default number of fractional digits for amounts
pub const DEFAULT_CURRENCY_SCALE: u32 = 2;

/// Convert balances into the settlements that zero them
pub fn simplify_debts(
    balances: &Balances,
    reconciliation_id: ReconciliationId,
) -> ReconcileResult<Vec<InsertSettlement>> {
    let zero = BigDecimal::from(0);

    let mut creditors: Vec<(ResidentId, BigDecimal)> = balances
        .iter()
        .filter(|(_, amount)| **amount > zero)
        .map(|(id, amount)| (id, amount.clone()))
        .collect();

    let mut debtors: Vec<(ResidentId, BigDecimal)> = balances
        .iter()
        .filter(|(_, amount)| **amount < zero)
        .map(|(id, amount)| (id, amount.abs()))
        .collect();

    let credits: BigDecimal = creditors.iter().map(|(_, amount)| amount).sum();
    let debits: BigDecimal = debtors.iter().map(|(_, amount)| amount).sum();
    if credits != debits {
        return Err(ReconcileError::UnbalancedInput { credits, debits });
    }

    let mut settlements = Vec::new();

    while let (Some(c), Some(d)) = (largest(&creditors), largest(&debtors)) {
        let transfer = creditors[c].1.clone().min(debtors[d].1.clone());

        settlements.push(InsertSettlement {
            reconciliation_id,
            payer: debtors[d].0,
            payee: creditors[c].0,
            amount: transfer.clone(),
        });

        creditors[c].1 -= &transfer;
        debtors[d].1 -= &transfer;

        if creditors[c].1 == zero {
            creditors.remove(c);
        }
        if debtors[d].1 == zero {
            debtors.remove(d);
        }
    }

    Ok(settlements)
}

/// Index of the party with the largest outstanding amount; lower id wins ties
fn largest(parties: &[(ResidentId, BigDecimal)]) -> Option<usize> {
    parties
        .iter()
        .enumerate()
        .max_by(|(_, (a_id, a_amount)), (_, (b_id, b_amount))| {
            a_amount.cmp(b_amount).then_with(|| b_id.cmp(a_id))
        })
        .map(|(index, _)| index)
}

/// Collects expenses for one reconciliation and builds its settlements
#[derive(Debug, Clone)]
pub struct SettlementBuilder {
    reconciliation_id: ReconciliationId,
    residents: Vec<Resident>,
    expenses: Vec<Expense>,
    currency_scale: u32,
}

impl SettlementBuilder {
    /// Create a builder for a reconciliation over the given roster
    pub fn new(reconciliation_id: ReconciliationId, residents: Vec<Resident>) -> Self {
        Self {
            reconciliation_id,
            residents,
            expenses: Vec::new(),
            currency_scale: DEFAULT_CURRENCY_SCALE,
        }
    }

    /// Use a currency with `scale` fractional digits
    pub fn currency_scale(mut self, scale: u32) -> Self {
        self.currency_scale = scale;
        self
    }

    pub fn add_expense(&mut self, expense: Expense) {
        self.expenses.push(expense);
    }

    pub fn add_expenses<I: IntoIterator<Item = Expense>>(&mut self, expenses: I) {
        self.expenses.extend(expenses);
    }

    /// Expenses collected so far
    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    /// Net balances of the collected expenses
    pub fn balances(&self) -> ReconcileResult<Balances> {
        BalanceCalculator::new(&self.residents, self.currency_scale)?.calculate(&self.expenses)
    }

    /// Settlement commands that zero every resident's balance
    pub fn build(&self) -> ReconcileResult<Vec<InsertSettlement>> {
        let balances = self.balances()?;
        simplify_debts(&balances, self.reconciliation_id)
    }
}
