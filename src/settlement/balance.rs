//! Net balance calculation across a batch of expenses

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::*;
use crate::utils::validation::{
    minor_unit, validate_currency_scale, validate_expense_amount, validate_minor_units,
    validate_roster,
};

/// One resident's portion of an expense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
    pub resident: ResidentId,
    pub amount: BigDecimal,
}

/// Signed net position per resident: positive is owed, negative owes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Balances {
    entries: BTreeMap<ResidentId, BigDecimal>,
}

impl Balances {
    /// Start every resident at zero
    pub fn zeroed<'a, I>(residents: I) -> Self
    where
        I: IntoIterator<Item = &'a ResidentId>,
    {
        Self {
            entries: residents
                .into_iter()
                .map(|id| (*id, BigDecimal::from(0)))
                .collect(),
        }
    }

    pub fn get(&self, resident: ResidentId) -> Option<&BigDecimal> {
        self.entries.get(&resident)
    }

    fn entry(&mut self, resident: ResidentId) -> &mut BigDecimal {
        self.entries
            .entry(resident)
            .or_insert_with(|| BigDecimal::from(0))
    }

    fn credit(&mut self, resident: ResidentId, amount: &BigDecimal) {
        *self.entry(resident) += amount;
    }

    fn debit(&mut self, resident: ResidentId, amount: &BigDecimal) {
        *self.entry(resident) -= amount;
    }

    /// Balances in ascending resident id order
    pub fn iter(&self) -> impl Iterator<Item = (ResidentId, &BigDecimal)> {
        self.entries.iter().map(|(id, amount)| (*id, amount))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all balances; zero for any output of [`BalanceCalculator`]
    pub fn total(&self) -> BigDecimal {
        self.entries.values().sum()
    }

    /// Whether every resident is at zero
    pub fn is_settled(&self) -> bool {
        let zero = BigDecimal::from(0);
        self.entries.values().all(|amount| *amount == zero)
    }
}

impl FromIterator<(ResidentId, BigDecimal)> for Balances {
    fn from_iter<I: IntoIterator<Item = (ResidentId, BigDecimal)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Derives each resident's net position from a set of expenses
///
/// Equal splits hand the division remainder out one minor unit at a time in
/// ascending resident id order, so every share sums back to the expense
/// amount exactly and the result is reproducible.
#[derive(Debug, Clone)]
pub struct BalanceCalculator {
    /// Roster ids, ascending
    roster: Vec<ResidentId>,
    scale: i64,
}

impl BalanceCalculator {
    /// Create a calculator for a roster and a currency with `scale`
    /// fractional digits
    pub fn new(residents: &[Resident], scale: u32) -> ReconcileResult<Self> {
        validate_currency_scale(scale)?;
        validate_roster(residents)?;
        let mut roster: Vec<ResidentId> = residents.iter().map(|r| r.id).collect();
        roster.sort_unstable();
        Ok(Self {
            roster,
            scale: i64::from(scale),
        })
    }

    /// Roster ids in ascending order
    pub fn roster(&self) -> &[ResidentId] {
        &self.roster
    }

    fn ensure_member(&self, resident: ResidentId) -> ReconcileResult<()> {
        if self.roster.binary_search(&resident).is_ok() {
            Ok(())
        } else {
            Err(ReconcileError::UnknownResident(resident))
        }
    }

    /// Split one expense into per-resident shares
    pub fn split(&self, expense: &Expense) -> ReconcileResult<Vec<Share>> {
        validate_expense_amount(expense, self.scale)?;
        self.ensure_member(expense.payer)?;

        match &expense.shares {
            Some(overrides) => self.explicit_split(expense, overrides),
            None => Ok(self.equal_split(&expense.amount)),
        }
    }

    fn equal_split(&self, amount: &BigDecimal) -> Vec<Share> {
        let unit = minor_unit(self.scale);
        let count = BigDecimal::from(self.roster.len() as u64);
        let base = (amount / &count).with_scale(self.scale);
        let mut remainder = amount - &(&base * &count);

        self.roster
            .iter()
            .map(|resident| {
                let mut share = base.clone();
                if remainder >= unit {
                    share += &unit;
                    remainder -= &unit;
                }
                Share {
                    resident: *resident,
                    amount: share,
                }
            })
            .collect()
    }

    fn explicit_split(
        &self,
        expense: &Expense,
        overrides: &BTreeMap<ResidentId, BigDecimal>,
    ) -> ReconcileResult<Vec<Share>> {
        let zero = BigDecimal::from(0);
        let mut total = BigDecimal::from(0);

        for (resident, amount) in overrides {
            self.ensure_member(*resident)?;
            if *amount < zero {
                return Err(ReconcileError::InvalidExpense(format!(
                    "Expense {} assigns negative share {} to resident {}",
                    expense.id, amount, resident
                )));
            }
            validate_minor_units(amount, self.scale)?;
            total += amount;
        }

        if total != expense.amount {
            return Err(ReconcileError::InvalidExpense(format!(
                "Shares of expense {} sum to {} but the amount is {}",
                expense.id, total, expense.amount
            )));
        }

        Ok(overrides
            .iter()
            .map(|(resident, amount)| Share {
                resident: *resident,
                amount: amount.clone(),
            })
            .collect())
    }

    /// Net balance of every roster member across `expenses`
    pub fn calculate<'a, I>(&self, expenses: I) -> ReconcileResult<Balances>
    where
        I: IntoIterator<Item = &'a Expense>,
    {
        let mut balances = Balances::zeroed(&self.roster);

        for expense in expenses {
            let shares = self.split(expense)?;
            balances.credit(expense.payer, &expense.amount);
            for share in &shares {
                balances.debit(share.resident, &share.amount);
            }
        }

        Ok(balances)
    }
}
