//! Validation utilities

use bigdecimal::BigDecimal;
use std::collections::HashSet;

use crate::types::*;

/// Largest number of fractional digits a currency may use
pub const MAX_CURRENCY_SCALE: u32 = 18;

/// Validate that a currency scale is within [`MAX_CURRENCY_SCALE`]
pub fn validate_currency_scale(scale: u32) -> ReconcileResult<()> {
    if scale > MAX_CURRENCY_SCALE {
        return Err(ReconcileError::Config(format!(
            "currency_scale {} exceeds maximum {}",
            scale, MAX_CURRENCY_SCALE
        )));
    }
    Ok(())
}

/// Smallest representable amount at the given scale (0.01 for scale 2)
pub fn minor_unit(scale: i64) -> BigDecimal {
    BigDecimal::new(1.into(), scale)
}

/// Validate that an amount is positive
pub fn validate_positive_amount(amount: &BigDecimal) -> ReconcileResult<()> {
    if *amount <= BigDecimal::from(0) {
        Err(ReconcileError::InvalidExpense(format!(
            "Amount must be positive, got {}",
            amount
        )))
    } else {
        Ok(())
    }
}

/// Validate that an amount has no digits below the currency's minor unit
pub fn validate_minor_units(amount: &BigDecimal, scale: i64) -> ReconcileResult<()> {
    if amount.with_scale(scale) != *amount {
        return Err(ReconcileError::InvalidExpense(format!(
            "Amount {} is finer than the minor unit {}",
            amount,
            minor_unit(scale)
        )));
    }
    Ok(())
}

/// Validate that a resident name is usable
pub fn validate_resident_name(name: &str) -> ReconcileResult<()> {
    if name.trim().is_empty() {
        return Err(ReconcileError::InvalidRoster(
            "Resident name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(ReconcileError::InvalidRoster(
            "Resident name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate a roster: non-empty, no duplicate ids
pub fn validate_roster(residents: &[Resident]) -> ReconcileResult<()> {
    if residents.is_empty() {
        return Err(ReconcileError::InvalidRoster(
            "Roster must contain at least one resident".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for resident in residents {
        if !seen.insert(resident.id) {
            return Err(ReconcileError::InvalidRoster(format!(
                "Resident {} appears more than once",
                resident.id
            )));
        }
    }

    Ok(())
}

/// Validate an expense's amount against the currency scale
pub fn validate_expense_amount(expense: &Expense, scale: i64) -> ReconcileResult<()> {
    validate_positive_amount(&expense.amount).map_err(|_| {
        ReconcileError::InvalidExpense(format!(
            "Expense {} has non-positive amount {}",
            expense.id, expense.amount
        ))
    })?;
    validate_minor_units(&expense.amount, scale)
}

/// Validate that a description is storable
pub fn validate_description(description: &str) -> ReconcileResult<()> {
    if description.len() > 500 {
        return Err(ReconcileError::InvalidExpense(
            "Expense description cannot exceed 500 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_minor_unit() {
        assert_eq!(minor_unit(2), BigDecimal::from_str("0.01").unwrap());
        assert_eq!(minor_unit(0), BigDecimal::from(1));
    }

    #[test]
    fn test_minor_units_rejects_sub_cent_amounts() {
        let ok = BigDecimal::from_str("10.50").unwrap();
        let too_fine = BigDecimal::from_str("10.505").unwrap();
        assert!(validate_minor_units(&ok, 2).is_ok());
        assert!(validate_minor_units(&too_fine, 2).is_err());
    }

    #[test]
    fn test_roster_rejects_empty_and_duplicates() {
        assert!(matches!(
            validate_roster(&[]),
            Err(ReconcileError::InvalidRoster(_))
        ));

        let roster = vec![
            Resident::new(ResidentId(1), "Ann"),
            Resident::new(ResidentId(1), "Ann again"),
        ];
        assert!(matches!(
            validate_roster(&roster),
            Err(ReconcileError::InvalidRoster(_))
        ));
    }

    #[test]
    fn test_positive_amount() {
        assert!(validate_positive_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_positive_amount(&BigDecimal::from(-5)).is_err());
        assert!(validate_positive_amount(&BigDecimal::from(5)).is_ok());
    }
}
