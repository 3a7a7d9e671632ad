//! Core types and data structures for household expense reconciliation

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw numeric value of the identifier
            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identifier of a household resident. Ordering is used as the
    /// deterministic tie-break everywhere in the engine.
    ResidentId
);
id_type!(
    /// Identifier of an expense
    ExpenseId
);
id_type!(
    /// Identifier of a reconciliation run, supplied by the caller
    ReconciliationId
);
id_type!(
    /// Identifier of a settlement, assigned by the command executor
    SettlementId
);

/// Lifecycle of an expense with respect to reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpenseStatus {
    /// Recorded but not yet part of any reconciliation
    Unsettled,
    /// Consumed by a reconciliation whose settlements are outstanding
    InProgress,
    /// All settlements covering the expense have been paid
    Settled,
}

impl fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExpenseStatus::Unsettled => "unsettled",
            ExpenseStatus::InProgress => "in_progress",
            ExpenseStatus::Settled => "settled",
        };
        f.write_str(name)
    }
}

/// A member of the household roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resident {
    pub id: ResidentId,
    /// Human-readable name
    pub name: String,
}

impl Resident {
    /// Create a new resident
    pub fn new(id: ResidentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// An expense paid by one resident on behalf of the household
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    /// Unique identifier for the expense
    pub id: ExpenseId,
    /// Amount paid, in major currency units
    pub amount: BigDecimal,
    /// Resident who paid
    pub payer: ResidentId,
    /// Where the expense is in the reconciliation lifecycle
    pub status: ExpenseStatus,
    /// What the money was spent on
    pub description: String,
    /// Date the expense was incurred
    pub incurred_on: NaiveDate,
    /// Explicit share per resident. When absent the amount is split
    /// equally across the whole roster.
    pub shares: Option<BTreeMap<ResidentId, BigDecimal>>,
}

impl Expense {
    /// Create a new unsettled expense split equally across the roster
    pub fn new(
        id: ExpenseId,
        payer: ResidentId,
        amount: BigDecimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            amount,
            payer,
            status: ExpenseStatus::Unsettled,
            description: description.into(),
            incurred_on: chrono::Utc::now().date_naive(),
            shares: None,
        }
    }

    /// Override the equal split with explicit per-resident shares
    pub fn with_shares(mut self, shares: BTreeMap<ResidentId, BigDecimal>) -> Self {
        self.shares = Some(shares);
        self
    }

    /// Set the date the expense was incurred
    pub fn on(mut self, incurred_on: NaiveDate) -> Self {
        self.incurred_on = incurred_on;
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: ExpenseStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_unsettled(&self) -> bool {
        self.status == ExpenseStatus::Unsettled
    }
}

/// A persisted reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub id: ReconciliationId,
    /// When the run was requested
    pub created_at: NaiveDateTime,
    /// Expenses consumed by this run, in ascending id order
    pub expense_ids: Vec<ExpenseId>,
    /// Roster the settlements were computed against, in ascending id order
    pub resident_ids: Vec<ResidentId>,
}

/// A directed obligation produced by a reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    /// Reconciliation that produced this settlement
    pub reconciliation_id: ReconciliationId,
    /// Resident who owes
    pub payer: ResidentId,
    /// Resident who is owed
    pub payee: ResidentId,
    /// Always positive
    pub amount: BigDecimal,
}

/// A reconciliation together with the settlements it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationView {
    pub reconciliation: Reconciliation,
    pub settlements: Vec<Settlement>,
}

impl ReconciliationView {
    /// Total amount moved by the settlements of this reconciliation
    pub fn total_settled(&self) -> BigDecimal {
        self.settlements.iter().map(|s| &s.amount).sum()
    }
}

/// Errors raised by the command and query executors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unexpected result: {0}")]
    UnexpectedResult(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while reconciling
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Invalid roster: {0}")]
    InvalidRoster(String),
    #[error("Unknown resident: {0}")]
    UnknownResident(ResidentId),
    #[error("Unbalanced input: credits = {credits}, debits = {debits}")]
    UnbalancedInput {
        credits: BigDecimal,
        debits: BigDecimal,
    },
    #[error("Invalid expense: {0}")]
    InvalidExpense(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Reconciliation {id} cannot be resumed: {reason}")]
    Inconsistent {
        id: ReconciliationId,
        reason: String,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl ReconcileError {
    /// Whether re-running the workflow for the same request may succeed.
    /// Only persistence failures qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Persistence(_))
    }
}

/// Result type for executor operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Result type for reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_expense_is_unsettled_and_equally_split() {
        let expense = Expense::new(ExpenseId(1), ResidentId(2), BigDecimal::from(90), "Groceries");
        assert_eq!(expense.status, ExpenseStatus::Unsettled);
        assert_eq!(expense.payer, ResidentId(2));
        assert!(expense.shares.is_none());
        assert!(expense.is_unsettled());
    }

    #[test]
    fn test_only_persistence_errors_are_retryable() {
        assert!(ReconcileError::from(PersistenceError::Unavailable("down".into())).is_retryable());
        assert!(!ReconcileError::UnknownResident(ResidentId(9)).is_retryable());
        assert!(!ReconcileError::InvalidRoster("empty".into()).is_retryable());
        assert!(!ReconcileError::Inconsistent {
            id: ReconciliationId(1),
            reason: "roster changed".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ResidentId(7)).unwrap();
        assert_eq!(json, "7");
    }
}
