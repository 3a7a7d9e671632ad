//! Command and query contracts between the reconciliation core and storage

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Record a new reconciliation run
///
/// The record claims its expenses. Executors must refuse it with
/// [`PersistenceError::Conflict`] when another reconciliation already lists
/// any of `expense_ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertReconciliation {
    pub id: ReconciliationId,
    pub created_at: NaiveDateTime,
    pub expense_ids: Vec<ExpenseId>,
    pub resident_ids: Vec<ResidentId>,
}

impl InsertReconciliation {
    pub fn into_reconciliation(self) -> Reconciliation {
        Reconciliation {
            id: self.id,
            created_at: self.created_at,
            expense_ids: self.expense_ids,
            resident_ids: self.resident_ids,
        }
    }
}

/// Record one settlement; the executor assigns its identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertSettlement {
    pub reconciliation_id: ReconciliationId,
    pub payer: ResidentId,
    pub payee: ResidentId,
    pub amount: BigDecimal,
}

impl InsertSettlement {
    /// Attach the identifier assigned by the executor
    pub fn into_settlement(self, id: SettlementId) -> Settlement {
        Settlement {
            id,
            reconciliation_id: self.reconciliation_id,
            payer: self.payer,
            payee: self.payee,
            amount: self.amount,
        }
    }

    /// Whether a persisted settlement records the same obligation
    pub fn matches(&self, settlement: &Settlement) -> bool {
        self.reconciliation_id == settlement.reconciliation_id
            && self.payer == settlement.payer
            && self.payee == settlement.payee
            && self.amount == settlement.amount
    }
}

/// Move an expense from `expected` to `status`. Executors must refuse the
/// update when the stored status differs from `expected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateExpenseStatus {
    pub id: ExpenseId,
    pub expected: ExpenseStatus,
    pub status: ExpenseStatus,
}

/// Mutations understood by a [`CommandExecutor`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    InsertResident(Resident),
    InsertExpense(Expense),
    InsertReconciliation(InsertReconciliation),
    InsertSettlement(InsertSettlement),
    UpdateExpenseStatus(UpdateExpenseStatus),
}

impl Command {
    /// Short name used in logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Command::InsertResident(_) => "insert_resident",
            Command::InsertExpense(_) => "insert_expense",
            Command::InsertReconciliation(_) => "insert_reconciliation",
            Command::InsertSettlement(_) => "insert_settlement",
            Command::UpdateExpenseStatus(_) => "update_expense_status",
        }
    }
}

/// What a command did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    ResidentInserted(ResidentId),
    ExpenseInserted(ExpenseId),
    ReconciliationInserted(ReconciliationId),
    SettlementInserted(SettlementId),
    ExpenseStatusUpdated(ExpenseId),
}

/// Ordered group of commands submitted together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandBatch {
    commands: Vec<Command>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command; commands are applied in push order
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }
}

impl Extend<Command> for CommandBatch {
    fn extend<I: IntoIterator<Item = Command>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

impl FromIterator<Command> for CommandBatch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for CommandBatch {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

/// Read-only requests understood by a [`QueryExecutor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Query {
    /// Expenses, optionally restricted to one status
    GetExpenses { status: Option<ExpenseStatus> },
    GetResidents,
    /// Same roster as `GetResidents`, addressed as application users
    GetAllUsers,
    GetSettlementsByReconciliationId(ReconciliationId),
    GetReconciliations,
    GetReconciliationById(ReconciliationId),
}

/// Tagged result of a [`Query`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryResult {
    Expenses(Vec<Expense>),
    Residents(Vec<Resident>),
    Settlements(Vec<Settlement>),
    Reconciliations(Vec<Reconciliation>),
    Reconciliation(Option<Reconciliation>),
}

impl QueryResult {
    fn kind(&self) -> &'static str {
        match self {
            QueryResult::Expenses(_) => "expenses",
            QueryResult::Residents(_) => "residents",
            QueryResult::Settlements(_) => "settlements",
            QueryResult::Reconciliations(_) => "reconciliations",
            QueryResult::Reconciliation(_) => "reconciliation",
        }
    }

    fn mismatch(self, expected: &str) -> PersistenceError {
        PersistenceError::UnexpectedResult(format!(
            "expected {} but executor returned {}",
            expected,
            self.kind()
        ))
    }

    pub fn into_expenses(self) -> PersistenceResult<Vec<Expense>> {
        match self {
            QueryResult::Expenses(expenses) => Ok(expenses),
            other => Err(other.mismatch("expenses")),
        }
    }

    pub fn into_residents(self) -> PersistenceResult<Vec<Resident>> {
        match self {
            QueryResult::Residents(residents) => Ok(residents),
            other => Err(other.mismatch("residents")),
        }
    }

    pub fn into_settlements(self) -> PersistenceResult<Vec<Settlement>> {
        match self {
            QueryResult::Settlements(settlements) => Ok(settlements),
            other => Err(other.mismatch("settlements")),
        }
    }

    pub fn into_reconciliations(self) -> PersistenceResult<Vec<Reconciliation>> {
        match self {
            QueryResult::Reconciliations(reconciliations) => Ok(reconciliations),
            other => Err(other.mismatch("reconciliations")),
        }
    }

    pub fn into_reconciliation(self) -> PersistenceResult<Option<Reconciliation>> {
        match self {
            QueryResult::Reconciliation(reconciliation) => Ok(reconciliation),
            other => Err(other.mismatch("reconciliation")),
        }
    }
}

/// Write side of the storage boundary
///
/// Implementations persist one entity or status change per command. Commands
/// submitted through [`CommandExecutor::execute_batch`] must be applied in
/// order; executors that can apply a whole batch as one transaction should
/// override both `execute_batch` and `supports_atomic_batch`.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Apply a single command
    async fn execute(&self, command: Command) -> PersistenceResult<CommandOutcome>;

    /// Whether `execute_batch` is all-or-nothing
    fn supports_atomic_batch(&self) -> bool {
        false
    }

    /// Apply commands in order, stopping at the first failure
    async fn execute_batch(&self, batch: CommandBatch) -> PersistenceResult<Vec<CommandOutcome>> {
        let mut outcomes = Vec::with_capacity(batch.len());
        for command in batch {
            outcomes.push(self.execute(command).await?);
        }
        Ok(outcomes)
    }
}

/// Read side of the storage boundary
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a read-only query
    async fn execute(&self, query: Query) -> PersistenceResult<QueryResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_result_mismatch_is_reported() {
        let result = QueryResult::Residents(vec![]);
        let err = result.into_expenses().unwrap_err();
        assert!(matches!(err, PersistenceError::UnexpectedResult(_)));
    }

    #[test]
    fn test_batch_preserves_push_order() {
        let mut batch = CommandBatch::new();
        batch.push(Command::InsertResident(Resident::new(ResidentId(1), "Ann")));
        batch.push(Command::UpdateExpenseStatus(UpdateExpenseStatus {
            id: ExpenseId(4),
            expected: ExpenseStatus::Unsettled,
            status: ExpenseStatus::InProgress,
        }));

        let kinds: Vec<&str> = batch.iter().map(Command::kind).collect();
        assert_eq!(kinds, vec!["insert_resident", "update_expense_status"]);
    }
}
