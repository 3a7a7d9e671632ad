//! In-memory command and query executor for testing and development

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{
    validate_description, validate_positive_amount, validate_resident_name,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    residents: BTreeMap<ResidentId, Resident>,
    expenses: BTreeMap<ExpenseId, Expense>,
    reconciliations: BTreeMap<ReconciliationId, Reconciliation>,
    settlements: BTreeMap<SettlementId, Settlement>,
    last_settlement_id: i64,
}

impl StoreState {
    fn apply(&mut self, command: Command) -> PersistenceResult<CommandOutcome> {
        match command {
            Command::InsertResident(resident) => {
                validate_resident_name(&resident.name)
                    .map_err(|e| PersistenceError::Storage(e.to_string()))?;
                if self.residents.contains_key(&resident.id) {
                    return Err(PersistenceError::Conflict(format!(
                        "resident {} already exists",
                        resident.id
                    )));
                }
                let id = resident.id;
                self.residents.insert(id, resident);
                Ok(CommandOutcome::ResidentInserted(id))
            }
            Command::InsertExpense(expense) => {
                validate_positive_amount(&expense.amount)
                    .and_then(|_| validate_description(&expense.description))
                    .map_err(|e| PersistenceError::Storage(e.to_string()))?;
                if self.expenses.contains_key(&expense.id) {
                    return Err(PersistenceError::Conflict(format!(
                        "expense {} already exists",
                        expense.id
                    )));
                }
                let id = expense.id;
                self.expenses.insert(id, expense);
                Ok(CommandOutcome::ExpenseInserted(id))
            }
            Command::InsertReconciliation(insert) => {
                if self.reconciliations.contains_key(&insert.id) {
                    return Err(PersistenceError::Conflict(format!(
                        "reconciliation {} already exists",
                        insert.id
                    )));
                }
                if let Some((other, expense_id)) = self.claimant(&insert.expense_ids) {
                    return Err(PersistenceError::Conflict(format!(
                        "expense {} already belongs to reconciliation {}",
                        expense_id, other
                    )));
                }
                let id = insert.id;
                self.reconciliations.insert(id, insert.into_reconciliation());
                Ok(CommandOutcome::ReconciliationInserted(id))
            }
            Command::InsertSettlement(insert) => {
                if !self.reconciliations.contains_key(&insert.reconciliation_id) {
                    return Err(PersistenceError::NotFound(format!(
                        "reconciliation {}",
                        insert.reconciliation_id
                    )));
                }
                if insert.payer == insert.payee {
                    return Err(PersistenceError::Storage(format!(
                        "settlement payer and payee are both resident {}",
                        insert.payer
                    )));
                }
                validate_positive_amount(&insert.amount)
                    .map_err(|e| PersistenceError::Storage(e.to_string()))?;

                self.last_settlement_id += 1;
                let id = SettlementId(self.last_settlement_id);
                self.settlements.insert(id, insert.into_settlement(id));
                Ok(CommandOutcome::SettlementInserted(id))
            }
            Command::UpdateExpenseStatus(update) => {
                let expense = self
                    .expenses
                    .get_mut(&update.id)
                    .ok_or_else(|| PersistenceError::NotFound(format!("expense {}", update.id)))?;
                if expense.status != update.expected {
                    return Err(PersistenceError::Conflict(format!(
                        "expense {} is {}, expected {}",
                        update.id, expense.status, update.expected
                    )));
                }
                expense.status = update.status;
                Ok(CommandOutcome::ExpenseStatusUpdated(update.id))
            }
        }
    }

    /// First recorded reconciliation listing any of `expense_ids`
    fn claimant(&self, expense_ids: &[ExpenseId]) -> Option<(ReconciliationId, ExpenseId)> {
        self.reconciliations.values().find_map(|reconciliation| {
            expense_ids
                .iter()
                .find(|id| reconciliation.expense_ids.contains(*id))
                .map(|id| (reconciliation.id, *id))
        })
    }

    fn answer(&self, query: Query) -> QueryResult {
        match query {
            Query::GetExpenses { status } => QueryResult::Expenses(
                self.expenses
                    .values()
                    .filter(|expense| status.is_none_or(|s| expense.status == s))
                    .cloned()
                    .collect(),
            ),
            Query::GetResidents | Query::GetAllUsers => {
                QueryResult::Residents(self.residents.values().cloned().collect())
            }
            Query::GetSettlementsByReconciliationId(reconciliation_id) => QueryResult::Settlements(
                self.settlements
                    .values()
                    .filter(|settlement| settlement.reconciliation_id == reconciliation_id)
                    .cloned()
                    .collect(),
            ),
            Query::GetReconciliations => {
                QueryResult::Reconciliations(self.reconciliations.values().cloned().collect())
            }
            Query::GetReconciliationById(id) => {
                QueryResult::Reconciliation(self.reconciliations.get(&id).cloned())
            }
        }
    }
}

/// Injected failure: the command at `countdown` (zero-based, counted from
/// when it was armed) fails with [`PersistenceError::Unavailable`]
#[derive(Debug, Default)]
struct FaultPlan {
    countdown: Option<usize>,
}

impl FaultPlan {
    fn check(&mut self, command: &Command) -> PersistenceResult<()> {
        match self.countdown {
            Some(0) => {
                self.countdown = None;
                Err(PersistenceError::Unavailable(format!(
                    "injected failure on {}",
                    command.kind()
                )))
            }
            Some(n) => {
                self.countdown = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// In-memory storage implementing both executor contracts
///
/// Batches are applied atomically by default: every command runs against a
/// copy of the state, which replaces the live state only if all of them
/// succeed.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    faults: Arc<Mutex<FaultPlan>>,
    atomic_batches: bool,
}

impl MemoryStore {
    /// Create a new memory store instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            faults: Arc::new(Mutex::new(FaultPlan::default())),
            atomic_batches: true,
        }
    }

    /// Apply batches one command at a time, like an executor without
    /// transactions
    pub fn without_atomic_batches(mut self) -> Self {
        self.atomic_batches = false;
        self
    }

    /// Fail the command that comes `after` commands from now, once
    pub fn fail_after(&self, after: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.countdown = Some(after);
        }
    }

    /// Add a resident to the roster
    pub fn add_resident(&self, resident: Resident) -> PersistenceResult<()> {
        self.write()?.apply(Command::InsertResident(resident))?;
        Ok(())
    }

    /// Record an expense
    pub fn add_expense(&self, expense: Expense) -> PersistenceResult<()> {
        self.write()?.apply(Command::InsertExpense(expense))?;
        Ok(())
    }

    /// Snapshot of one expense
    pub fn expense(&self, id: ExpenseId) -> Option<Expense> {
        self.state.read().ok()?.expenses.get(&id).cloned()
    }

    /// Snapshot of all expenses with the given status
    pub fn expenses_with_status(&self, status: ExpenseStatus) -> Vec<Expense> {
        self.read()
            .map(|state| {
                state
                    .expenses
                    .values()
                    .filter(|e| e.status == status)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every settlement
    pub fn settlements(&self) -> Vec<Settlement> {
        self.read()
            .map(|state| state.settlements.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every reconciliation
    pub fn reconciliations(&self) -> Vec<Reconciliation> {
        self.read()
            .map(|state| state.reconciliations.values().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> PersistenceResult<std::sync::RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| PersistenceError::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> PersistenceResult<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| PersistenceError::Storage("store lock poisoned".to_string()))
    }

    fn check_fault(&self, command: &Command) -> PersistenceResult<()> {
        self.faults
            .lock()
            .map_err(|_| PersistenceError::Storage("fault plan lock poisoned".to_string()))?
            .check(command)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for MemoryStore {
    async fn execute(&self, command: Command) -> PersistenceResult<CommandOutcome> {
        self.check_fault(&command)?;
        self.write()?.apply(command)
    }

    fn supports_atomic_batch(&self) -> bool {
        self.atomic_batches
    }

    async fn execute_batch(&self, batch: CommandBatch) -> PersistenceResult<Vec<CommandOutcome>> {
        if !self.atomic_batches {
            let mut outcomes = Vec::with_capacity(batch.len());
            for command in batch {
                outcomes.push(CommandExecutor::execute(self, command).await?);
            }
            return Ok(outcomes);
        }

        let mut state = self.write()?;
        let mut staged = state.clone();
        let mut outcomes = Vec::with_capacity(batch.len());
        for command in batch {
            self.check_fault(&command)?;
            outcomes.push(staged.apply(command)?);
        }
        *state = staged;
        Ok(outcomes)
    }
}

#[async_trait]
impl QueryExecutor for MemoryStore {
    async fn execute(&self, query: Query) -> PersistenceResult<QueryResult> {
        Ok(self.read()?.answer(query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn unsettled_to_in_progress(id: i64) -> Command {
        Command::UpdateExpenseStatus(UpdateExpenseStatus {
            id: ExpenseId(id),
            expected: ExpenseStatus::Unsettled,
            status: ExpenseStatus::InProgress,
        })
    }

    fn record(id: i64, expense_ids: &[i64]) -> Command {
        Command::InsertReconciliation(InsertReconciliation {
            id: ReconciliationId(id),
            created_at: Utc::now().naive_utc(),
            expense_ids: expense_ids.iter().copied().map(ExpenseId).collect(),
            resident_ids: vec![ResidentId(1), ResidentId(2)],
        })
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_resident(Resident::new(ResidentId(1), "Ann")).unwrap();
        store.add_resident(Resident::new(ResidentId(2), "Ben")).unwrap();
        store
            .add_expense(Expense::new(ExpenseId(1), ResidentId(1), BigDecimal::from(20), "Milk"))
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_status_filter() {
        let store = seeded();
        let unsettled = QueryExecutor::execute(
            &store,
            Query::GetExpenses {
                status: Some(ExpenseStatus::Unsettled),
            },
        )
        .await
        .unwrap()
        .into_expenses()
        .unwrap();
        assert_eq!(unsettled.len(), 1);

        let settled = QueryExecutor::execute(
            &store,
            Query::GetExpenses {
                status: Some(ExpenseStatus::Settled),
            },
        )
        .await
        .unwrap()
        .into_expenses()
        .unwrap();
        assert!(settled.is_empty());
    }

    #[tokio::test]
    async fn test_status_update_requires_expected_status() {
        let store = seeded();
        CommandExecutor::execute(&store, unsettled_to_in_progress(1))
            .await
            .unwrap();

        let err = CommandExecutor::execute(&store, unsettled_to_in_progress(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_atomic_batch_rolls_back_on_failure() {
        let store = seeded();
        let batch: CommandBatch = vec![
            record(1, &[1]),
            unsettled_to_in_progress(1),
            unsettled_to_in_progress(404),
        ]
        .into_iter()
        .collect();

        let err = store.execute_batch(batch).await.unwrap_err();

        assert!(matches!(err, PersistenceError::NotFound(_)));
        assert!(store.reconciliations().is_empty());
        assert_eq!(
            store.expense(ExpenseId(1)).unwrap().status,
            ExpenseStatus::Unsettled
        );
    }

    #[tokio::test]
    async fn test_expense_belongs_to_one_reconciliation() {
        let store = seeded();
        store
            .add_expense(Expense::new(ExpenseId(2), ResidentId(2), BigDecimal::from(8), "Bread"))
            .unwrap();
        CommandExecutor::execute(&store, record(1, &[1])).await.unwrap();

        let err = CommandExecutor::execute(&store, record(2, &[2, 1]))
            .await
            .unwrap_err();

        assert!(matches!(err, PersistenceError::Conflict(_)));
        assert_eq!(store.reconciliations().len(), 1);
        CommandExecutor::execute(&store, record(3, &[2])).await.unwrap();
    }

    #[tokio::test]
    async fn test_settlement_requires_reconciliation() {
        let store = seeded();
        let err = CommandExecutor::execute(
            &store,
            Command::InsertSettlement(InsertSettlement {
                reconciliation_id: ReconciliationId(9),
                payer: ResidentId(2),
                payee: ResidentId(1),
                amount: BigDecimal::from(10),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = seeded();
        store.fail_after(0);

        let first = CommandExecutor::execute(&store, unsettled_to_in_progress(1)).await;
        assert!(matches!(first, Err(PersistenceError::Unavailable(_))));

        let second = CommandExecutor::execute(&store, unsettled_to_in_progress(1)).await;
        assert!(second.is_ok());
    }

    #[test]
    fn test_duplicate_resident_is_a_conflict() {
        let store = seeded();
        let err = store
            .add_resident(Resident::new(ResidentId(1), "Ann"))
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Conflict(_)));
    }
}
