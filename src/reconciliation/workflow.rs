//! Reconciliation workflow
//!
//! A run moves through
//! `Started → ExpensesLoaded → ResidentsLoaded → SettlementsComputed →
//! Persisted → ExpensesMarked → Completed`, or ends in `Aborted` on failure.
//! When there is nothing unsettled the run stops after `ExpensesLoaded`
//! without writing anything.
//!
//! Runs are idempotent per reconciliation id. The reconciliation record is
//! written before its settlements and lists the expenses it consumes and the
//! roster it was computed against. A run that finds its record already
//! present recomputes against that roster, only writes the settlements that
//! are still missing and marks the recorded expenses that are still
//! unsettled.
//!
//! An expense belongs to at most one reconciliation record. New runs skip
//! expenses already claimed by a record, even while they are still
//! unsettled, so an interrupted run can only be finished by resuming it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{ReconcilerConfig, RosterSource};
use crate::settlement::SettlementBuilder;
use crate::traits::*;
use crate::types::*;

/// HTTP status for a completed reconciliation
pub const STATUS_OK: u16 = 200;

/// HTTP status when there was nothing to reconcile
pub const STATUS_NO_CONTENT: u16 = 204;

/// A request to reconcile all currently unsettled expenses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRequest {
    /// Caller-chosen id; re-submitting the same id resumes the same run
    pub id: ReconciliationId,
    pub requested_at: NaiveDateTime,
}

impl ReconciliationRequest {
    /// Request stamped with the current time
    pub fn new(id: ReconciliationId) -> Self {
        Self::at(id, chrono::Utc::now().naive_utc())
    }

    pub fn at(id: ReconciliationId, requested_at: NaiveDateTime) -> Self {
        Self { id, requested_at }
    }
}

/// Steps of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Started,
    ExpensesLoaded,
    ResidentsLoaded,
    SettlementsComputed,
    Persisted,
    ExpensesMarked,
    Completed,
    Aborted,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub reconciliation_id: ReconciliationId,
    /// Every settlement recorded for the reconciliation after this run
    pub settlements: Vec<Settlement>,
    /// Expenses moved to `InProgress` by this run
    pub expenses_marked: Vec<ExpenseId>,
    /// Whether the run picked up a reconciliation recorded by an earlier run
    pub resumed: bool,
    /// States passed through, in order
    pub states: Vec<WorkflowState>,
}

/// How a run ended successfully
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationOutcome {
    Completed(ReconciliationReport),
    /// No unsettled expenses; nothing was written
    NothingToReconcile,
}

impl ReconciliationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ReconciliationOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&ReconciliationReport> {
        match self {
            ReconciliationOutcome::Completed(report) => Some(report),
            ReconciliationOutcome::NothingToReconcile => None,
        }
    }

    /// Status code a web host should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ReconciliationOutcome::Completed(_) => STATUS_OK,
            ReconciliationOutcome::NothingToReconcile => STATUS_NO_CONTENT,
        }
    }
}

struct StateTrace {
    reconciliation_id: ReconciliationId,
    states: Vec<WorkflowState>,
}

impl StateTrace {
    fn new(reconciliation_id: ReconciliationId) -> Self {
        Self {
            reconciliation_id,
            states: vec![WorkflowState::Started],
        }
    }

    fn current(&self) -> WorkflowState {
        self.states
            .last()
            .copied()
            .unwrap_or(WorkflowState::Started)
    }

    fn advance(&mut self, next: WorkflowState) {
        tracing::debug!(
            reconciliation_id = %self.reconciliation_id,
            from = %self.current(),
            to = %next,
            "workflow transition"
        );
        self.states.push(next);
    }
}

/// Settlements from `drafts` that have no matching record in `recorded`.
/// Every recorded settlement must match a draft.
fn outstanding(
    id: ReconciliationId,
    drafts: Vec<InsertSettlement>,
    recorded: &[Settlement],
) -> ReconcileResult<Vec<InsertSettlement>> {
    let mut unmatched: Vec<&Settlement> = recorded.iter().collect();
    let missing = drafts
        .into_iter()
        .filter(|draft| match unmatched.iter().position(|s| draft.matches(s)) {
            Some(index) => {
                unmatched.swap_remove(index);
                false
            }
            None => true,
        })
        .collect();

    match unmatched.first() {
        Some(stray) => Err(ReconcileError::Inconsistent {
            id,
            reason: format!(
                "recorded settlement {} ({} owes {} {}) does not match the recomputed settlements",
                stray.id, stray.payer, stray.payee, stray.amount
            ),
        }),
        None => Ok(missing),
    }
}

/// Drives one household's reconciliations through the executor contracts
///
/// Runs on the same workflow are serialized, so overlapping requests never
/// consume the same expenses twice: the later one finds nothing unsettled.
pub struct ReconciliationWorkflow<C, Q> {
    commands: Arc<C>,
    queries: Arc<Q>,
    config: ReconcilerConfig,
    run_lock: Mutex<()>,
}

impl<C, Q> ReconciliationWorkflow<C, Q>
where
    C: CommandExecutor,
    Q: QueryExecutor,
{
    pub fn new(commands: Arc<C>, queries: Arc<Q>, config: ReconcilerConfig) -> Self {
        Self {
            commands,
            queries,
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run the workflow once
    pub async fn run(
        &self,
        request: &ReconciliationRequest,
    ) -> ReconcileResult<ReconciliationOutcome> {
        let _guard = self.run_lock.lock().await;
        let mut trace = StateTrace::new(request.id);

        match self.execute(request, &mut trace).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(
                    reconciliation_id = %request.id,
                    state = %trace.current(),
                    "Reconciliation aborted: {}",
                    e
                );
                trace.advance(WorkflowState::Aborted);
                Err(e)
            }
        }
    }

    /// Run the workflow, re-running it after persistence failures up to
    /// `max_attempts` times in total
    pub async fn run_with_retry(
        &self,
        request: &ReconciliationRequest,
    ) -> ReconcileResult<ReconciliationOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.run(request).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        reconciliation_id = %request.id,
                        attempt,
                        max_attempts,
                        "Reconciliation attempt failed, retrying: {}",
                        e
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn execute(
        &self,
        request: &ReconciliationRequest,
        trace: &mut StateTrace,
    ) -> ReconcileResult<ReconciliationOutcome> {
        let id = request.id;
        tracing::info!(reconciliation_id = %id, "Starting reconciliation");

        let recorded = self.find_reconciliation(id).await?;
        let resumed = recorded.is_some();
        let mut expenses = match &recorded {
            Some(reconciliation) => {
                tracing::info!(
                    reconciliation_id = %id,
                    "Reconciliation already recorded, resuming"
                );
                self.check_exclusive(reconciliation).await?;
                self.load_recorded_expenses(reconciliation).await?
            }
            None => self.load_available_expenses().await?,
        };
        expenses.sort_by_key(|expense| expense.id);
        trace.advance(WorkflowState::ExpensesLoaded);

        if expenses.is_empty() && !resumed {
            tracing::info!(reconciliation_id = %id, "No unsettled expenses, nothing to reconcile");
            return Ok(ReconciliationOutcome::NothingToReconcile);
        }

        let expense_ids: Vec<ExpenseId> = expenses.iter().map(|e| e.id).collect();
        let pending: Vec<ExpenseId> = expenses
            .iter()
            .filter(|e| e.is_unsettled())
            .map(|e| e.id)
            .collect();

        if resumed && pending.is_empty() {
            let settlements = self.load_settlements(id).await?;
            trace.advance(WorkflowState::Completed);
            tracing::info!(reconciliation_id = %id, "Reconciliation was already complete");
            return Ok(ReconciliationOutcome::Completed(ReconciliationReport {
                reconciliation_id: id,
                settlements,
                expenses_marked: Vec::new(),
                resumed,
                states: trace.states.clone(),
            }));
        }

        let residents = match &recorded {
            Some(reconciliation) => self.load_recorded_roster(reconciliation).await?,
            None => self.load_roster().await?,
        };
        let mut resident_ids: Vec<ResidentId> = residents.iter().map(|r| r.id).collect();
        resident_ids.sort();
        trace.advance(WorkflowState::ResidentsLoaded);

        let mut builder =
            SettlementBuilder::new(id, residents).currency_scale(self.config.currency_scale);
        builder.add_expenses(expenses);
        let drafts = builder.build()?;

        let existing = if resumed {
            self.load_settlements(id).await?
        } else {
            Vec::new()
        };
        let missing = outstanding(id, drafts, &existing)?;
        trace.advance(WorkflowState::SettlementsComputed);
        tracing::debug!(
            reconciliation_id = %id,
            expenses = expense_ids.len(),
            settlements = missing.len(),
            "Settlements computed"
        );

        let mut persist = CommandBatch::new();
        if !resumed {
            persist.push(Command::InsertReconciliation(InsertReconciliation {
                id,
                created_at: request.requested_at,
                expense_ids,
                resident_ids,
            }));
        }
        persist.extend(missing.iter().cloned().map(Command::InsertSettlement));

        let marks: CommandBatch = pending
            .iter()
            .map(|expense_id| {
                Command::UpdateExpenseStatus(UpdateExpenseStatus {
                    id: *expense_id,
                    expected: ExpenseStatus::Unsettled,
                    status: ExpenseStatus::InProgress,
                })
            })
            .collect();

        let outcomes = if self.commands.supports_atomic_batch() {
            let mut batch = persist;
            batch.extend(marks);
            let outcomes = self.commands.execute_batch(batch).await?;
            trace.advance(WorkflowState::Persisted);
            trace.advance(WorkflowState::ExpensesMarked);
            outcomes
        } else {
            let mut outcomes = self.commands.execute_batch(persist).await?;
            trace.advance(WorkflowState::Persisted);
            outcomes.extend(self.commands.execute_batch(marks).await?);
            trace.advance(WorkflowState::ExpensesMarked);
            outcomes
        };

        let inserted: Vec<SettlementId> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                CommandOutcome::SettlementInserted(settlement_id) => Some(*settlement_id),
                _ => None,
            })
            .collect();
        if inserted.len() != missing.len() {
            return Err(PersistenceError::UnexpectedResult(format!(
                "inserted {} settlements, expected {}",
                inserted.len(),
                missing.len()
            ))
            .into());
        }

        let mut settlements = existing;
        settlements.extend(
            missing
                .into_iter()
                .zip(inserted)
                .map(|(draft, settlement_id)| draft.into_settlement(settlement_id)),
        );

        trace.advance(WorkflowState::Completed);
        tracing::info!(
            reconciliation_id = %id,
            settlements = settlements.len(),
            expenses_marked = pending.len(),
            resumed,
            "Reconciliation complete"
        );

        Ok(ReconciliationOutcome::Completed(ReconciliationReport {
            reconciliation_id: id,
            settlements,
            expenses_marked: pending,
            resumed,
            states: trace.states.clone(),
        }))
    }

    async fn find_reconciliation(
        &self,
        id: ReconciliationId,
    ) -> ReconcileResult<Option<Reconciliation>> {
        Ok(self
            .queries
            .execute(Query::GetReconciliationById(id))
            .await?
            .into_reconciliation()?)
    }

    async fn load_expenses(&self, status: Option<ExpenseStatus>) -> ReconcileResult<Vec<Expense>> {
        Ok(self
            .queries
            .execute(Query::GetExpenses { status })
            .await?
            .into_expenses()?)
    }

    /// Unsettled expenses that no reconciliation record has claimed yet
    async fn load_available_expenses(&self) -> ReconcileResult<Vec<Expense>> {
        let claimed: BTreeSet<ExpenseId> = self
            .load_reconciliations()
            .await?
            .into_iter()
            .flat_map(|reconciliation| reconciliation.expense_ids)
            .collect();

        let (available, held): (Vec<Expense>, Vec<Expense>) = self
            .load_expenses(Some(ExpenseStatus::Unsettled))
            .await?
            .into_iter()
            .partition(|expense| !claimed.contains(&expense.id));

        if !held.is_empty() {
            tracing::warn!(
                expenses = held.len(),
                "Skipping unsettled expenses claimed by an unfinished reconciliation"
            );
        }
        Ok(available)
    }

    /// Fail when another reconciliation record lists any of this one's expenses
    async fn check_exclusive(&self, reconciliation: &Reconciliation) -> ReconcileResult<()> {
        let overlap = self
            .load_reconciliations()
            .await?
            .into_iter()
            .filter(|other| other.id != reconciliation.id)
            .find_map(|other| {
                other
                    .expense_ids
                    .iter()
                    .find(|expense_id| reconciliation.expense_ids.contains(*expense_id))
                    .map(|expense_id| (other.id, *expense_id))
            });

        match overlap {
            Some((other, expense_id)) => Err(ReconcileError::Inconsistent {
                id: reconciliation.id,
                reason: format!(
                    "expense {} is also claimed by reconciliation {}",
                    expense_id, other
                ),
            }),
            None => Ok(()),
        }
    }

    async fn load_recorded_expenses(
        &self,
        reconciliation: &Reconciliation,
    ) -> ReconcileResult<Vec<Expense>> {
        let expenses: Vec<Expense> = self
            .load_expenses(None)
            .await?
            .into_iter()
            .filter(|expense| reconciliation.expense_ids.contains(&expense.id))
            .collect();

        if expenses.len() != reconciliation.expense_ids.len() {
            return Err(PersistenceError::NotFound(format!(
                "reconciliation {} records {} expenses but only {} exist",
                reconciliation.id,
                reconciliation.expense_ids.len(),
                expenses.len()
            ))
            .into());
        }

        Ok(expenses)
    }

    async fn load_roster(&self) -> ReconcileResult<Vec<Resident>> {
        let query = match self.config.roster_source {
            RosterSource::Residents => Query::GetResidents,
            RosterSource::Users => Query::GetAllUsers,
        };
        Ok(self.queries.execute(query).await?.into_residents()?)
    }

    /// The current roster restricted to the residents recorded with the
    /// reconciliation
    async fn load_recorded_roster(
        &self,
        reconciliation: &Reconciliation,
    ) -> ReconcileResult<Vec<Resident>> {
        let residents: Vec<Resident> = self
            .load_roster()
            .await?
            .into_iter()
            .filter(|resident| reconciliation.resident_ids.contains(&resident.id))
            .collect();

        if let Some(gone) = reconciliation
            .resident_ids
            .iter()
            .find(|id| !residents.iter().any(|resident| resident.id == **id))
        {
            return Err(ReconcileError::Inconsistent {
                id: reconciliation.id,
                reason: format!("resident {} is no longer on the roster", gone),
            });
        }

        Ok(residents)
    }

    async fn load_reconciliations(&self) -> ReconcileResult<Vec<Reconciliation>> {
        Ok(self
            .queries
            .execute(Query::GetReconciliations)
            .await?
            .into_reconciliations()?)
    }

    async fn load_settlements(&self, id: ReconciliationId) -> ReconcileResult<Vec<Settlement>> {
        Ok(self
            .queries
            .execute(Query::GetSettlementsByReconciliationId(id))
            .await?
            .into_settlements()?)
    }
}
