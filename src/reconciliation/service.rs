//! Facade exposing the operations a web host mounts

use std::sync::Arc;

use crate::config::ReconcilerConfig;
use crate::reconciliation::workflow::{
    ReconciliationOutcome, ReconciliationRequest, ReconciliationWorkflow,
};
use crate::traits::*;
use crate::types::*;

/// Reconciliation operations for one household
pub struct ReconciliationService<C, Q> {
    workflow: ReconciliationWorkflow<C, Q>,
    queries: Arc<Q>,
}

impl<C, Q> ReconciliationService<C, Q>
where
    C: CommandExecutor,
    Q: QueryExecutor,
{
    /// Create a new service over the given executors
    pub fn new(commands: Arc<C>, queries: Arc<Q>, config: ReconcilerConfig) -> Self {
        Self {
            workflow: ReconciliationWorkflow::new(commands, Arc::clone(&queries), config),
            queries,
        }
    }

    pub fn workflow(&self) -> &ReconciliationWorkflow<C, Q> {
        &self.workflow
    }

    /// Reconcile every unsettled expense, retrying persistence failures
    pub async fn reconcile(
        &self,
        request: &ReconciliationRequest,
    ) -> ReconcileResult<ReconciliationOutcome> {
        self.workflow.run_with_retry(request).await
    }

    /// All reconciliations with their settlements, oldest id first
    pub async fn list_reconciliations(&self) -> ReconcileResult<Vec<ReconciliationView>> {
        let reconciliations = self
            .queries
            .execute(Query::GetReconciliations)
            .await?
            .into_reconciliations()?;

        let mut views = Vec::with_capacity(reconciliations.len());
        for reconciliation in reconciliations {
            views.push(self.enrich(reconciliation).await?);
        }
        views.sort_by_key(|view| view.reconciliation.id);
        Ok(views)
    }

    /// One reconciliation with its settlements
    pub async fn get_reconciliation(
        &self,
        id: ReconciliationId,
    ) -> ReconcileResult<Option<ReconciliationView>> {
        let reconciliation = self
            .queries
            .execute(Query::GetReconciliationById(id))
            .await?
            .into_reconciliation()?;

        match reconciliation {
            Some(reconciliation) => Ok(Some(self.enrich(reconciliation).await?)),
            None => {
                tracing::debug!(reconciliation_id = %id, "Reconciliation not found");
                Ok(None)
            }
        }
    }

    async fn enrich(&self, reconciliation: Reconciliation) -> ReconcileResult<ReconciliationView> {
        let settlements = self
            .queries
            .execute(Query::GetSettlementsByReconciliationId(reconciliation.id))
            .await?
            .into_settlements()?;
        Ok(ReconciliationView {
            reconciliation,
            settlements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MemoryStore;
    use bigdecimal::BigDecimal;

    #[tokio::test]
    async fn test_get_unknown_reconciliation() {
        let store = Arc::new(MemoryStore::new());
        let service =
            ReconciliationService::new(Arc::clone(&store), store, ReconcilerConfig::default());

        assert!(service
            .get_reconciliation(ReconciliationId(42))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_is_enriched_with_settlements() {
        let store = Arc::new(MemoryStore::new());
        store.add_resident(Resident::new(ResidentId(1), "Ann")).unwrap();
        store.add_resident(Resident::new(ResidentId(2), "Ben")).unwrap();
        store
            .add_expense(Expense::new(ExpenseId(1), ResidentId(2), BigDecimal::from(50), "Gas"))
            .unwrap();
        let service = ReconciliationService::new(
            Arc::clone(&store),
            Arc::clone(&store),
            ReconcilerConfig::default(),
        );

        service
            .reconcile(&ReconciliationRequest::new(ReconciliationId(5)))
            .await
            .unwrap();
        let views = service.list_reconciliations().await.unwrap();

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].reconciliation.expense_ids, vec![ExpenseId(1)]);
        assert_eq!(views[0].settlements.len(), 1);
        assert_eq!(views[0].total_settled(), BigDecimal::from(25));
    }
}
