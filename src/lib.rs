//! # Householder Core
//!
//! Reconciliation engine for shared household expenses: works out who owes
//! whom across a batch of unsettled expenses and records the result as
//! settlements.
//!
//! ## Features
//!
//! - **Balance calculation**: exact fixed-point net positions, with equal
//!   splits that hand out remainders deterministically
//! - **Debt simplification**: greedy pairing of largest creditor and debtor,
//!   at most `residents - 1` settlements
//! - **Reconciliation workflow**: idempotent, resumable runs over narrow
//!   command and query contracts
//! - **Storage abstraction**: any backend implementing [`CommandExecutor`]
//!   and [`QueryExecutor`]; an in-memory store is included
//!
//! ## Quick Start
//!
//! ```rust
//! use householder_core::utils::MemoryStore;
//! use householder_core::{
//!     Expense, ExpenseId, ReconcilerConfig, ReconciliationId, ReconciliationRequest,
//!     ReconciliationService, Resident, ResidentId,
//! };
//! use bigdecimal::BigDecimal;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! store.add_resident(Resident::new(ResidentId(1), "Ann"))?;
//! store.add_resident(Resident::new(ResidentId(2), "Ben"))?;
//! store.add_expense(Expense::new(ExpenseId(1), ResidentId(1), BigDecimal::from(40), "Groceries"))?;
//!
//! let service = ReconciliationService::new(store.clone(), store, ReconcilerConfig::default());
//! let outcome = service.reconcile(&ReconciliationRequest::new(ReconciliationId(1))).await?;
//! assert!(outcome.is_completed());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod reconciliation;
pub mod settlement;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use reconciliation::*;
pub use settlement::*;
pub use traits::*;
pub use types::*;
