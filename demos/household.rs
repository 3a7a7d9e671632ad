//! Household reconciliation example

use householder_core::utils::MemoryStore;
use householder_core::{
    Expense, ExpenseId, ReconcilerConfig, ReconciliationId, ReconciliationOutcome,
    ReconciliationRequest, ReconciliationService, Resident, ResidentId,
};
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ReconcilerConfig::from_env()?;
    let store = Arc::new(MemoryStore::new());

    println!("🏠 Householder - Reconciliation Example\n");

    // 1. Roster
    println!("👥 Residents");
    for (id, name) in [(1, "Ann"), (2, "Ben"), (3, "Cal")] {
        store.add_resident(Resident::new(ResidentId(id), name))?;
        println!("  ✓ {} - {}", id, name);
    }
    println!();

    // 2. Expenses
    println!("🧾 Expenses");
    let week = NaiveDate::from_ymd_opt(2024, 3, 4).ok_or("invalid date")?;
    let mut takeaway = BTreeMap::new();
    takeaway.insert(ResidentId(2), BigDecimal::from_str("18.00")?);
    takeaway.insert(ResidentId(3), BigDecimal::from_str("24.50")?);

    let expenses = vec![
        Expense::new(ExpenseId(1), ResidentId(1), BigDecimal::from_str("90.00")?, "Groceries"),
        Expense::new(ExpenseId(2), ResidentId(3), BigDecimal::from_str("100.00")?, "Internet"),
        Expense::new(ExpenseId(3), ResidentId(2), BigDecimal::from_str("42.50")?, "Takeaway")
            .with_shares(takeaway),
    ];
    for expense in expenses {
        println!(
            "  ✓ {} paid {} for {}",
            expense.payer, expense.amount, expense.description
        );
        store.add_expense(expense.on(week))?;
    }
    println!();

    // 3. Reconcile
    let service = ReconciliationService::new(Arc::clone(&store), Arc::clone(&store), config);
    let request = ReconciliationRequest::new(ReconciliationId(1));

    println!("⚖️  Reconciling...");
    match service.reconcile(&request).await? {
        ReconciliationOutcome::Completed(report) => {
            for settlement in &report.settlements {
                println!(
                    "  → resident {} pays resident {}: {}",
                    settlement.payer, settlement.payee, settlement.amount
                );
            }
            println!("  ✓ {} expenses now in progress", report.expenses_marked.len());
        }
        ReconciliationOutcome::NothingToReconcile => println!("  Nothing to reconcile"),
    }
    println!();

    // 4. Running it again finds nothing new
    let second = service
        .reconcile(&ReconciliationRequest::new(ReconciliationId(2)))
        .await?;
    println!("🔁 Second run answers HTTP {}", second.status_code());

    for view in service.list_reconciliations().await? {
        println!(
            "📋 Reconciliation {}: {} settlements totalling {}",
            view.reconciliation.id,
            view.settlements.len(),
            view.total_settled()
        );
    }

    Ok(())
}
