//! A small ledger with a vetoing listener and a derived total.
//!
//! Run with: cargo run -p horizon-grid --example ledger
//!
//! Set `RUST_LOG=horizon_grid=debug,horizon_grid_core::dispatch=trace` to
//! watch the dispatcher.

use std::time::Duration;

use horizon_grid::{
    CellValue, Derivation, EventKind, GridConfig, Listenable, Table, TableTreeDebug, Veto,
    evaluator_fn, listener_fn,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sum = evaluator_fn(|ctx| {
        let total: f64 = ctx
            .precedent_values()?
            .iter()
            .filter_map(CellValue::as_f64)
            .sum();
        Ok(CellValue::Number(total))
    });
    let table = Table::builder("ledger")
        .config(GridConfig::with_workers(2).thread_name("ledger-recalc"))
        .evaluator(sum)
        .build()?;

    let amounts = table.add_column()?;
    amounts.set_label("amount")?;
    let rows: Vec<_> = (0..3).map(|_| table.add_row()).collect::<Result<_, _>>()?;
    let total_row = table.add_row()?;
    total_row.set_label("total")?;

    let no_negatives = listener_fn(|event| match event.new_value().and_then(CellValue::as_f64) {
        Some(n) if n < 0.0 => Err(Veto::with_reason(event.clone(), "amounts are positive")),
        _ => Ok(()),
    });
    amounts.add_listeners(EventKind::BeforeNewValue, &[no_negatives.clone()]);

    let announcements = listener_fn(|event| {
        println!("table: {:?}", event.kind());
        Ok(())
    });
    table.add_listeners(EventKind::Pendings, &[announcements.clone()]);
    table.add_listeners(EventKind::NoPendings, &[announcements.clone()]);

    let cells = rows
        .iter()
        .map(|row| table.cell(row, &amounts))
        .collect::<Result<Vec<_>, _>>()?;
    let total = table.cell(&total_row, &amounts)?;
    total.set_derivation(Derivation::new("=SUM(amount)", &cells))?;

    for (i, cell) in cells.iter().enumerate() {
        cell.set_value(10.0 * (i + 1) as f64)?;
    }
    if let Err(error) = cells[0].set_value(-5.0) {
        println!("rejected: {error}");
    }

    table.wait_idle(Duration::from_secs(5));
    println!("total = {}", total.value());
    println!();
    print!("{}", TableTreeDebug::new().display(&table));

    Ok(())
}
