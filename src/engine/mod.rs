//! Core engine — the fetch → extract → reconcile loop and the profit
//! report computed from its output.

pub mod ingest;
pub mod profit;
