//! End-to-end ingestion scenarios against an in-memory marketplace.

mod mock_market;
mod sync_runs;
