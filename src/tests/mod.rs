//! Scenario-level tests exercising the coordination layer end to end,
//! as opposed to the per-module unit tests living alongside each
//! `src/standard/*.rs` file.

mod deadlock_free_cross_acquire;
mod writer_exclusivity_dependency;
mod cross_device_transfer;
mod bundle_dispatch;
