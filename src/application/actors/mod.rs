pub mod execution_actor;
pub mod reconciliation_actor;
