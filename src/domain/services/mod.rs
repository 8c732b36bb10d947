pub mod confidence;
pub mod optimizer;
pub mod prediction;
pub mod preflight;
pub mod risk_ledger;
pub mod sizer;
pub mod stops;
pub mod validators;
