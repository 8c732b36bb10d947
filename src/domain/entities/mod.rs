pub mod candidate;
pub mod observation;
pub mod position;
pub mod trade;
