pub mod actors;
pub mod engine;
pub mod events;
