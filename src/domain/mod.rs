pub mod connector;
pub mod entities;
pub mod errors;
pub mod services;
