pub mod customer;
pub mod events;
pub mod provider;
pub mod public;
pub mod user;
