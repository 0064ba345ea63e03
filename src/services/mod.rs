pub mod cleanup;
pub mod gateway;
pub mod inventory;
pub mod payment;
