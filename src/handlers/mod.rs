pub mod admin;
pub mod health;
pub mod orders;
pub mod webhooks;
