pub mod events;
pub mod integrations;
pub mod notifications;
pub mod reports;
pub mod webhooks;
