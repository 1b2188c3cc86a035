pub mod api;
pub mod events;
pub mod fulfilment;
pub mod handlers;
pub mod notifier;
pub mod restock;
pub mod signature;
