pub mod api;
pub mod attendees;
pub mod handlers;
pub mod resolver;
