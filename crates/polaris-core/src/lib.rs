pub mod context;
pub mod conversation;
pub mod errors;
pub mod events;
pub mod files;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod security;
pub mod tools;
