pub mod bus;
pub mod dispatch;
pub mod error;
pub mod names;
pub mod server;

pub use bus::{LocalJobBus, TriggerBus};
pub use dispatch::Dispatcher;
pub use error::DispatchError;
pub use server::{start, ServerConfig, ServerHandle};
