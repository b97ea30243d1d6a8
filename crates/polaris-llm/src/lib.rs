pub mod gateway;
pub mod mock;
pub mod reliable;

pub use gateway::HttpGatewayProvider;
pub use mock::{MockProvider, MockResponse};
pub use reliable::{BreakerState, ReliableConfig, ReliableProvider};
