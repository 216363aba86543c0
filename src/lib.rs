pub mod app;
pub mod blockchain;
pub mod cache;
pub mod config;
pub mod db;
pub mod flusher;
pub mod messaging;
pub mod models;
pub mod retry;
pub mod sweeper;
pub mod validation;

#[cfg(test)]
pub mod tests;

pub use blockchain::client::{ChainReader, ClientError, Endpoint, RpcClient};
pub use blockchain::hub::Hub;
pub use config::Config;
pub use flusher::{Flusher, FlusherConfig};
pub use sweeper::{Sweeper, SweeperConfig};
