pub mod client;
pub mod hub;
pub mod models;
pub mod queries;

pub use client::{ChainReader, ClientError, RpcClient};
pub use hub::Hub;
