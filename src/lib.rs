pub mod config;
pub mod coordinator;
pub mod error;
pub mod node;
pub mod overview;
pub mod persistence;
pub mod protocol;
pub mod remote;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod worker;
