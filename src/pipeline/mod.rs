pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod intake;
pub mod lifecycle;
pub mod lock;
pub mod paths;
pub mod processor;
pub mod reconcile;
pub mod store;
pub mod transfer;
pub mod util;
pub mod warn;
