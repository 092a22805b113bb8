// Application layer - use cases and orchestration over the storage traits.

mod accounts;
mod config;
mod customers;
pub mod error;
mod ledger;
mod locks;
mod service;
mod transactions;

pub use accounts::*;
pub use config::*;
pub use customers::*;
pub use error::*;
pub use ledger::*;
pub use locks::*;
pub use service::*;
pub use transactions::*;
