//! Long-lived service handles shared across clients.

mod store;

pub use store::LocalStore;
