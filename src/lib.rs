pub mod adapter;
pub mod config;
pub mod error;
pub mod journal;
pub mod models;
pub mod polling;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::{BackendConfig, GatewayConfig};
pub use error::{GatewayError, Result};
pub use journal::SharedJournal;
pub use server::{build_router, AppState};
