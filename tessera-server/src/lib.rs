//! HTTP intake and process wiring for the Tessera worker.

pub mod callback;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_app;
pub use state::AppState;
