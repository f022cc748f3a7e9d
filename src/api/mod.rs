//! API Module
//!
//! HTTP handlers and routing exposing the engine to UI collaborators, plus
//! a reference authoritative store speaking the envelope protocol.
//!
//! # Endpoints
//! - `GET /settings` - All settings
//! - `PATCH /settings` - Set several settings
//! - `DELETE /settings` - Clear to defaults
//! - `GET|PUT|DELETE /settings/:key` - Single setting
//! - `POST /settings/reset` - Reset keys (or all) to defaults
//! - `GET /search?q=` - Substring search
//! - `GET /export?format=json|css` - Export
//! - `POST /import` - Import a settings object or export envelope
//! - `POST /refresh` - Pull from the remote
//! - `POST /save` - Flush pending changes now
//! - `GET /status`, `GET /metrics`, `GET /health`

pub mod handlers;
pub mod remote_store;
pub mod routes;

pub use handlers::*;
pub use remote_store::create_remote_store_router;
pub use routes::create_router;
