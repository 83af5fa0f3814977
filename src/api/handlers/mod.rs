//! Route handlers.
//!
//! Every guarded handler runs the same gate order before touching domain
//! state: rate limit, payload validation, bearer verification, permission
//! requirement. Handlers return `Result<impl IntoResponse, ApiError>` so
//! failures share one error body shape.

pub mod audit;
pub mod health;
pub mod login;
pub mod password;
pub mod refresh;
pub mod register;
pub mod roles;
pub mod session;
pub mod types;

mod storage;
mod utils;
