use axum::Router;

use crate::state::AppState;

pub mod claims;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod services;

pub use extractors::CurrentUser;
pub use jwt::TokenAuthenticator;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
