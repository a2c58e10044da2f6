//! The identity boundary (§7): JWT issuance/validation and account
//! storage, scoped down to the `user`/`admin` roles the core needs.

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod user_store;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use user_store::UserStore;
