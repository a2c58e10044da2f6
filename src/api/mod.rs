//! The contest engine's HTTP surface (§6): wires the domain stores and
//! engines built elsewhere in the crate onto an axum `Router`.

pub mod dto;
pub mod routes;

use std::sync::Arc;

use crate::auth::{AuthState, JwtHandler};
use crate::clock::DeadlineGate;
use crate::leaderboard::LeaderboardAggregator;
use crate::matches::MatchStore;
use crate::membership::MembershipStore;
use crate::predictions::PredictionStore;
use crate::results::ResultStore;

pub use routes::router;

/// Everything a request handler needs, cloned per-request the way the
/// teacher's own `AppState` is (every field is itself cheaply `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub matches: MatchStore,
    pub membership: MembershipStore,
    pub predictions: PredictionStore,
    pub results: ResultStore,
    pub leaderboard: LeaderboardAggregator,
    pub deadline_gate: Arc<DeadlineGate>,
    pub auth: AuthState,
    pub jwt_handler: Arc<JwtHandler>,
}
