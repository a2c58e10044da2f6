//! Contest engine daemon: wires the domain stores and background
//! processes (§0) onto an axum server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use contest_backend::{
    api::{self, AppState},
    auth::{api as auth_api, auth_middleware, AuthState, JwtHandler, UserStore},
    clock::DeadlineGate,
    config::Config,
    db::Db,
    leaderboard::LeaderboardAggregator,
    matches::MatchStore,
    membership::MembershipStore,
    outbox::Outbox,
    predictions::PredictionStore,
    results::ResultStore,
    scoring::SettlementEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("loading configuration")?;
    info!(port = config.port, database_path = %config.database_path, "contest engine starting");

    let db = Db::open(&config.database_path)?;

    let matches = MatchStore::new(db.clone());
    let membership = MembershipStore::new(db.clone());
    let predictions = PredictionStore::new(db.clone(), matches.clone(), membership.clone());
    let outbox = Outbox::new(db.clone());
    let results = ResultStore::new(db.clone(), matches.clone(), outbox.clone());
    let leaderboard = LeaderboardAggregator::new(db.clone(), &config);

    let deadline_gate = DeadlineGate::new(matches.clone(), outbox.clone());
    deadline_gate.seed().context("seeding deadline gate")?;

    let settlement_engine = Arc::new(SettlementEngine::with_retry(
        db.clone(),
        predictions.clone(),
        outbox.clone(),
        config.scoring.clone(),
        config.retry.clone(),
    ));

    let user_store = Arc::new(UserStore::new(db.clone()).context("initializing user store")?);
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let auth_state = AuthState::new(user_store, jwt_handler.clone());

    tokio::spawn(deadline_gate.clone().run());
    tokio::spawn(Arc::new(outbox.clone()).run_pump(Duration::from_millis(250)));
    tokio::spawn(settlement_engine.run());

    let app_state = AppState {
        matches,
        membership,
        predictions,
        results,
        leaderboard,
        deadline_gate,
        auth: auth_state.clone(),
        jwt_handler: jwt_handler.clone(),
    };

    let auth_router = Router::new()
        .route("/api/auth/login", post(auth_api::login))
        .with_state(auth_state.clone());

    let admin_router = Router::new()
        .route("/api/admin/users", get(auth_api::list_users).post(auth_api::create_user))
        .route("/api/admin/users/:id", axum::routing::delete(auth_api::delete_user))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler.clone(), auth_middleware))
        .with_state(auth_state.clone());

    let me_router = Router::new()
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler.clone(), auth_middleware))
        .with_state(auth_state);

    let protected_routes = api::router(app_state).route_layer(axum_mw::from_fn_with_state(jwt_handler, auth_middleware));

    let public_routes = Router::new().route("/health", get(health_check));

    let app = Router::new()
        .merge(public_routes)
        .merge(auth_router)
        .merge(admin_router)
        .merge(me_router)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            contest_backend::middleware::request_logging_simple,
        ));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "contest engine listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn health_check() -> &'static str {
    "contest engine operational"
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contest_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
