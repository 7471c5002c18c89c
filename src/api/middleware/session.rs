use axum::extract::FromRef;
use ring::digest;
use sqlx::PgPool;
use tower_sessions::{cookie::Key, service::SignedCookie, Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::PostgresStore;

use crate::config::Config;
use crate::services::{BlockRequestWorkflow, CardRegistry, TransferEngine};

/// Session keys written by the authentication front end
pub const SESSION_KEY_USER_ID: &str = "user_id";
pub const SESSION_KEY_ROLE: &str = "role";

pub type SessionLayer = SessionManagerLayer<PostgresStore, SignedCookie>;

/// Creates a session layer for Axum
pub async fn create_session_layer(
    pool: PgPool,
    session_secret: &[u8],
) -> Result<SessionLayer, sqlx::Error> {
    // Create the session store backed by PostgreSQL
    let session_store = PostgresStore::new(pool);
    session_store.migrate().await?;

    Ok(signed_session_layer(session_store, session_secret))
}

/// Cookies are signed with a key stretched from the configured secret.
fn signed_session_layer(session_store: PostgresStore, session_secret: &[u8]) -> SessionLayer {
    // SHA-512 gives the 64 bytes a cookie signing key needs
    let signing_key = Key::from(digest::digest(&digest::SHA512, session_secret).as_ref());

    SessionManagerLayer::new(session_store)
        .with_secure(true)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(24)))
        .with_signed(signing_key)
}

/// Shared application state handed to every router
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub registry: CardRegistry,
    pub block_requests: BlockRequestWorkflow,
    pub transfers: TransferEngine,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.pool.clone()
    }
}
