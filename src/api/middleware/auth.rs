use axum::{extract::Request, middleware::Next, response::Response};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::{SESSION_KEY_ROLE, SESSION_KEY_USER_ID};
use crate::error::AppError;
use crate::services::{Principal, Role};

/// Reads the principal the authentication front end stored in the session.
///
/// A session without a user id is anonymous. A missing role means a plain
/// cardholder.
pub async fn principal_from_session(session: &Session) -> Result<Principal, AppError> {
    let user_id: Uuid = session
        .get(SESSION_KEY_USER_ID)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session error: {}", e)))?
        .ok_or(AppError::Unauthorized)?;

    let role: Role = session
        .get(SESSION_KEY_ROLE)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("session error: {}", e)))?
        .unwrap_or(Role::User);

    Ok(Principal { user_id, role })
}

/// Middleware that requires an authenticated principal
///
/// The principal is placed in request extensions for handlers to extract.
pub async fn require_auth(
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let principal = principal_from_session(&session).await?;

    tracing::debug!(
        user_id = %principal.user_id,
        role = ?principal.role,
        "Request authenticated"
    );

    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
        Extension, Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    #[tokio::test]
    async fn test_principal_from_session() {
        let session = session();
        let user_id = Uuid::new_v4();

        assert!(matches!(
            principal_from_session(&session).await,
            Err(AppError::Unauthorized)
        ));

        session.insert(SESSION_KEY_USER_ID, user_id).await.unwrap();
        assert_eq!(
            principal_from_session(&session).await.unwrap(),
            Principal::user(user_id)
        );

        session.insert(SESSION_KEY_ROLE, Role::Admin).await.unwrap();
        assert_eq!(
            principal_from_session(&session).await.unwrap(),
            Principal::admin(user_id)
        );
    }

    #[tokio::test]
    async fn test_anonymous_request_is_rejected() {
        let app = Router::new()
            .route(
                "/whoami",
                get(|Extension(principal): Extension<Principal>| async move {
                    principal.user_id.to_string()
                }),
            )
            .route_layer(axum::middleware::from_fn(require_auth))
            .layer(SessionManagerLayer::new(MemoryStore::default()));

        let response = app
            .oneshot(HttpRequest::builder().uri("/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
