use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::{ActorKey, RecommendationRecord},
    services::recommendations::MaterializeOutcome,
};

use super::AppState;

/// Identity the storefront passes along
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// Who a read is for
#[derive(Debug, Clone, PartialEq)]
enum Identity {
    /// Only one of the two ids was given
    Single(ActorKey),
    /// A signed-in user still carrying an anonymous session
    SignedIn { session: ActorKey, user: ActorKey },
}

impl ActorQuery {
    fn identity(&self) -> AppResult<Identity> {
        let provided = |value: &Option<String>| {
            value.as_deref().map(str::trim).is_some_and(|v| !v.is_empty())
        };

        match (provided(&self.session_id), provided(&self.user_id)) {
            (false, false) => Err(AppError::InvalidInput(
                "sessionId or userId is required".to_string(),
            )),
            (true, true) => Ok(Identity::SignedIn {
                session: ActorKey::resolve(self.session_id.as_deref(), None),
                user: ActorKey::resolve(None, self.user_id.as_deref()),
            }),
            _ => Ok(Identity::Single(ActorKey::resolve(
                self.session_id.as_deref(),
                self.user_id.as_deref(),
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub actor_key: ActorKey,
    /// `null` while the actor is cold
    pub data: Option<RecommendationRecord>,
}

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Latest materialized recommendations for a session or user.
///
/// When both ids are present the session's history is merged into the user first,
/// so signing in keeps what was browsed anonymously.
pub async fn get_recommendations(
    State(state): State<AppState>,
    Query(query): Query<ActorQuery>,
) -> AppResult<Json<RecommendationsResponse>> {
    let (actor_key, data) = match query.identity()? {
        Identity::Single(actor_key) => {
            let data = state.recommendations.get(&actor_key).await?;
            (actor_key, data)
        }
        Identity::SignedIn { session, user } => {
            match state.materializer.merge_into(&session, &user).await? {
                Some(MaterializeOutcome::Written(record)) => (user, Some(record)),
                Some(MaterializeOutcome::Suppressed) => (user, None),
                None => {
                    let data = state.recommendations.get(&user).await?;
                    (user, data)
                }
            }
        }
    };

    tracing::debug!(
        actor_key = %actor_key,
        found = data.is_some(),
        "Served recommendations"
    );

    Ok(Json(RecommendationsResponse { actor_key, data }))
}
