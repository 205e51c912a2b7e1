//! HTTP routes
//!
//! | Method | Path | Auth |
//! |---|---|---|
//! | GET | `/health` | none |
//! | GET | `/api/external` | bearer |
//! | GET | `/customers/{email}` | bearer |
//! | GET | `/customer?email=` | bearer |
//! | POST | `/customers`, `/customer` | bearer |
//! | DELETE | `/customers/{email}` | bearer |
//! | POST | `/authorize` | the event carries its own token |

use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{
    REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokengate_auth::authorizer::log_denial;
use tokengate_auth::tower::{AuthorizerLayer, unauthorized};
use tokengate_auth::{Authorizer, AuthorizerError, AuthorizerRequest, PolicyResponse, Principal};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::store::{CustomerRecord, CustomerStore, PizzaOrder};

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub authorizer: Arc<Authorizer>,
    pub store: Arc<dyn CustomerStore>,
}

impl AppState {
    pub fn new(authorizer: Arc<Authorizer>, store: Arc<dyn CustomerStore>) -> Self {
        Self { authorizer, store }
    }
}

/// Build the application router
///
/// Every response carries the baseline browser security headers.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/external", get(external))
        .route("/customers", post(upsert_customer))
        .route(
            "/customers/{email}",
            get(get_customer_by_path).delete(delete_customer),
        )
        .route("/customer", get(get_customer_by_query).post(upsert_customer))
        .route_layer(AuthorizerLayer::new(Arc::clone(&state.authorizer)));

    Router::new()
        .route("/health", get(health))
        .route("/authorize", post(authorize_event))
        .merge(protected)
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=15552000; includeSubDomains"),
        ))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn external() -> Json<Value> {
    Json(json!({ "msg": "Your access token was successfully validated!" }))
}

async fn get_customer_by_path(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Json<CustomerRecord>> {
    find_customer(&state, &email).await
}

#[derive(Debug, Deserialize)]
struct EmailQuery {
    email: String,
}

async fn get_customer_by_query(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<Json<CustomerRecord>> {
    find_customer(&state, &query.email).await
}

async fn find_customer(state: &AppState, email: &str) -> ApiResult<Json<CustomerRecord>> {
    state
        .store
        .get(email)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(email.to_string()))
}

/// What the order form posts: profile fields plus at most one new order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerSubmission {
    email: String,
    #[serde(default)]
    salutation: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    pizza_order: Option<PizzaOrder>,
    #[serde(default)]
    pizza_orders: Vec<PizzaOrder>,
}

async fn upsert_customer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    submission: Result<Json<CustomerSubmission>, JsonRejection>,
) -> ApiResult<Json<CustomerRecord>> {
    let Json(submission) = submission.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let mut pizza_orders = submission.pizza_orders;
    pizza_orders.extend(submission.pizza_order);

    let record = CustomerRecord {
        email: submission.email,
        sub_id: Some(principal.to_string()),
        salutation: submission.salutation,
        first_name: submission.first_name,
        last_name: submission.last_name,
        phone: submission.phone,
        pizza_orders,
    };

    let stored = state.store.put(record).await?;
    info!(email = %stored.email, %principal, "Customer saved");
    Ok(Json(stored))
}

async fn delete_customer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(email): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete(&email).await? {
        info!(%email, %principal, "Customer deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(email))
    }
}

/// Lambda-style token authorizer endpoint
///
/// A body that is not an authorizer event is denied like any other failure.
async fn authorize_event(
    State(state): State<AppState>,
    event: Result<Json<AuthorizerRequest>, JsonRejection>,
) -> Response {
    let event = match event {
        Ok(Json(event)) => event,
        Err(rejection) => {
            log_denial(
                &AuthorizerError::malformed_request(rejection.body_text()),
                "POST /authorize",
            );
            return unauthorized::<Body>();
        }
    };

    match state.authorizer.authorize(&event).await {
        Ok(decision) => {
            Json(PolicyResponse::from_decision(&decision, &event.resource)).into_response()
        }
        Err(error) => {
            log_denial(&error, &event.resource);
            unauthorized::<Body>()
        }
    }
}
