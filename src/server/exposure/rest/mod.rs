//! REST API exposure
//!
//! Thin HTTP handlers over [`EntityGateway`]: they extract the credential
//! header, the raw id segment, the `expand` query parameter and the raw body,
//! and map results to status codes. All decisions are made by the gateway.
//!
//! The REST exposure consumes a `ServerHost` and produces an Axum `Router`.

use super::super::host::ServerHost;
use crate::core::entity::Entity;
use crate::core::error::GatewayError;
use crate::server::gateway::EntityGateway;
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// Returns a router with:
    /// - health check routes (`/health`, `/healthz`)
    /// - entity CRUD routes under the configured base path
    pub fn build_router(host: Arc<ServerHost>) -> Router {
        let entity_routes = host.entity_registry.build_routes(&host.context);
        let base_path = host.context.base_path.as_str();

        let api = if base_path == "/" {
            entity_routes
        } else {
            Router::new().nest(base_path, entity_routes)
        };

        let app = Self::health_routes().merge(api).layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http().make_span_with(
                |request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        id = %Uuid::new_v4(),
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                },
            )),
        );

        if host.config.server.permissive_cors {
            app.layer(CorsLayer::permissive())
        } else {
            app
        }
    }

    /// Build health check routes
    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    /// Health check endpoint handler
    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "entity-gateway"
        }))
    }
}

/// CRUD routes of one entity type, relative to the base path
pub fn entity_routes<T: Entity>(gateway: EntityGateway<T>) -> Router {
    let collection = format!("/{}", T::resource_name());
    let member = format!("/{}/{{id}}", T::resource_name());

    Router::new()
        .route(
            &collection,
            get(list_entities::<T>)
                .post(create_entities::<T>)
                .patch(update_without_id::<T>)
                .delete(delete_without_id::<T>),
        )
        .route(
            &member,
            get(get_entity::<T>)
                .patch(update_entity::<T>)
                .delete(delete_entity::<T>),
        )
        .with_state(gateway)
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    /// Comma-separated expansion names
    expand: Option<String>,
}

impl ListParams {
    fn expansions(&self) -> Vec<String> {
        self.expand
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn credential<'h, T: Entity>(gateway: &EntityGateway<T>, headers: &'h HeaderMap) -> Option<&'h str> {
    headers
        .get(gateway.context().credentials.header())
        .and_then(|value| value.to_str().ok())
}

fn failure<T: Entity>(gateway: &EntityGateway<T>, error: GatewayError) -> Response {
    error
        .with_policy(gateway.context().status_policy)
        .into_response()
}

async fn read<T: Entity>(
    gateway: &EntityGateway<T>,
    headers: &HeaderMap,
    id: Option<&str>,
    params: &ListParams,
) -> Response {
    let credential = credential(gateway, headers);
    let expand = params.expansions();

    let result = if expand.is_empty() {
        gateway
            .list(credential, id)
            .await
            .map(|items| Json(items).into_response())
    } else {
        gateway
            .list_expanded(credential, id, &expand)
            .await
            .map(|items| Json(items).into_response())
    };

    result.unwrap_or_else(|e| failure(gateway, e))
}

async fn list_entities<T: Entity>(
    State(gateway): State<EntityGateway<T>>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response {
    read(&gateway, &headers, None, &params).await
}

async fn get_entity<T: Entity>(
    State(gateway): State<EntityGateway<T>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Response {
    read(&gateway, &headers, Some(&id), &params).await
}

async fn create_entities<T: Entity>(
    State(gateway): State<EntityGateway<T>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match gateway.create(credential(&gateway, &headers), &body).await {
        Ok(created) => (
            StatusCode::CREATED,
            [(header::LOCATION, created.location)],
            Json(created.items),
        )
            .into_response(),
        Err(e) => failure(&gateway, e),
    }
}

async fn update_entity<T: Entity>(
    State(gateway): State<EntityGateway<T>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match gateway
        .update(credential(&gateway, &headers), Some(&id), &body)
        .await
    {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => failure(&gateway, e),
    }
}

async fn update_without_id<T: Entity>(
    State(gateway): State<EntityGateway<T>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match gateway
        .update(credential(&gateway, &headers), None, &body)
        .await
    {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => failure(&gateway, e),
    }
}

async fn delete_entity<T: Entity>(
    State(gateway): State<EntityGateway<T>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    match gateway
        .delete(credential(&gateway, &headers), Some(&id))
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => failure(&gateway, e),
    }
}

async fn delete_without_id<T: Entity>(
    State(gateway): State<EntityGateway<T>>,
    headers: HeaderMap,
) -> Response {
    match gateway.delete(credential(&gateway, &headers), None).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => failure(&gateway, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_parameter_parsing() {
        let params = ListParams {
            expand: Some(" job_results, ,job ".to_string()),
        };
        assert_eq!(params.expansions(), vec!["job_results", "job"]);
        assert!(ListParams::default().expansions().is_empty());
    }
}
