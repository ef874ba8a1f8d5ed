use crate::state::ApiState;
use crate::ws;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_scalar::{Scalar, Servable};

#[derive(OpenApi)]
struct ApiDoc;

#[allow(unreachable_pub)]
pub fn init(state: ApiState) -> Router {
    let api = ApiDoc::openapi();

    // Separate the OpenAPI routes and the API documentation object
    let (openapi_routes, api_doc) = OpenApiRouter::with_openapi(api)
        .merge(courier_kernel::server::router::system_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone())
        .split_for_parts();

    // Create the Scalar UI routes
    let scalar_routes = Scalar::with_url("/api", api_doc);

    // The tracking channel lives outside the OpenAPI surface: it is a
    // WebSocket upgrade endpoint, addressed as
    // `GET /ws/tracking?token=<jwt>&parcel_id=<id>`.
    let tracking_routes =
        Router::new().route("/ws/tracking", get(ws::tracking_upgrade)).with_state(state);

    // Merge all routes and then apply the state to the final router
    Router::new().merge(openapi_routes).merge(scalar_routes).merge(tracking_routes)
}
