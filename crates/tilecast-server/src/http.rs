use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::DropGuard;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tilecast_core::RequestContext;
use tilecast_tools::ToolKind;
use tilecast_types::StreamEvent;
use tilecast_wire::event_json;

use crate::AppState;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tilecast listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await?;
    Ok(())
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/stream_chat", post(stream_chat))
        .route("/weather/{city}", get(weather))
        .route("/stocks/{ticker}", get(stock))
        .route("/pokemon/{name}", get(pokemon))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let info = state.relay.provider_info();
    Json(json!({
        "healthy": true,
        "version": env!("CARGO_PKG_VERSION"),
        "provider": info.id,
        "model": info.model,
        "data_source": state.config.data_source.as_str(),
    }))
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
    message: String,
}

async fn stream_chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let ctx = RequestContext::new();
    tracing::info!(request_id = %ctx.request_id, "stream_chat accepted");
    let guard = ctx.cancel.clone().drop_guard();
    let rx = state.relay.spawn(ctx, query.message);
    Sse::new(event_stream(rx, guard)).keep_alive(KeepAlive::new().interval(Duration::from_secs(10)))
}

/// The guard rides along with the body; when the client goes away the body
/// is dropped and the request is cancelled.
fn event_stream(
    rx: mpsc::Receiver<StreamEvent>,
    guard: DropGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(move |event| {
        let _ = &guard;
        Ok(Event::default().data(event_json(&event)))
    })
}

async fn weather(State(state): State<AppState>, Path(city): Path<String>) -> impl IntoResponse {
    Json(state.registry().fetch_direct(ToolKind::CurrentWeather, &city).await)
}

async fn stock(State(state): State<AppState>, Path(ticker): Path<String>) -> impl IntoResponse {
    Json(state.registry().fetch_direct(ToolKind::StockPrice, &ticker).await)
}

async fn pokemon(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    Json(state.registry().fetch_direct(ToolKind::PokemonInfo, &name).await)
}
