//! Bulkwave Server
//!
//! Production server for the dispatch engine:
//! - Dispatch control: start, stop, test-send
//! - SSE progress stream per job
//! - Gateway acknowledgment webhook
//! - Paginated delivery reports
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BW_API_PORT` | `8080` | HTTP API port |
//! | `BW_DB_PATH` | `bulkwave.db` | SQLite database file |
//! | `BW_GATEWAY_URL` | `http://localhost:3001` | Messaging gateway base URL |
//! | `BW_GATEWAY_TOKEN` | - | Bearer token for the gateway |
//! | `BW_OPERATOR_PHONE` | - | Operator's own number for test sends |
//! | `BW_OPERATOR_NAME` | `Operator` | Name used when rendering test sends |
//! | `BW_SEED_DEMO` | `0` | Seed a demo group and template on startup |
//! | `RUST_LOG` | `info` | Log level |
//! | `LOG_FORMAT` | text | Set to `json` for JSON logs |

use anyhow::Result;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use bw_common::{ContactRecord, MessageTemplate};
use bw_dispatch::api::{self, ApiDoc, AppState};
use bw_dispatch::{
    AckListener, HttpTransport, HttpTransportConfig, OperatorProfile, ProgressBroadcaster,
    ReportService, SendCoordinator, StopRegistry,
};
use bw_store::{SqliteContentStore, SqliteDeliveryStore};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    bw_common::logging::init_logging("bw-server");

    let api_port: u16 = env_or_parse("BW_API_PORT", 8080);
    let db_path = env_or("BW_DB_PATH", "bulkwave.db");
    let gateway_url = env_or("BW_GATEWAY_URL", "http://localhost:3001");
    let operator_phone = env_or("BW_OPERATOR_PHONE", "");

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    info!(db_path = %db_path, "database opened");

    let store = Arc::new(SqliteDeliveryStore::new(pool.clone()));
    store.create_schema().await?;
    let content = Arc::new(SqliteContentStore::new(pool));
    content.create_schema().await?;

    if env_or("BW_SEED_DEMO", "0") == "1" {
        seed_demo_data(&content).await;
    }

    let mut transport_config = HttpTransportConfig::new(gateway_url);
    if let Ok(token) = std::env::var("BW_GATEWAY_TOKEN") {
        transport_config = transport_config.with_auth_token(token);
    }
    let transport = Arc::new(HttpTransport::new(transport_config));

    if operator_phone.is_empty() {
        warn!("BW_OPERATOR_PHONE not set; test sends will fail at the gateway");
    }
    let operator = OperatorProfile {
        phone: operator_phone,
        name: Some(env_or("BW_OPERATOR_NAME", "Operator")),
    };

    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let coordinator = Arc::new(SendCoordinator::new(
        store.clone(),
        content.clone(),
        content.clone(),
        transport,
        broadcaster.clone(),
        Arc::new(StopRegistry::new()),
        operator,
    ));

    let state = AppState {
        coordinator,
        ack_listener: Arc::new(AckListener::new(store.clone())),
        reports: Arc::new(ReportService::new(store)),
        broadcaster,
    };

    let app = Router::new()
        .merge(api::router(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = format!("0.0.0.0:{}", api_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "bw-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("bw-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler");
    }
    info!("shutdown signal received");
}

/// Seed a small demo group and template so the API is usable out of the box
async fn seed_demo_data(content: &SqliteContentStore) {
    let template = MessageTemplate {
        id: "demo-welcome".to_string(),
        title: "Welcome".to_string(),
        body: "@name, your code is @variable1".to_string(),
        image_url: None,
    };
    let contacts = [
        ("demo-c1", "Ana", "5550001", Some("111")),
        ("demo-c2", "Bob", "5550002", Some("222")),
        ("demo-c3", "Cleo", "5550003", None),
    ];

    if let Err(e) = content.insert_group("demo-group", "Demo Group").await {
        warn!(error = %e, "demo seed skipped (already present?)");
        return;
    }
    for (position, (id, name, phone, variable1)) in contacts.iter().enumerate() {
        let contact = ContactRecord {
            contact_id: id.to_string(),
            name: Some(name.to_string()),
            phone: phone.to_string(),
            variable1: variable1.map(str::to_string),
            variable2: None,
            variable3: None,
        };
        if let Err(e) = content
            .insert_contact("demo-group", &contact, position as i64)
            .await
        {
            warn!(error = %e, contact = %id, "demo contact not seeded");
        }
    }
    if let Err(e) = content.insert_template(&template).await {
        warn!(error = %e, "demo template not seeded");
    }
    info!("demo data seeded");
}
