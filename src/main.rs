use std::sync::Arc;

use axum::http::Method;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use restkit::dispatch::{fn_handler, router, Endpoint, RouteConfig};
use restkit::response::{Envelope, Reply};
use restkit::schema::TypedSchema;
use restkit::store::{repository, MemoryStore, Query, Sort, SortOrder};

#[derive(Debug, Deserialize, Serialize)]
struct Note {
    title: String,
    #[serde(default)]
    body: String,
}

fn note_schema_document() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string", "minLength": 1},
            "body": {"type": "string"}
        },
        "required": ["title"],
        "additionalProperties": false
    })
}

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up APP_SECRET and friends.
    let _ = dotenvy::dotenv();

    let config = restkit::config::config();

    tracing_subscriber::fmt::init();
    tracing::info!("starting restkit demo in {:?} mode", config.environment);

    let app = app().expect("endpoint configuration");

    let port = std::env::var("RESTKIT_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {}", bind_addr, e));

    println!("restkit demo server listening on http://{}", bind_addr);

    axum::serve(listener, app).await.expect("server");
}

/// A small notes endpoint over the in-memory store: enough to exercise the
/// whole pipeline end to end.
fn app() -> anyhow::Result<Router> {
    let store = Arc::new(MemoryStore::new());

    let notes_post = {
        let store = Arc::clone(&store);
        fn_handler(move |cx| {
            let store = Arc::clone(&store);
            async move {
                let coll = store.collection("notes");
                let query = repository::build_query(&["title"], &cx.payload)?;
                let stored = repository::insert_or_conflict(
                    coll.as_ref(),
                    "a note with this title already exists",
                    cx.payload.clone(),
                    &query,
                    &cx.api_version,
                )
                .await?;
                Ok(Some(Reply::ok(Envelope::raw(
                    "note stored",
                    Value::Object(stored),
                ))))
            }
        })
    };

    let notes_get = {
        let store = Arc::clone(&store);
        fn_handler(move |_cx| {
            let store = Arc::clone(&store);
            async move {
                let coll = store.collection("notes");
                let sort: Sort = vec![("created_at".to_string(), SortOrder::Asc)];
                let notes =
                    repository::find_all(coll.as_ref(), &Query::empty(), None, Some(&sort)).await?;
                Ok(Some(Reply::ok(Envelope::raw(
                    format!("{} notes", notes.len()),
                    Value::Array(notes.into_iter().map(Value::Object).collect()),
                ))))
            }
        })
    };

    let endpoint = Endpoint::builder("notes")
        .route(
            "v1",
            Method::POST,
            RouteConfig::validated(TypedSchema::<Note>::new(
                "NoteSchema",
                note_schema_document(),
            )?),
            notes_post,
        )
        .route("v1", Method::GET, RouteConfig::open(), notes_get)
        .build()?;

    Ok(router(Arc::new(endpoint), "/notes")
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}
