//! The HTTP client driven against the development server

use std::sync::Arc;
use std::time::Duration;

use onemedi_client::RestBackend;
use onemedi_core::config::CoreConfig;
use onemedi_core::identity::FixedIdentity;
use onemedi_core::models::{Change, Medicine, NewCartItem};
use onemedi_core::{MemoryBackend, QueryDescriptor, RemoteBackend, RemoteError, RowId, TableClient};
use onemedi_devserver::{create_router, AppState};
use onemedi_state::CartService;
use serde_json::{json, Map, Value};

const API_KEY: &str = "local-anon-key";

struct TestServer {
    store: Arc<MemoryBackend>,
    url: String,
}

async fn start_server() -> TestServer {
    let store = Arc::new(MemoryBackend::new());
    store
        .seed_json(json!({
            "medicines": [
                {"id": "med-1", "name": "Paracetamol 500mg", "price": 25.0, "category": "fever"},
                {"id": "med-2", "name": "Cetirizine 10mg", "price": 40.0, "category": "allergy"},
                {"id": "med-3", "name": "Pantoprazole 40mg", "price": 95.0, "category": "gastro"}
            ]
        }))
        .unwrap();
    store.register_function("echo", |payload| Ok(json!({ "echo": payload })));

    let state = Arc::new(AppState {
        backend: store.clone(),
        api_key: Some(API_KEY.to_string()),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    TestServer {
        store,
        url: format!("http://{}", addr),
    }
}

fn client(url: &str, api_key: &str) -> RestBackend {
    let mut config = CoreConfig::testing();
    config.backend.url = url.to_string();
    config.backend.api_key = api_key.to_string();
    RestBackend::from_config(&config).unwrap()
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn crud_round_trip_over_http() {
    let server = start_server().await;
    let backend = client(&server.url, API_KEY);

    let created = backend
        .insert("orders", fields(json!({"user_id": "u-1", "status": "pending", "total_amount": 135.0})))
        .await
        .unwrap();
    assert_eq!(created.get_str("status"), Some("pending"));
    assert_eq!(server.store.rows("orders").len(), 1);

    let updated = backend
        .update("orders", &created.id, fields(json!({"status": "confirmed"})))
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.get_str("status"), Some("confirmed"));
    assert_eq!(updated.get_f64("total_amount"), Some(135.0));

    backend.delete("orders", &created.id).await.unwrap();
    assert!(server.store.rows("orders").is_empty());

    assert!(matches!(
        backend.delete("orders", &created.id).await,
        Err(RemoteError::NotFound { .. })
    ));
    assert!(matches!(
        backend
            .update("orders", &RowId::new("missing"), fields(json!({"status": "x"})))
            .await,
        Err(RemoteError::NotFound { .. })
    ));
}

#[tokio::test]
async fn descriptors_select_the_same_rows_remotely() {
    let server = start_server().await;
    let backend = client(&server.url, API_KEY);

    let query = QueryDescriptor::new("medicines")
        .filter_in("category", vec!["fever", "gastro"])
        .order_by("price", onemedi_core::Direction::Desc);
    let ids: Vec<String> = backend
        .select(&query)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.id.to_string())
        .collect();
    assert_eq!(ids, vec!["med-3", "med-1"]);

    let found = backend
        .select(&QueryDescriptor::new("medicines").search("CETIRIZINE", vec!["name"]))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id.as_str(), "med-2");

    let page = backend
        .select(&QueryDescriptor::new("medicines").order_by("price", onemedi_core::Direction::Asc).limit(1).offset(1))
        .await
        .unwrap();
    assert_eq!(page[0].id.as_str(), "med-2");
}

#[tokio::test]
async fn catalog_search_decodes_typed_rows() {
    let server = start_server().await;
    let medicines = TableClient::typed::<Medicine>(Arc::new(client(&server.url, API_KEY)));

    let found = medicines.search("mg", vec!["name"]).await.unwrap();
    assert_eq!(found.len(), 3);

    let found = medicines.search("panto", vec!["name", "category"]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Pantoprazole 40mg");
    assert_eq!(found[0].effective_price(), 95.0);

    // A blank query lists the whole catalog
    assert_eq!(medicines.search("  ", vec!["name"]).await.unwrap().len(), 3);
}

#[tokio::test]
async fn client_config_file_drives_the_backend() {
    let server = start_server().await;
    let mut config = CoreConfig::development();
    config.backend.url = server.url.clone();
    config.backend.api_key = API_KEY.to_string();

    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();
    config.to_file(path).unwrap();

    let backend = RestBackend::from_config(&CoreConfig::from_file(path).unwrap()).unwrap();
    let rows = backend.select(&QueryDescriptor::new("medicines")).await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn wrong_api_key_is_refused() {
    let server = start_server().await;
    let backend = client(&server.url, "stolen-key");

    let err = backend.select(&QueryDescriptor::new("medicines")).await.unwrap_err();
    assert_eq!(
        err,
        RemoteError::Rejected {
            status: Some(401),
            message: "Invalid API key".to_string(),
        }
    );
}

#[tokio::test]
async fn functions_are_invoked() {
    let server = start_server().await;
    let backend = client(&server.url, API_KEY);

    let reply = backend.invoke("echo", json!({"pincode": "500001"})).await.unwrap();
    assert_eq!(reply, json!({"echo": {"pincode": "500001"}}));

    assert!(backend.invoke("no-such-function", json!({})).await.is_err());
}

#[tokio::test]
async fn change_feed_streams_writes() {
    let server = start_server().await;
    let backend = client(&server.url, API_KEY);

    let mut feed = backend.subscribe("orders").await.unwrap();
    // Wait until the server side of the feed is attached
    for _ in 0..200 {
        if server.store.subscriber_count("orders") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    server
        .store
        .insert("orders", fields(json!({"user_id": "u-1", "status": "pending"})))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), feed.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.table, "orders");
    assert!(matches!(event.change, Change::Insert { .. }));

    drop(feed);
}

#[tokio::test]
async fn cart_merges_lines_over_http() {
    let server = start_server().await;
    let backend: Arc<RestBackend> = Arc::new(client(&server.url, API_KEY));
    let cart = CartService::new(backend, Arc::new(FixedIdentity::user("u-1")));

    cart.add_item(NewCartItem::medicine("med-1", 45.0)).await.unwrap();
    let merged = cart
        .add_item(NewCartItem::medicine("med-1", 45.0).with_quantity(2))
        .await
        .unwrap();

    assert_eq!(merged.quantity, 3);
    assert_eq!(merged.total_price, 135.0);
    assert_eq!(server.store.rows("cart_items").len(), 1);
}
