//! Demo server: loads resource declarations from `CONFIG_PATH`, seeds an in-memory store and
//! serves the JSON:API routes.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Then e.g. `curl 'http://127.0.0.1:3000/api/blogPosts?include=labels&sort=-caption'`

use jsonapi_sdk::store::{RelationshipTargets, ResourceData};
use jsonapi_sdk::{
    common_routes, jsonapi_routes, load_from_path, AppState, InMemoryStore, JsonApiContext, JsonApiService,
    ResourceDefinitionRegistry, ResourceKey, ResourceStore, ScalarValue,
};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn seed(context: &JsonApiContext, store: &InMemoryStore) -> Result<(), jsonapi_sdk::AppError> {
    let graph = &context.graph;
    let blogs = graph.get_resource_type("blogs")?;
    let posts = graph.get_resource_type("blogPosts")?;
    let labels = graph.get_resource_type("labels")?;

    let mut tx = store.begin().await?;
    let mut blog = ResourceData::default();
    blog.attributes.insert("title".into(), ScalarValue::from("Engineering"));
    let blog = tx.create(blogs, &blog).await?;

    let mut label_keys = Vec::new();
    for (name, color) in [("rust", "red"), ("databases", "blue")] {
        let mut label = ResourceData::default();
        label.attributes.insert("name".into(), ScalarValue::from(name));
        label.attributes.insert("color".into(), ScalarValue::from(color));
        label_keys.push(tx.create(labels, &label).await?);
    }

    for (i, caption) in ["Zero-copy parsing", "Query layers", "Atomic batches"].into_iter().enumerate() {
        let mut post = ResourceData::default();
        post.attributes.insert("caption".into(), ScalarValue::from(caption));
        post.relationships
            .insert("parent".into(), RelationshipTargets::ToOne(Some(blog.clone())));
        let tagged: Vec<ResourceKey> = label_keys.iter().take(i % 2 + 1).cloned().collect();
        post.relationships.insert("labels".into(), RelationshipTargets::ToMany(tagged));
        tx.create(posts, &post).await?;
    }
    tx.commit().await?;
    tracing::info!("seeded demo data");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("jsonapi_sdk=info,example_consumer=info")),
        )
        .init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "example_consumer/config/config.json".into());
    let config = load_from_path(&config_path)?;
    let context = JsonApiContext::from_config(&config, ResourceDefinitionRegistry::new())?;
    let store = InMemoryStore::new(context.graph.clone());
    seed(&context, &store).await?;

    let state = AppState::new(JsonApiService::new(context, Arc::new(store)));
    let app = common_routes().merge(jsonapi_routes(state));
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
