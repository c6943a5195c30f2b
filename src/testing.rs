//! Shared fixtures for unit and integration tests.

use crate::case::SerializerNaming;
use crate::config::{AttributeConfig, RelationshipConfig, RelationshipKindConfig, ResourceConfig};
use crate::graph::{AttrCapabilities, ClientIdGeneration, RelationshipCapabilities, ResourceGraph, ResourceGraphBuilder};
use crate::query::expressions::FilterExpression;
use crate::query::parsing::FilterParser;
use crate::value::{AttrType, IdType};
use std::sync::Once;

static LOGGING: Once = Once::new();

/// Install a test-writer subscriber once per process. Honors `RUST_LOG`.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("jsonapi_sdk=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn string(name: &str) -> AttributeConfig {
    AttributeConfig::new(name, AttrType::String)
}

fn through(name: &str, target: &str, table: &str, left: &str, right: &str) -> RelationshipConfig {
    RelationshipConfig::new(name, RelationshipKindConfig::HasManyThrough, target).through(table, left, right)
}

fn has_one(name: &str, target: &str, foreign_key: &str) -> RelationshipConfig {
    RelationshipConfig::new(name, RelationshipKindConfig::HasOne, target).foreign_key(foreign_key)
}

fn has_many(name: &str, target: &str, foreign_key: &str) -> RelationshipConfig {
    RelationshipConfig::new(name, RelationshipKindConfig::HasMany, target).foreign_key(foreign_key)
}

/// Declarations behind [`blog_graph`].
pub fn blog_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig::new("blogs")
            .attribute(string("title").required())
            .attribute(string("platform_name"))
            .relationship(has_many("posts", "blogPosts", "blog_id"))
            .relationship(has_one("owner", "webAccounts", "owner_id")),
        ResourceConfig::new("blogPosts")
            .table("blog_posts")
            .attribute(string("caption"))
            .attribute(string("url").capabilities(AttrCapabilities {
                filter: false,
                sort: false,
                ..Default::default()
            }))
            .relationship(has_one("author", "webAccounts", "author_id"))
            .relationship(has_one("reviewer", "webAccounts", "reviewer_id"))
            .relationship(through("labels", "labels", "post_labels", "post_id", "label_id"))
            .relationship(has_many("comments", "comments", "post_id"))
            .relationship(has_one("parent", "blogs", "blog_id")),
        ResourceConfig::new("webAccounts")
            .table("web_accounts")
            .attribute(string("user_name"))
            .attribute(string("display_name"))
            .attribute(string("password").capabilities(AttrCapabilities {
                view: false,
                ..Default::default()
            }))
            .relationship(has_many("posts", "blogPosts", "author_id").inverse("author"))
            .relationship(has_one("preferences", "accountPreferences", "preferences_id").capabilities(
                RelationshipCapabilities {
                    include: false,
                    ..Default::default()
                },
            )),
        ResourceConfig::new("accountPreferences")
            .table("account_preferences")
            .attribute(AttributeConfig::new("use_dark_theme", AttrType::Boolean)),
        ResourceConfig::new("labels")
            .attribute(string("name"))
            .attribute(string("color"))
            .relationship(through("posts", "blogPosts", "post_labels", "label_id", "post_id")),
        ResourceConfig::new("comments")
            .attribute(string("text"))
            .attribute(AttributeConfig::new("created_at", AttrType::DateTime))
            .relationship(has_one("author", "webAccounts", "author_id"))
            .relationship(has_one("parent", "blogPosts", "post_id")),
    ]
}

/// Blogs, posts, accounts, labels and comments with camelCase public names.
pub fn blog_graph() -> ResourceGraph {
    ResourceGraphBuilder::from_config(&blog_resources(), SerializerNaming::CamelCase)
        .build()
        .expect("blog fixture must build")
}

/// Declarations behind [`music_graph`].
pub fn music_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig::new("musicTracks")
            .table("music_tracks")
            .id_type(IdType::Uuid)
            .client_id(ClientIdGeneration::Allowed)
            .attribute(string("title").required())
            .attribute(AttributeConfig::new("length_in_seconds", AttrType::Float).required())
            .attribute(string("genre"))
            .attribute(AttributeConfig::new("released_at", AttrType::DateTime))
            .relationship(has_one("lyric", "lyrics", "lyric_id"))
            .relationship(has_one("owned_by", "recordCompanies", "owned_by_id"))
            .relationship(through("performers", "performers", "track_performers", "track_id", "performer_id"))
            .relationship(through("occurs_in", "playlists", "playlist_tracks", "track_id", "playlist_id")),
        ResourceConfig::new("performers")
            .attribute(string("artist_name"))
            .attribute(AttributeConfig::new("born_at", AttrType::DateTime)),
        ResourceConfig::new("recordCompanies")
            .table("record_companies")
            .attribute(string("name").required())
            .attribute(string("country_of_residence"))
            .relationship(has_many("tracks", "musicTracks", "owned_by_id")),
        ResourceConfig::new("lyrics")
            .attribute(string("format"))
            .attribute(string("text").required())
            .relationship(RelationshipConfig::new("track", RelationshipKindConfig::HasOne, "musicTracks")),
        ResourceConfig::new("playlists")
            .attribute(string("name").required())
            .relationship(through("tracks", "musicTracks", "playlist_tracks", "playlist_id", "track_id")),
    ]
}

/// Tracks, performers, record companies, lyrics and playlists, as used by atomic operation tests.
pub fn music_graph() -> ResourceGraph {
    ResourceGraphBuilder::from_config(&music_resources(), SerializerNaming::CamelCase)
        .build()
        .expect("music fixture must build")
}

/// People owning vehicles, where cars and trucks derive from vehicles.
pub fn vehicle_graph() -> ResourceGraph {
    let resources = vec![
        ResourceConfig::new("people")
            .attribute(string("name"))
            .relationship(has_many("vehicles", "vehicles", "owner_id")),
        ResourceConfig::new("vehicles")
            .attribute(AttributeConfig::new("weight", AttrType::Integer))
            .relationship(has_one("owner", "people", "owner_id")),
        ResourceConfig::new("cars")
            .base("vehicles")
            .attribute(AttributeConfig::new("seat_count", AttrType::Integer)),
        ResourceConfig::new("trucks")
            .base("vehicles")
            .attribute(AttributeConfig::new("load_capacity", AttrType::Integer)),
    ];
    ResourceGraphBuilder::from_config(&resources, SerializerNaming::CamelCase)
        .build()
        .expect("vehicle fixture must build")
}

/// Parse a filter that is known to be valid.
pub fn parse_filter(graph: &ResourceGraph, resource_type: &str, source: &str) -> FilterExpression {
    let rt = graph
        .get_resource_type(resource_type)
        .expect("fixture resource type")
        .clone();
    FilterParser::new(graph)
        .parse("filter", source, &rt)
        .unwrap_or_else(|e| panic!("fixture filter '{}' must parse: {}", source, e))
}
