//! api-server — HTTP API over the goods repository.
//!
//! Exposes the read-side goods endpoints for request handlers and admin
//! frontends:
//! - Organization scope: every request carries `X-Org-Uuid`; authentication
//!   happens upstream.
//! - Storage: In-memory or SQLite (file) when the `sqlite` feature is enabled.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string).
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p api-server
//!
//! # empty in-memory storage: the API is read-only, so this only serves
//! # smoke tests of routing, headers and error mapping
//! STORAGE_PROVIDER=memory cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.
//!

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use domain::adapters::memory_repo::InMemoryGoodsRepo;
use domain::{
    CategoryField, CategoryRecord, CoreError, Goods, GoodsCategory, GoodsField, GoodsFilter,
    GoodsQuery, GoodsRecord, GoodsRepository, GoodsWithCategoryQuery, Page, Pagination,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ORG_HEADER: &str = "x-org-uuid";

// Local repo abstraction supporting memory or sqlite (feature-gated).
enum RepoKind {
    Memory(InMemoryGoodsRepo),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteGoodsRepo),
}

#[derive(Clone)]
struct AnyRepo {
    kind: Arc<RepoKind>,
}

impl AnyRepo {
    fn memory(repo: InMemoryGoodsRepo) -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory(repo)),
        }
    }

    #[cfg(feature = "sqlite")]
    fn sqlite(cfg: &config::Config) -> Result<Self, CoreError> {
        let store = match &cfg.db_path {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                sqlite_adapter::SqliteStore::open(path)?
            }
            None => sqlite_adapter::SqliteStore::from_env()?,
        };
        Ok(Self {
            kind: Arc::new(RepoKind::Sqlite(sqlite_adapter::SqliteGoodsRepo::new(store)?)),
        })
    }

    async fn goods_with_category(
        &self,
        query: &GoodsWithCategoryQuery,
    ) -> Result<Vec<CategoryRecord>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.goods_with_category(query).await,
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.goods_with_category(query).await,
        }
    }

    async fn count_by_category(&self, category_uuid: &str) -> Result<u64, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.count_by_category(category_uuid).await,
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.count_by_category(category_uuid).await,
        }
    }

    async fn query(&self, query: &GoodsQuery) -> Result<Page<GoodsRecord>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.query(query).await,
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.query(query).await,
        }
    }

    async fn get(&self, uuid: &str) -> Result<Option<Goods>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.get(uuid).await,
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.get(uuid).await,
        }
    }

    async fn get_category(&self, uuid: &str) -> Result<Option<GoodsCategory>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.get_category(uuid).await,
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.get_category(uuid).await,
        }
    }
}

#[derive(Clone)]
struct AppState {
    repo: AnyRepo,
    default_page_size: u32,
    max_page_size: u32,
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_ephemeral();
    info!("{}", domain::about());

    let repo = match build_repo(&cfg) {
        Ok(r) => r,
        Err(e) => {
            error!(err = %e, "failed to initialize goods repository");
            std::process::exit(1);
        }
    };
    let state = AppState {
        repo,
        default_page_size: cfg.default_page_size,
        max_page_size: cfg.max_page_size,
    };

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = routes()
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .with_state(state);

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin]))
            .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static(ORG_HEADER),
            ])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "api-server listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(err = %e, %addr, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = %e, "server error");
    }
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/goods", get(list_goods))
        .route("/api/goods/:uuid", get(get_goods))
        .route("/api/categories", get(list_categories))
        .route("/api/categories/:uuid/goods/count", get(count_category_goods))
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct a repository instance based on config and feature flags.
// The memory store starts empty and nothing over HTTP can fill it.
fn build_repo(cfg: &config::Config) -> Result<AnyRepo, CoreError> {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => AnyRepo::sqlite(cfg),
        _ => Ok(AnyRepo::memory(InMemoryGoodsRepo::new())),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GoodsOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stock: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_time: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CategoryOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    goods: Vec<GoodsOut>,
}

#[derive(Serialize)]
struct PageOut {
    page: u32,
    count: u64,
    rows: Vec<GoodsOut>,
}

#[derive(Serialize)]
struct CountOut {
    count: u64,
}

fn record_to_out(rec: GoodsRecord) -> GoodsOut {
    GoodsOut {
        uuid: rec.uuid,
        org_uuid: rec.org_uuid,
        category_uuid: rec.category_uuid,
        name: rec.name,
        price: rec.price,
        stock: rec.stock,
        description: rec.description,
        created_time: rec.created_time.map(http_common::system_time_to_rfc3339),
        updated_time: rec.updated_time.map(http_common::system_time_to_rfc3339),
    }
}

fn goods_to_out(goods: Goods) -> GoodsOut {
    GoodsOut {
        uuid: Some(goods.uuid),
        org_uuid: Some(goods.org_uuid),
        category_uuid: Some(goods.category_uuid),
        name: Some(goods.name),
        price: Some(goods.price),
        stock: Some(goods.stock),
        description: goods.description,
        created_time: Some(http_common::system_time_to_rfc3339(goods.created_time)),
        updated_time: Some(http_common::system_time_to_rfc3339(goods.updated_time)),
    }
}

fn category_to_out(rec: CategoryRecord) -> CategoryOut {
    CategoryOut {
        uuid: rec.uuid,
        org_uuid: rec.org_uuid,
        name: rec.name,
        description: rec.description,
        goods: rec.goods.into_iter().map(record_to_out).collect(),
    }
}

fn bad_request(code: &str, message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(http_common::json_error_with_message(code, message)),
    )
        .into_response()
}

fn core_error_response(e: CoreError, what: &str) -> Response {
    match e {
        CoreError::InvalidPagination(msg) => bad_request("invalid_pagination", &msg),
        CoreError::InvalidField(msg) => bad_request("invalid_field", &msg),
        other => {
            error!(err = ?other, "{what} error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(http_common::json_error_with_message(
                    "internal",
                    "server error",
                )),
            )
                .into_response()
        }
    }
}

/// Organization scope of the request, or a 401 response.
fn org_scope(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(ORG_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(http_common::json_err("unauthorized")),
            )
                .into_response()
        })
}

fn parse_fields<T>(raw: Option<&str>, parse: fn(&str) -> Option<T>) -> Result<Option<Vec<T>>, CoreError> {
    let fields = http_common::parse_list(raw, parse)
        .map_err(|bad| CoreError::InvalidField(format!("unknown field '{bad}'")))?;
    Ok(if fields.is_empty() { None } else { Some(fields) })
}

#[derive(Deserialize)]
struct ListGoodsQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    fields: Option<String>,
    category_uuid: Option<String>,
    name: Option<String>,
    price: Option<i64>,
    stock: Option<i64>,
}

async fn list_goods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListGoodsQuery>,
) -> Response {
    let org = match org_scope(&headers) {
        Ok(org) => org,
        Err(resp) => return resp,
    };

    let page_size = q.page_size.unwrap_or(state.default_page_size);
    if page_size > state.max_page_size {
        return bad_request(
            "invalid_pagination",
            &format!("page_size must be at most {}", state.max_page_size),
        );
    }
    let attributes = match parse_fields(q.fields.as_deref(), GoodsField::parse) {
        Ok(a) => a,
        Err(e) => return core_error_response(e, "list goods"),
    };

    let query = GoodsQuery {
        user_uuid: org,
        attributes,
        pagination: Some(Pagination {
            page: q.page.unwrap_or(1),
            page_size,
        }),
        filter: GoodsFilter {
            category_uuid: q.category_uuid,
            name: q.name,
            price: q.price,
            stock: q.stock,
        },
    };

    match state.repo.query(&query).await {
        Ok(page) => {
            info!(page = page.page, count = page.count, "list goods ok");
            (
                StatusCode::OK,
                Json(PageOut {
                    page: page.page,
                    count: page.count,
                    rows: page.rows.into_iter().map(record_to_out).collect(),
                }),
            )
                .into_response()
        }
        Err(e) => core_error_response(e, "list goods"),
    }
}

async fn get_goods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
) -> Response {
    let org = match org_scope(&headers) {
        Ok(org) => org,
        Err(resp) => return resp,
    };

    match state.repo.get(&uuid).await {
        // Rows of other organizations are reported as absent
        Ok(Some(goods)) if goods.org_uuid == org => {
            (StatusCode::OK, Json(goods_to_out(goods))).into_response()
        }
        Ok(_) => (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response(),
        Err(e) => core_error_response(e, "get goods"),
    }
}

#[derive(Deserialize)]
struct ListCategoriesQuery {
    fields: Option<String>,
    goods_fields: Option<String>,
}

async fn list_categories(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListCategoriesQuery>,
) -> Response {
    let org = match org_scope(&headers) {
        Ok(org) => org,
        Err(resp) => return resp,
    };

    let parsed = parse_fields(q.fields.as_deref(), CategoryField::parse).and_then(|cats| {
        parse_fields(q.goods_fields.as_deref(), GoodsField::parse).map(|goods| (cats, goods))
    });
    let (category_attributes, goods_attributes) = match parsed {
        Ok(p) => p,
        Err(e) => return core_error_response(e, "list categories"),
    };

    let query = GoodsWithCategoryQuery {
        merchant_uuid: org,
        category_attributes,
        goods_attributes,
    };
    match state.repo.goods_with_category(&query).await {
        Ok(cats) => {
            let out: Vec<CategoryOut> = cats.into_iter().map(category_to_out).collect();
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => core_error_response(e, "list categories"),
    }
}

async fn count_category_goods(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(uuid): Path<String>,
) -> Response {
    let org = match org_scope(&headers) {
        Ok(org) => org,
        Err(resp) => return resp,
    };

    // Categories of other organizations are reported as absent
    match state.repo.get_category(&uuid).await {
        Ok(Some(category)) if category.org_uuid == org => {}
        Ok(_) => {
            return (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response()
        }
        Err(e) => return core_error_response(e, "count goods"),
    }

    match state.repo.count_by_category(&uuid).await {
        Ok(count) => (StatusCode::OK, Json(CountOut { count })).into_response(),
        Err(e) => core_error_response(e, "count goods"),
    }
}
