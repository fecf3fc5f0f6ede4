//! Domain library for the goods catalog.
//!
//! Holds the entity types, typed query parameters, the repository port and
//! error definitions. Keep adapters and IO concerns out of this crate; the
//! only adapter living here is the in-memory one used by tests and demos.

use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A sellable item owned by one organization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Goods {
    pub uuid: String,
    pub org_uuid: String,
    /// Must reference an existing `GoodsCategory`; enforced by the store.
    pub category_uuid: String,
    pub name: String,
    /// Price in minor currency units.
    pub price: i64,
    pub stock: i64,
    pub description: Option<String>,
    pub created_time: SystemTime,
    pub updated_time: SystemTime,
}

impl Goods {
    /// Create a goods row with zero stock and no description.
    pub fn new(
        uuid: impl Into<String>,
        org_uuid: impl Into<String>,
        category_uuid: impl Into<String>,
        name: impl Into<String>,
        price: i64,
        created_time: SystemTime,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            org_uuid: org_uuid.into(),
            category_uuid: category_uuid.into(),
            name: name.into(),
            price,
            stock: 0,
            description: None,
            created_time,
            updated_time: created_time,
        }
    }
}

/// A classification grouping of goods. One category has many goods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoodsCategory {
    pub uuid: String,
    pub org_uuid: String,
    pub name: String,
    pub description: Option<String>,
}

impl GoodsCategory {
    pub fn new(
        uuid: impl Into<String>,
        org_uuid: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            org_uuid: org_uuid.into(),
            name: name.into(),
            description: None,
        }
    }
}

/// Projectable goods attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GoodsField {
    Uuid,
    OrgUuid,
    CategoryUuid,
    Name,
    Price,
    Stock,
    Description,
    CreatedTime,
    UpdatedTime,
}

impl GoodsField {
    pub const ALL: [GoodsField; 9] = [
        GoodsField::Uuid,
        GoodsField::OrgUuid,
        GoodsField::CategoryUuid,
        GoodsField::Name,
        GoodsField::Price,
        GoodsField::Stock,
        GoodsField::Description,
        GoodsField::CreatedTime,
        GoodsField::UpdatedTime,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            GoodsField::Uuid => "uuid",
            GoodsField::OrgUuid => "org_uuid",
            GoodsField::CategoryUuid => "category_uuid",
            GoodsField::Name => "name",
            GoodsField::Price => "price",
            GoodsField::Stock => "stock",
            GoodsField::Description => "description",
            GoodsField::CreatedTime => "created_time",
            GoodsField::UpdatedTime => "updated_time",
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            GoodsField::Uuid => "uuid",
            GoodsField::OrgUuid => "orgUuid",
            GoodsField::CategoryUuid => "categoryUuid",
            GoodsField::Name => "name",
            GoodsField::Price => "price",
            GoodsField::Stock => "stock",
            GoodsField::Description => "description",
            GoodsField::CreatedTime => "createdTime",
            GoodsField::UpdatedTime => "updatedTime",
        }
    }

    /// Accepts either the camelCase wire name or the column name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.wire_name() == s || f.column() == s)
    }
}

/// Projectable category attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CategoryField {
    Uuid,
    OrgUuid,
    Name,
    Description,
}

impl CategoryField {
    pub const ALL: [CategoryField; 4] = [
        CategoryField::Uuid,
        CategoryField::OrgUuid,
        CategoryField::Name,
        CategoryField::Description,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            CategoryField::Uuid => "uuid",
            CategoryField::OrgUuid => "org_uuid",
            CategoryField::Name => "name",
            CategoryField::Description => "description",
        }
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            CategoryField::Uuid => "uuid",
            CategoryField::OrgUuid => "orgUuid",
            CategoryField::Name => "name",
            CategoryField::Description => "description",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.wire_name() == s || f.column() == s)
    }
}

/// Resolve a projection list: `None` or an empty list selects every field.
pub fn goods_projection(attributes: Option<&[GoodsField]>) -> Vec<GoodsField> {
    match attributes {
        Some(fields) if !fields.is_empty() => fields.to_vec(),
        _ => GoodsField::ALL.to_vec(),
    }
}

/// Category counterpart of [`goods_projection`].
pub fn category_projection(attributes: Option<&[CategoryField]>) -> Vec<CategoryField> {
    match attributes {
        Some(fields) if !fields.is_empty() => fields.to_vec(),
        _ => CategoryField::ALL.to_vec(),
    }
}

/// A goods row restricted to the projected attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoodsRecord {
    pub uuid: Option<String>,
    pub org_uuid: Option<String>,
    pub category_uuid: Option<String>,
    pub name: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i64>,
    pub description: Option<String>,
    pub created_time: Option<SystemTime>,
    pub updated_time: Option<SystemTime>,
}

impl GoodsRecord {
    pub fn project(goods: &Goods, fields: &[GoodsField]) -> Self {
        let mut rec = Self::default();
        for field in fields {
            match field {
                GoodsField::Uuid => rec.uuid = Some(goods.uuid.clone()),
                GoodsField::OrgUuid => rec.org_uuid = Some(goods.org_uuid.clone()),
                GoodsField::CategoryUuid => rec.category_uuid = Some(goods.category_uuid.clone()),
                GoodsField::Name => rec.name = Some(goods.name.clone()),
                GoodsField::Price => rec.price = Some(goods.price),
                GoodsField::Stock => rec.stock = Some(goods.stock),
                GoodsField::Description => rec.description = goods.description.clone(),
                GoodsField::CreatedTime => rec.created_time = Some(goods.created_time),
                GoodsField::UpdatedTime => rec.updated_time = Some(goods.updated_time),
            }
        }
        rec
    }
}

/// A category row restricted to the projected attributes, with its goods.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryRecord {
    pub uuid: Option<String>,
    pub org_uuid: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub goods: Vec<GoodsRecord>,
}

impl CategoryRecord {
    pub fn project(category: &GoodsCategory, fields: &[CategoryField]) -> Self {
        let mut rec = Self::default();
        for field in fields {
            match field {
                CategoryField::Uuid => rec.uuid = Some(category.uuid.clone()),
                CategoryField::OrgUuid => rec.org_uuid = Some(category.org_uuid.clone()),
                CategoryField::Name => rec.name = Some(category.name.clone()),
                CategoryField::Description => rec.description = category.description.clone(),
            }
        }
        rec
    }
}

/// Offset/limit pagination. `page` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, page_size: u32) -> Result<Self, CoreError> {
        let p = Self { page, page_size };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.page == 0 {
            return Err(CoreError::InvalidPagination("page must be >= 1".into()));
        }
        if self.page_size == 0 {
            return Err(CoreError::InvalidPagination("page_size must be >= 1".into()));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.page_size)
    }
}

/// Extra equality constraints for [`GoodsQuery`]. Unset fields do not filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GoodsFilter {
    pub category_uuid: Option<String>,
    pub name: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i64>,
}

impl GoodsFilter {
    pub fn matches(&self, goods: &Goods) -> bool {
        self.category_uuid
            .as_ref()
            .map_or(true, |c| *c == goods.category_uuid)
            && self.name.as_ref().map_or(true, |n| *n == goods.name)
            && self.price.map_or(true, |p| p == goods.price)
            && self.stock.map_or(true, |s| s == goods.stock)
    }
}

/// Paginated goods listing scoped to one organization.
#[derive(Clone, Debug, Default)]
pub struct GoodsQuery {
    /// Organization scope; always applied, never overridden by `filter`.
    pub user_uuid: String,
    pub attributes: Option<Vec<GoodsField>>,
    /// `None` falls back to `Pagination::default()`.
    pub pagination: Option<Pagination>,
    pub filter: GoodsFilter,
}

/// Categories of one merchant joined with their goods.
#[derive(Clone, Debug, Default)]
pub struct GoodsWithCategoryQuery {
    pub merchant_uuid: String,
    pub category_attributes: Option<Vec<CategoryField>>,
    pub goods_attributes: Option<Vec<GoodsField>>,
}

/// One page of results plus the total number of matching rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub page: u32,
    pub count: u64,
    pub rows: Vec<T>,
}

/// Read-side repository port for goods.
#[async_trait]
pub trait GoodsRepository: Send + Sync {
    /// Categories whose `org_uuid` equals `merchant_uuid`, each with its goods.
    async fn goods_with_category(
        &self,
        query: &GoodsWithCategoryQuery,
    ) -> Result<Vec<CategoryRecord>, CoreError>;
    /// Number of goods in a category; zero for unknown categories.
    async fn count_by_category(&self, category_uuid: &str) -> Result<u64, CoreError>;
    /// Newest-first page of goods for an organization.
    async fn query(&self, query: &GoodsQuery) -> Result<Page<GoodsRecord>, CoreError>;
    /// Fetch one goods row by primary key. Absence is `Ok(None)`.
    async fn get(&self, uuid: &str) -> Result<Option<Goods>, CoreError>;
    /// Fetch one category by primary key. Absence is `Ok(None)`.
    async fn get_category(&self, uuid: &str) -> Result<Option<GoodsCategory>, CoreError>;
}

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("resource already exists")]
    AlreadyExists,
    #[error("foreign key violation: {0}")]
    ForeignKey(String),
    #[error("repository error: {0}")]
    Repository(String),
}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} - domain library loaded", pkg, ver)
}

pub mod adapters;
pub mod schema;
