use std::cmp::Ordering;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    category_projection, goods_projection, CategoryRecord, CoreError, Goods, GoodsCategory,
    GoodsQuery, GoodsRecord, GoodsRepository, GoodsWithCategoryQuery, Page,
};

/// Simple in-memory repository for tests. Rows keep insertion order, which
/// stands in for the store's natural row order.
pub struct InMemoryGoodsRepo {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    categories: Vec<GoodsCategory>,
    goods: Vec<Goods>,
}

impl InMemoryGoodsRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tables::default()),
        }
    }

    /// Insert a category. Fails with `AlreadyExists` on a duplicate uuid.
    pub fn insert_category(&self, category: GoodsCategory) -> Result<(), CoreError> {
        let mut t = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        if t.categories.iter().any(|c| c.uuid == category.uuid) {
            return Err(CoreError::AlreadyExists);
        }
        t.categories.push(category);
        Ok(())
    }

    /// Insert a goods row. Its category must already exist.
    pub fn insert_goods(&self, goods: Goods) -> Result<(), CoreError> {
        let mut t = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        if t.goods.iter().any(|g| g.uuid == goods.uuid) {
            return Err(CoreError::AlreadyExists);
        }
        if !t.categories.iter().any(|c| c.uuid == goods.category_uuid) {
            return Err(CoreError::ForeignKey(format!(
                "category {} does not exist",
                goods.category_uuid
            )));
        }
        t.goods.push(goods);
        Ok(())
    }
}

impl Default for InMemoryGoodsRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first; equal timestamps fall back to uuid order.
pub fn newest_first(a: &Goods, b: &Goods) -> Ordering {
    b.created_time
        .cmp(&a.created_time)
        .then_with(|| a.uuid.cmp(&b.uuid))
}

#[async_trait]
impl GoodsRepository for InMemoryGoodsRepo {
    async fn goods_with_category(
        &self,
        query: &GoodsWithCategoryQuery,
    ) -> Result<Vec<CategoryRecord>, CoreError> {
        let t = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let cat_fields = category_projection(query.category_attributes.as_deref());
        let goods_fields = goods_projection(query.goods_attributes.as_deref());
        Ok(t.categories
            .iter()
            .filter(|c| c.org_uuid == query.merchant_uuid)
            .map(|c| {
                let mut rec = CategoryRecord::project(c, &cat_fields);
                rec.goods = t
                    .goods
                    .iter()
                    .filter(|g| g.category_uuid == c.uuid)
                    .map(|g| GoodsRecord::project(g, &goods_fields))
                    .collect();
                rec
            })
            .collect())
    }

    async fn count_by_category(&self, category_uuid: &str) -> Result<u64, CoreError> {
        let t = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        Ok(t.goods
            .iter()
            .filter(|g| g.category_uuid == category_uuid)
            .count() as u64)
    }

    async fn query(&self, query: &GoodsQuery) -> Result<Page<GoodsRecord>, CoreError> {
        let pagination = query.pagination.unwrap_or_default();
        pagination.validate()?;
        let t = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let mut items: Vec<&Goods> = t
            .goods
            .iter()
            .filter(|g| g.org_uuid == query.user_uuid && query.filter.matches(g))
            .collect();
        items.sort_by(|a, b| newest_first(a, b));

        let fields = goods_projection(query.attributes.as_deref());
        let count = items.len() as u64;
        let rows = items
            .into_iter()
            .skip(usize::try_from(pagination.offset()).unwrap_or(usize::MAX))
            .take(pagination.page_size as usize)
            .map(|g| GoodsRecord::project(g, &fields))
            .collect();
        Ok(Page {
            page: pagination.page,
            count,
            rows,
        })
    }

    async fn get(&self, uuid: &str) -> Result<Option<Goods>, CoreError> {
        let t = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        Ok(t.goods.iter().find(|g| g.uuid == uuid).cloned())
    }

    async fn get_category(&self, uuid: &str) -> Result<Option<GoodsCategory>, CoreError> {
        let t = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        Ok(t.categories.iter().find(|c| c.uuid == uuid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CategoryField, GoodsField, GoodsFilter, Pagination};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn seeded() -> InMemoryGoodsRepo {
        let repo = InMemoryGoodsRepo::new();
        repo.insert_category(GoodsCategory::new("c1", "org1", "Drinks")).unwrap();
        repo.insert_category(GoodsCategory::new("c2", "org1", "Snacks")).unwrap();
        repo.insert_category(GoodsCategory::new("c3", "org2", "Other")).unwrap();
        repo.insert_goods(Goods::new("g1", "org1", "c1", "Tea", 300, at(1))).unwrap();
        repo.insert_goods(Goods::new("g2", "org1", "c1", "Coffee", 400, at(2))).unwrap();
        repo.insert_goods(Goods::new("g3", "org1", "c2", "Chips", 250, at(3))).unwrap();
        repo.insert_goods(Goods::new("g4", "org2", "c3", "Soap", 100, at(4))).unwrap();
        repo
    }

    #[test]
    fn insert_goods_requires_category() {
        let repo = InMemoryGoodsRepo::new();
        let err = repo
            .insert_goods(Goods::new("g1", "org1", "nope", "Tea", 1, at(0)))
            .unwrap_err();
        assert!(matches!(err, CoreError::ForeignKey(_)));
    }

    #[test]
    fn insert_rejects_duplicate() {
        let repo = seeded();
        let err = repo
            .insert_category(GoodsCategory::new("c1", "org1", "Again"))
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn query_pages_newest_first() {
        let repo = seeded();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: 1, page_size: 2 }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.count, 3);
        let uuids: Vec<_> = page.rows.iter().map(|r| r.uuid.clone().unwrap()).collect();
        assert_eq!(uuids, vec!["g3", "g2"]);

        let page2 = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: 2, page_size: 2 }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page2.count, 3);
        assert_eq!(page2.rows.len(), 1);
        assert_eq!(page2.rows[0].uuid.as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn query_applies_filter_within_org() {
        let repo = seeded();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                attributes: Some(vec![GoodsField::Name]),
                filter: GoodsFilter {
                    category_uuid: Some("c1".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.rows[0].name.as_deref(), Some("Coffee"));
        assert!(page.rows[0].uuid.is_none());

        // A category of another org yields nothing for org1
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                filter: GoodsFilter {
                    category_uuid: Some("c3".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 0);
        assert!(page.rows.is_empty());
    }

    #[tokio::test]
    async fn query_rejects_zero_page_size() {
        let repo = seeded();
        let err = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: 1, page_size: 0 }),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPagination(_)));
    }

    #[tokio::test]
    async fn goods_with_category_groups_by_category() {
        let repo = seeded();
        let cats = repo
            .goods_with_category(&GoodsWithCategoryQuery {
                merchant_uuid: "org1".into(),
                category_attributes: Some(vec![CategoryField::Uuid, CategoryField::Name]),
                goods_attributes: Some(vec![GoodsField::Uuid, GoodsField::CategoryUuid]),
            })
            .await
            .unwrap();
        assert_eq!(cats.len(), 2);
        for cat in &cats {
            assert!(cat.org_uuid.is_none());
            for g in &cat.goods {
                assert_eq!(g.category_uuid, cat.uuid);
            }
        }
        assert_eq!(cats[0].goods.len(), 2);
        assert_eq!(cats[1].goods.len(), 1);
    }

    #[tokio::test]
    async fn count_and_get() {
        let repo = seeded();
        assert_eq!(repo.count_by_category("c1").await.unwrap(), 2);
        assert_eq!(repo.count_by_category("missing").await.unwrap(), 0);
        assert_eq!(repo.get("g4").await.unwrap().unwrap().name, "Soap");
        assert!(repo.get("missing").await.unwrap().is_none());
        assert_eq!(repo.get_category("c3").await.unwrap().unwrap().org_uuid, "org2");
        assert!(repo.get_category("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn equal_created_time_orders_by_uuid() {
        let repo = InMemoryGoodsRepo::new();
        repo.insert_category(GoodsCategory::new("c1", "org1", "Drinks")).unwrap();
        // Inserted out of uuid order on purpose
        repo.insert_goods(Goods::new("gb", "org1", "c1", "Tea", 1, at(7))).unwrap();
        repo.insert_goods(Goods::new("ga", "org1", "c1", "Coffee", 1, at(7))).unwrap();
        repo.insert_goods(Goods::new("gc", "org1", "c1", "Juice", 1, at(8))).unwrap();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let uuids: Vec<_> = page.rows.iter().map(|r| r.uuid.clone().unwrap()).collect();
        assert_eq!(uuids, vec!["gc", "ga", "gb"]);
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty() {
        let repo = seeded();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: u32::MAX, page_size: u32::MAX }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 3);
        assert!(page.rows.is_empty());
    }
}
