//! Key/value collections persisted by the platform.
//!
//! A [`DataStore`] is scoped to the session's tenant and partition. The
//! unsafe variant built by [`UnsafeDataStoreBuilder`] addresses an explicit
//! tenant and partition instead. Calls go straight to the platform; they are
//! not recorded in call slots, so a workflow replay repeats them.

use polycode_client::{
  DbAction, ERR_BAD_REQUEST, ERR_INTERNAL, Error, PutRequest, QueryRequest, UnsafePutRequest,
  UnsafeQueryRequest,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::context::BaseContext;
use crate::response::decode_value;

/// Items stored in a [`Collection`] are keyed by their id.
pub trait HasId {
  fn id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq)]
enum Scope {
  Session,
  Unsafe {
    tenant_id: String,
    partition_key: String,
  },
}

#[derive(Clone)]
pub struct DataStore {
  base: BaseContext,
  scope: Scope,
}

impl DataStore {
  pub(crate) fn new(base: BaseContext) -> Self {
    Self {
      base,
      scope: Scope::Session,
    }
  }

  pub fn collection(&self, name: impl Into<String>) -> Collection {
    Collection {
      store: self.clone(),
      name: name.into(),
      is_global: false,
    }
  }

  /// A collection shared by every app of the tenant.
  pub fn global_collection(&self, name: impl Into<String>) -> Collection {
    Collection {
      store: self.clone(),
      name: name.into(),
      is_global: true,
    }
  }

  async fn put(&self, req: PutRequest) -> Result<(), Error> {
    self.base.ensure_active()?;
    let session_id = self.base.session_id();
    let client = self.base.client();
    match &self.scope {
      Scope::Session => client.put_item(session_id, &req).await,
      Scope::Unsafe {
        tenant_id,
        partition_key,
      } => {
        let req = UnsafePutRequest {
          tenant_id: tenant_id.clone(),
          partition_key: partition_key.clone(),
          put_request: req,
        };
        client.unsafe_put_item(session_id, &req).await
      }
    }
  }

  async fn get(&self, req: QueryRequest) -> Result<Option<Value>, Error> {
    self.base.ensure_active()?;
    let session_id = self.base.session_id();
    let client = self.base.client();
    match &self.scope {
      Scope::Session => client.get_item(session_id, &req).await,
      Scope::Unsafe {
        tenant_id,
        partition_key,
      } => {
        let req = UnsafeQueryRequest {
          tenant_id: tenant_id.clone(),
          partition_key: partition_key.clone(),
          query_request: req,
        };
        client.unsafe_get_item(session_id, &req).await
      }
    }
  }

  async fn query(&self, req: QueryRequest) -> Result<Vec<Value>, Error> {
    self.base.ensure_active()?;
    let session_id = self.base.session_id();
    let client = self.base.client();
    match &self.scope {
      Scope::Session => client.query_items(session_id, &req).await,
      Scope::Unsafe {
        tenant_id,
        partition_key,
      } => {
        let req = UnsafeQueryRequest {
          tenant_id: tenant_id.clone(),
          partition_key: partition_key.clone(),
          query_request: req,
        };
        client.unsafe_query_items(session_id, &req).await
      }
    }
  }
}

/// Builds a [`DataStore`] over another tenant's partition.
pub struct UnsafeDataStoreBuilder {
  base: BaseContext,
  tenant_id: String,
  partition_key: String,
}

impl UnsafeDataStoreBuilder {
  pub(crate) fn new(base: BaseContext) -> Self {
    Self {
      base,
      tenant_id: String::new(),
      partition_key: String::new(),
    }
  }

  pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
    self.tenant_id = tenant_id.into();
    self
  }

  pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
    self.partition_key = partition_key.into();
    self
  }

  pub fn build(self) -> Result<DataStore, Error> {
    if self.tenant_id.is_empty() || self.partition_key.is_empty() {
      return Err(ERR_BAD_REQUEST.wrap("unsafe data store needs a tenant id and a partition key"));
    }
    Ok(DataStore {
      base: self.base,
      scope: Scope::Unsafe {
        tenant_id: self.tenant_id,
        partition_key: self.partition_key,
      },
    })
  }
}

#[derive(Clone)]
pub struct Collection {
  store: DataStore,
  name: String,
  is_global: bool,
}

impl Collection {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Fails if an item with the same id exists.
  pub async fn insert_one<T: HasId + Serialize>(&self, item: &T) -> Result<(), Error> {
    self.write(DbAction::Insert, item).await
  }

  /// Fails if no item with the same id exists.
  pub async fn update_one<T: HasId + Serialize>(&self, item: &T) -> Result<(), Error> {
    self.write(DbAction::Update, item).await
  }

  pub async fn upsert_one<T: HasId + Serialize>(&self, item: &T) -> Result<(), Error> {
    self.write(DbAction::Upsert, item).await
  }

  pub async fn delete_one(&self, key: &str) -> Result<(), Error> {
    debug!(collection = %self.name, key = %key, "delete item");
    self
      .store
      .put(PutRequest {
        action: DbAction::Delete,
        is_global: self.is_global,
        collection: self.name.clone(),
        key: key.to_string(),
        ..Default::default()
      })
      .await
  }

  /// The item stored under `key`, or `None`.
  pub async fn get_one<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
    let req = QueryRequest {
      key: key.to_string(),
      ..self.request()
    };
    match self.store.get(req).await? {
      Some(item) => decode_value(item).map(Some).map_err(|e| ERR_INTERNAL.wrap(&e)),
      None => Ok(None),
    }
  }

  pub fn query(&self) -> Query {
    Query {
      collection: self.clone(),
      filter: String::new(),
      args: Vec::new(),
      limit: 0,
    }
  }

  async fn write<T: HasId + Serialize>(&self, action: DbAction, item: &T) -> Result<(), Error> {
    let key = item.id();
    if key.is_empty() {
      return Err(ERR_BAD_REQUEST.wrap("item has an empty id"));
    }
    let item = serde_json::to_value(item).map_err(|e| ERR_INTERNAL.wrap(&e))?;
    if !item.is_object() {
      return Err(ERR_BAD_REQUEST.wrap("item must encode as a JSON object"));
    }

    debug!(collection = %self.name, key = %key, action = ?action, "write item");
    self
      .store
      .put(PutRequest {
        action,
        is_global: self.is_global,
        collection: self.name.clone(),
        key: key.to_string(),
        item,
        ttl: 0,
      })
      .await
  }

  fn request(&self) -> QueryRequest {
    QueryRequest {
      is_global: self.is_global,
      collection: self.name.clone(),
      ..Default::default()
    }
  }
}

/// A filtered read over a [`Collection`].
///
/// The filter expression is evaluated by the platform; `args` fill its
/// placeholders in order.
#[derive(Clone)]
pub struct Query {
  collection: Collection,
  filter: String,
  args: Vec<Value>,
  limit: u32,
}

impl Query {
  pub fn filter(mut self, expr: impl Into<String>, args: Vec<Value>) -> Self {
    self.filter = expr.into();
    self.args = args;
    self
  }

  /// Zero leaves the limit to the platform.
  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = limit;
    self
  }

  /// The first matching item, or `None`.
  pub async fn one<T: DeserializeOwned>(&self) -> Result<Option<T>, Error> {
    let items = self.fetch(1).await?;
    match items.into_iter().next() {
      Some(item) => decode_value(item).map(Some).map_err(|e| ERR_INTERNAL.wrap(&e)),
      None => Ok(None),
    }
  }

  pub async fn all<T: DeserializeOwned>(&self) -> Result<Vec<T>, Error> {
    self
      .fetch(self.limit)
      .await?
      .into_iter()
      .map(|item| decode_value(item).map_err(|e| ERR_INTERNAL.wrap(&e)))
      .collect()
  }

  async fn fetch(&self, limit: u32) -> Result<Vec<Value>, Error> {
    let req = QueryRequest {
      filter: self.filter.clone(),
      args: self.args.clone(),
      limit,
      ..self.collection.request()
    };
    self.collection.store.query(req).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::testing::scripted;
  use serde::Deserialize;
  use serde_json::json;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Order {
    id: String,
    qty: u32,
  }

  impl HasId for Order {
    fn id(&self) -> &str {
      &self.id
    }
  }

  fn order(id: &str, qty: u32) -> Order {
    Order {
      id: id.to_string(),
      qty,
    }
  }

  #[tokio::test]
  async fn test_writes_are_keyed_by_id() {
    let (ctx, transport) = scripted(vec![]);
    let orders = DataStore::new(ctx).collection("orders");

    orders.insert_one(&order("o-1", 2)).await.unwrap();
    orders.upsert_one(&order("o-1", 3)).await.unwrap();
    orders.delete_one("o-1").await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].0, polycode_client::paths::DB_PUT);
    assert_eq!(calls[0].1["action"], "insert");
    assert_eq!(calls[0].1["key"], "o-1");
    assert_eq!(calls[0].1["item"], json!({"id": "o-1", "qty": 2}));
    assert_eq!(calls[1].1["action"], "upsert");
    assert_eq!(calls[2].1["action"], "delete");
    assert!(calls[2].1["item"].is_null());
  }

  #[tokio::test]
  async fn test_empty_id_is_rejected() {
    let (ctx, transport) = scripted(vec![]);
    let err = DataStore::new(ctx)
      .collection("orders")
      .update_one(&order("", 1))
      .await
      .unwrap_err();
    assert!(err.is(&ERR_BAD_REQUEST));
    assert!(transport.calls().is_empty());
  }

  #[tokio::test]
  async fn test_get_one() {
    let (ctx, transport) = scripted(vec![Value::Null, json!({"id": "o-2", "qty": 5})]);
    let orders = DataStore::new(ctx).global_collection("orders");

    assert_eq!(orders.get_one::<Order>("o-1").await.unwrap(), None);
    assert_eq!(orders.get_one::<Order>("o-2").await.unwrap(), Some(order("o-2", 5)));

    let calls = transport.calls();
    assert_eq!(calls[0].0, polycode_client::paths::DB_GET);
    assert_eq!(calls[0].1["isGlobal"], true);
    assert_eq!(calls[1].1["key"], "o-2");
  }

  #[tokio::test]
  async fn test_query() {
    let (ctx, transport) = scripted(vec![
      json!([{"id": "o-1", "qty": 2}, {"id": "o-2", "qty": 7}]),
      json!([]),
    ]);
    let query = DataStore::new(ctx)
      .collection("orders")
      .query()
      .filter("qty > :min", vec![json!(1)])
      .limit(10);

    let all: Vec<Order> = query.all().await.unwrap();
    assert_eq!(all, vec![order("o-1", 2), order("o-2", 7)]);
    assert_eq!(query.one::<Order>().await.unwrap(), None);

    let calls = transport.calls();
    assert_eq!(calls[0].0, polycode_client::paths::DB_QUERY);
    assert_eq!(calls[0].1["filter"], "qty > :min");
    assert_eq!(calls[0].1["args"], json!([1]));
    assert_eq!(calls[0].1["limit"], 10);
    assert_eq!(calls[1].1["limit"], 1);
  }

  #[tokio::test]
  async fn test_unsafe_store_addresses_partition() {
    let (ctx, transport) = scripted(vec![json!({"id": "o-9", "qty": 1})]);

    let err = UnsafeDataStoreBuilder::new(ctx.clone())
      .with_tenant_id("t-2")
      .build()
      .err()
      .unwrap();
    assert!(err.is(&ERR_BAD_REQUEST));

    let orders = UnsafeDataStoreBuilder::new(ctx)
      .with_tenant_id("t-2")
      .with_partition_key("p-7")
      .build()
      .unwrap()
      .collection("orders");
    let found: Option<Order> = orders.get_one("o-9").await.unwrap();
    assert_eq!(found, Some(order("o-9", 1)));
    orders.insert_one(&order("o-10", 1)).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].0, polycode_client::paths::DB_UNSAFE_GET);
    assert_eq!(calls[0].1["tenantId"], "t-2");
    assert_eq!(calls[0].1["partitionKey"], "p-7");
    assert_eq!(calls[0].1["queryRequest"]["key"], "o-9");
    assert_eq!(calls[1].0, polycode_client::paths::DB_UNSAFE_PUT);
    assert_eq!(calls[1].1["putRequest"]["key"], "o-10");
  }

  #[tokio::test]
  async fn test_cancelled_session_skips_platform() {
    let (ctx, transport) = scripted(vec![]);
    ctx.cancellation().cancel();
    let err = DataStore::new(ctx)
      .collection("orders")
      .get_one::<Order>("o-1")
      .await
      .unwrap_err();
    assert!(err.is(&polycode_client::ERR_CANCELLED));
    assert!(transport.calls().is_empty());
  }
}
