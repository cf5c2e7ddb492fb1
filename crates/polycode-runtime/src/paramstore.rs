//! Named string parameters (vars and secrets) kept in the data store.
//!
//! Global parameters are keyed by name in a collection shared by every app
//! of the tenant. App parameters are keyed `{group}::{name}` in the app's own
//! collection.

use chrono::{DateTime, Utc};
use polycode_client::{ERR_BAD_REQUEST, Error};
use serde::{Deserialize, Serialize};

use crate::datastore::{Collection, DataStore, HasId};

/// Collection holding parameters, in both the global and the app scope.
pub const PARAM_COLLECTION: &str = "params";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum ParamScope {
  #[default]
  Global,
  App,
}

impl From<ParamScope> for u64 {
  fn from(scope: ParamScope) -> u64 {
    match scope {
      ParamScope::Global => 0,
      ParamScope::App => 1,
    }
  }
}

impl TryFrom<u64> for ParamScope {
  type Error = String;

  fn try_from(value: u64) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(ParamScope::Global),
      1 => Ok(ParamScope::App),
      other => Err(format!("unknown param scope {}", other)),
    }
  }
}

/// A stored parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamRecord {
  pub id: String,
  pub name: String,
  pub value: String,
  pub version: u64,
  pub is_secret: bool,
  #[serde(rename = "type")]
  pub kind: String,
  pub scope: ParamScope,
  pub group: String,
  #[serde(default)]
  pub app: String,
  #[serde(default)]
  pub created_by: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub updated_by: String,
  pub updated_at: DateTime<Utc>,
}

impl HasId for ParamRecord {
  fn id(&self) -> &str {
    &self.id
  }
}

/// A parameter as read from the store. It may not exist yet; [`Param::set`]
/// creates it.
pub struct Param {
  collection: Collection,
  exists: bool,
  record: ParamRecord,
}

impl Param {
  pub fn exists(&self) -> bool {
    self.exists
  }

  pub fn record(&self) -> &ParamRecord {
    &self.record
  }

  pub fn get(&self) -> Result<&str, Error> {
    if !self.exists {
      return Err(ERR_BAD_REQUEST.wrap(&format!("param {} not found", self.record.id)));
    }
    Ok(&self.record.value)
  }

  /// Store `value` as the next version.
  pub async fn set(&mut self, value: impl Into<String>) -> Result<(), Error> {
    let mut record = self.record.clone();
    record.value = value.into();
    record.version += 1;
    record.updated_at = Utc::now();

    self.collection.upsert_one(&record).await?;
    self.record = record;
    self.exists = true;
    Ok(())
  }
}

pub struct ParamStore {
  global: Collection,
  app: Collection,
  app_name: String,
}

impl ParamStore {
  pub(crate) fn new(store: &DataStore, app_name: impl Into<String>) -> Self {
    Self {
      global: store.global_collection(PARAM_COLLECTION),
      app: store.collection(PARAM_COLLECTION),
      app_name: app_name.into(),
    }
  }

  pub async fn global_var(&self, group: &str, name: &str) -> Result<Param, Error> {
    self.load(ParamScope::Global, group, name, false).await
  }

  pub async fn global_secret(&self, group: &str, name: &str) -> Result<Param, Error> {
    self.load(ParamScope::Global, group, name, true).await
  }

  pub async fn app_var(&self, group: &str, name: &str) -> Result<Param, Error> {
    self.load(ParamScope::App, group, name, false).await
  }

  pub async fn app_secret(&self, group: &str, name: &str) -> Result<Param, Error> {
    self.load(ParamScope::App, group, name, true).await
  }

  async fn load(
    &self,
    scope: ParamScope,
    group: &str,
    name: &str,
    secret: bool,
  ) -> Result<Param, Error> {
    let (collection, id, app) = match scope {
      ParamScope::Global => (&self.global, name.to_string(), String::new()),
      ParamScope::App => (&self.app, format!("{}::{}", group, name), self.app_name.clone()),
    };

    match collection.get_one::<ParamRecord>(&id).await? {
      Some(record) => {
        if record.group != group {
          return Err(ERR_BAD_REQUEST.wrap(&format!(
            "param {} belongs to group {}, not {}",
            id, record.group, group
          )));
        }
        if record.is_secret != secret {
          let kind = if record.is_secret { "secret" } else { "var" };
          return Err(ERR_BAD_REQUEST.wrap(&format!("param {} is a {}", id, kind)));
        }
        Ok(Param {
          collection: collection.clone(),
          exists: true,
          record,
        })
      }
      None => {
        let now = Utc::now();
        Ok(Param {
          collection: collection.clone(),
          exists: false,
          record: ParamRecord {
            id,
            name: name.to_string(),
            value: String::new(),
            version: 0,
            is_secret: secret,
            kind: "string".to_string(),
            scope,
            group: group.to_string(),
            app,
            created_by: String::new(),
            created_at: now,
            updated_by: String::new(),
            updated_at: now,
          },
        })
      }
    }
  }
}
