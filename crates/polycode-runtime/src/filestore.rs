//! Files stored by the platform under the session's partition.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use polycode_client::{
  CreateFolderRequest, ERR_INTERNAL, Error, FileKeyRequest, ListFilePageRequest,
  ListFilePageResponse, PutFileRequest, RenameFileRequest,
};
use tracing::debug;

use crate::context::BaseContext;

#[derive(Clone)]
pub struct FileStore {
  base: BaseContext,
}

impl FileStore {
  pub(crate) fn new(base: BaseContext) -> Self {
    Self { base }
  }

  /// Create `name` on the platform and return a handle to it.
  pub async fn new_folder(&self, name: &str) -> Result<Folder, Error> {
    self.base.ensure_active()?;
    let req = CreateFolderRequest {
      folder: name.to_string(),
    };
    self
      .base
      .client()
      .create_folder(self.base.session_id(), &req)
      .await?;
    Ok(self.folder(name))
  }

  /// One page of the files under `path`. Pass the previous page's
  /// `next_continuation_token` to continue.
  pub async fn list(
    &self,
    path: &str,
    limit: i32,
    next_token: Option<String>,
  ) -> Result<ListFilePageResponse, Error> {
    self.base.ensure_active()?;
    let req = ListFilePageRequest {
      prefix: path.to_string(),
      max_keys: limit,
      continuation_token: next_token,
    };
    self.base.client().list_files(self.base.session_id(), &req).await
  }

  /// The content of `path`, or `None` when there is no such file.
  pub async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, Error> {
    self.base.ensure_active()?;
    let res = self
      .base
      .client()
      .get_file(self.base.session_id(), &key(path))
      .await?;
    if res.content.is_empty() {
      return Ok(None);
    }
    BASE64
      .decode(res.content.as_bytes())
      .map(Some)
      .map_err(|e| ERR_INTERNAL.wrap(&format!("file {}: {}", path, e)))
  }

  pub async fn save(&self, path: &str, data: &[u8]) -> Result<(), Error> {
    self.base.ensure_active()?;
    debug!(path = %path, size = data.len(), "save file");
    let req = PutFileRequest {
      key: path.to_string(),
      content: BASE64.encode(data),
    };
    self.base.client().put_file(self.base.session_id(), &req).await
  }

  pub async fn download_link(&self, path: &str) -> Result<String, Error> {
    self.base.ensure_active()?;
    let res = self
      .base
      .client()
      .get_file_download_link(self.base.session_id(), &key(path))
      .await?;
    non_empty_link(res.link)
  }

  pub async fn upload_link(&self, path: &str) -> Result<String, Error> {
    self.base.ensure_active()?;
    let res = self
      .base
      .client()
      .get_file_upload_link(self.base.session_id(), &key(path))
      .await?;
    non_empty_link(res.link)
  }

  pub async fn delete(&self, path: &str) -> Result<(), Error> {
    self.base.ensure_active()?;
    debug!(path = %path, "delete file");
    self
      .base
      .client()
      .delete_file(self.base.session_id(), &key(path))
      .await
  }

  /// Rename `from` to `to`.
  pub async fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
    self.base.ensure_active()?;
    let req = RenameFileRequest {
      old_key: from.to_string(),
      new_key: to.to_string(),
    };
    self.base.client().rename_file(self.base.session_id(), &req).await
  }

  /// A handle to an existing folder. Nothing is created.
  pub fn folder(&self, name: &str) -> Folder {
    Folder {
      store: self.clone(),
      name: name.to_string(),
    }
  }
}

/// Files addressed relative to a folder, as `{folder}/{name}`.
#[derive(Clone)]
pub struct Folder {
  store: FileStore,
  name: String,
}

impl Folder {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
    self.store.get(&self.path(name)).await
  }

  pub async fn save(&self, name: &str, data: &[u8]) -> Result<(), Error> {
    self.store.save(&self.path(name), data).await
  }

  fn path(&self, name: &str) -> String {
    format!("{}/{}", self.name, name)
  }
}

fn key(path: &str) -> FileKeyRequest {
  FileKeyRequest {
    key: path.to_string(),
  }
}

fn non_empty_link(link: String) -> Result<String, Error> {
  if link.is_empty() {
    return Err(ERR_INTERNAL.wrap("platform returned an empty link"));
  }
  Ok(link)
}
