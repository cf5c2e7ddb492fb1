//! HTTP-shaped calls: translation to `http` types and a small router.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::future::BoxFuture;
use http::{Method, StatusCode};
use polycode_client::{ApiRequest, ApiResponse, ERR_BAD_REQUEST, Error, RouteData};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::{Url, form_urlencoded};

use crate::context::{ApiContext, WorkflowContext};
use crate::halt::Halt;
use crate::registry::Validate;
use crate::response::decode_value;

pub type HttpRequest = http::Request<Vec<u8>>;
pub type HttpResponse = http::Response<Vec<u8>>;

/// Routes API calls to handlers.
#[async_trait]
pub trait ApiRouter: Send + Sync {
  /// Handle one request. `Err(Halt::Suspended)` suspends the whole call.
  async fn route(&self, ctx: ApiContext, request: HttpRequest) -> Result<HttpResponse, Halt>;

  /// Routes announced to the platform at start-up.
  fn routes(&self) -> Vec<RouteData> {
    Vec::new()
  }
}

/// Build the `http` request for an inbound [`ApiRequest`].
///
/// The path is percent-encoded, query parameters are form-encoded in key
/// order and the body is base64-decoded when flagged.
pub fn to_http_request(req: &ApiRequest) -> Result<HttpRequest, Error> {
  let mut url = Url::parse("http://localhost").map_err(|e| ERR_BAD_REQUEST.wrap(&e))?;
  url.set_path(&req.path);
  let mut uri = url.path().to_string();
  if !req.query.is_empty() {
    let query = form_urlencoded::Serializer::new(String::new())
      .extend_pairs(&req.query)
      .finish();
    uri.push('?');
    uri.push_str(&query);
  }

  let body = if req.is_base64_encoded {
    BASE64
      .decode(req.body.as_bytes())
      .map_err(|e| ERR_BAD_REQUEST.wrap(&e))?
  } else {
    req.body.clone().into_bytes()
  };

  let method = if req.method.is_empty() {
    Method::GET
  } else {
    Method::from_bytes(req.method.to_uppercase().as_bytes()).map_err(|e| ERR_BAD_REQUEST.wrap(&e))?
  };

  let mut builder = http::Request::builder().method(method).uri(uri);
  for (name, value) in &req.header {
    builder = builder.header(name.as_str(), value.as_str());
  }
  builder.body(body).map_err(|e| ERR_BAD_REQUEST.wrap(&e))
}

/// Build the wire [`ApiResponse`] for an `http` response.
///
/// A UTF-8 body is sent as text, anything else base64-encoded. Repeated
/// headers keep their first value.
pub fn from_http_response(res: HttpResponse) -> ApiResponse {
  let mut header = BTreeMap::new();
  for (name, value) in res.headers() {
    if let Ok(value) = value.to_str() {
      header
        .entry(name.as_str().to_string())
        .or_insert_with(|| value.to_string());
    }
  }

  let status_code = res.status().as_u16();
  let (body, is_base64_encoded) = match String::from_utf8(res.into_body()) {
    Ok(text) => (text, false),
    Err(e) => (BASE64.encode(e.into_bytes()), true),
  };

  ApiResponse {
    status_code,
    header,
    body,
    is_base64_encoded,
  }
}

/// JSON response with `status`.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> HttpResponse {
  let bytes = serde_json::to_vec(body).unwrap_or_default();
  let mut res = http::Response::new(bytes);
  *res.status_mut() = status;
  res.headers_mut().insert(
    http::header::CONTENT_TYPE,
    http::HeaderValue::from_static("application/json"),
  );
  res
}

type RouteHandler =
  Arc<dyn Fn(ApiContext, HttpRequest) -> BoxFuture<'static, Result<HttpResponse, Halt>> + Send + Sync>;

/// Exact-match `(method, path)` router.
#[derive(Default, Clone)]
pub struct Routes {
  table: HashMap<(Method, String), RouteHandler>,
}

impl Routes {
  pub fn new() -> Self {
    Self::default()
  }

  /// Route to a handler that sees the raw request.
  pub fn raw<F, Fut>(mut self, method: Method, path: impl Into<String>, handler: F) -> Self
  where
    F: Fn(ApiContext, HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Halt>> + Send + 'static,
  {
    let boxed: RouteHandler = Arc::new(
      move |ctx, req| -> BoxFuture<'static, Result<HttpResponse, Halt>> {
        Box::pin(handler(ctx, req))
      },
    );
    self.table.insert((method, path.into()), boxed);
    self
  }

  /// Route to a typed workflow handler.
  ///
  /// The JSON body is decoded into `I` and validated; a body that fails
  /// either answers 400. A handler failure answers 500, success answers 200
  /// with the JSON output. Suspension passes through.
  pub fn workflow<I, O, F, Fut>(self, method: Method, path: impl Into<String>, handler: F) -> Self
  where
    I: DeserializeOwned + Validate + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, Halt>> + Send + 'static,
  {
    let handler = Arc::new(handler);
    self.raw(method, path, move |ctx: ApiContext, req: HttpRequest| {
      let handler = handler.clone();
      async move {
        let input = match decode_body::<I>(req.body()) {
          Some(input) => input,
          None => {
            return Ok(json_response(
              StatusCode::BAD_REQUEST,
              &json!({"error": "Invalid request"}),
            ));
          }
        };

        match handler(ctx.workflow().clone(), input).await {
          Ok(output) => Ok(json_response(StatusCode::OK, &output)),
          Err(Halt::Failed(err)) if !err.is_in_progress() => Ok(json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({"error": format!("Failed to execute workflow: {}", err)}),
          )),
          Err(_) => Err(Halt::Suspended),
        }
      }
    })
  }

  pub fn list(&self) -> Vec<RouteData> {
    let mut routes: Vec<RouteData> = self
      .table
      .keys()
      .map(|(method, path)| RouteData {
        method: method.to_string(),
        path: path.clone(),
      })
      .collect();
    routes.sort_by(|a, b| (&a.path, &a.method).cmp(&(&b.path, &b.method)));
    routes
  }
}

fn decode_body<I: DeserializeOwned + Validate>(body: &[u8]) -> Option<I> {
  let value = if body.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(body).ok()?
  };
  let input: I = decode_value(value).ok()?;
  input.validate().ok()?;
  Some(input)
}

#[async_trait]
impl ApiRouter for Routes {
  async fn route(&self, ctx: ApiContext, request: HttpRequest) -> Result<HttpResponse, Halt> {
    let key = (request.method().clone(), request.uri().path().to_string());
    match self.table.get(&key) {
      Some(handler) => handler(ctx, request).await,
      None => Ok(json_response(
        StatusCode::NOT_FOUND,
        &json!({"error": "Not found"}),
      )),
    }
  }

  fn routes(&self) -> Vec<RouteData> {
    self.list()
  }
}
