//! HTTP front end.
//!
//! Every GET or HEAD request is turned into a transport-independent
//! [`Request`] and answered by the [`ContentGenerator`]. Deferred replies run
//! on the arsenal's worker pool; when the client disconnects the handler
//! future is dropped, which cancels the running task through its sink.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::content::ContentGenerator;
use crate::error::{MapproxyError, Result};
use crate::generator::Reply;
use crate::path::{Request, DISABLE_BROWSER_HEADER};
use crate::sink::{ChannelSink, SinkFileInfo, SinkOutput};

/// Format of the `Last-Modified` header.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Builds the router serving all content.
pub fn router(content: Arc<ContentGenerator>) -> Router {
    Router::new().fallback(handle).with_state(content)
}

/// Serves on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    content: Arc<ContentGenerator>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "HTTP server listening");
    }

    axum::serve(listener, router(content))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn handle(
    State(content): State<Arc<ContentGenerator>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.\n").into_response();
    }
    let head = method == Method::HEAD;
    let request = to_request(&uri, &headers);
    let uri = request.uri();

    let outcome = match dispatch(&content, request).await {
        Ok(Reply::Content { data, info }) => Ok((data, info)),
        Ok(Reply::Redirect(location)) => return redirect(&location),
        Ok(Reply::Deferred(task)) => {
            let cancel = CancellationToken::new();
            // dropped together with this future when the client goes away
            let _guard = cancel.clone().drop_guard();
            let (sink, rx) = ChannelSink::new(cancel);
            content.registry().arsenal().submit(task, Box::new(sink));
            match rx.await {
                Ok(SinkOutput::Content { data, info }) => Ok((data, info)),
                Ok(SinkOutput::Error(e)) => Err(e),
                Err(_) => Err(MapproxyError::internal("task finished without a response")),
            }
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok((data, info)) => {
            tracing::trace!(uri = %uri, bytes = data.len(), "Served");
            content_response(data, &info, head)
        }
        Err(e) => error_response(&uri, e),
    }
}

/// Classification and generator lookup may touch the disk.
async fn dispatch(content: &Arc<ContentGenerator>, request: Request) -> Result<Reply> {
    let content = Arc::clone(content);
    tokio::task::spawn_blocking(move || content.handle(&request))
        .await
        .map_err(|e| MapproxyError::internal(format!("request handler failed: {}", e)))?
}

fn to_request(uri: &Uri, headers: &HeaderMap) -> Request {
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut request = Request::new(target);
    if let Some(value) = headers.get(DISABLE_BROWSER_HEADER).and_then(|v| v.to_str().ok()) {
        request = request.with_header(DISABLE_BROWSER_HEADER, value);
    }
    request
}

fn content_response(data: Bytes, info: &SinkFileInfo, head: bool) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, info.content_type.as_str())
        .header(header::CACHE_CONTROL, info.cache_control())
        .header(header::CONTENT_LENGTH, data.len());
    if let Some(modified) = info.last_modified {
        builder = builder.header(
            header::LAST_MODIFIED,
            modified.format(HTTP_DATE_FORMAT).to_string(),
        );
    }

    let body = if head { Body::empty() } else { Body::from(data) };
    builder
        .body(body)
        .unwrap_or_else(|e| error_response("", MapproxyError::internal(e.to_string())))
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => error_response(location, MapproxyError::not_found("Invalid redirect target.")),
    }
}

fn error_response(uri: &str, error: MapproxyError) -> Response {
    let status =
        StatusCode::from_u16(error.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::warn!(uri = %uri, kind = %error.kind(), error = %error, "Request failed");
    } else {
        tracing::debug!(uri = %uri, kind = %error.kind(), error = %error, "Request failed");
    }

    let mut response = (status, format!("{}\n", error)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
