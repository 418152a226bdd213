//! HTTP surface: `/api/analyze`, `/api/download` and the front-end fallback.

use std::path::{Component, Path, PathBuf};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::{
    error::RelayError,
    extractor::Extractor,
    metadata::VideoMetadata,
    relay::{self, DownloadRequest, content_disposition},
};

const INDEX_FILE: &str = "index.html";

#[derive(Clone)]
pub struct AppState {
    extractor: Extractor,
}

impl AppState {
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct AnalyzeQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    url: Option<String>,
    itag: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/api/analyze", get(analyze))
        .route("/api/download", get(download))
        .fallback(get(serve_frontend))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn analyze(
    State(state): State<AppState>,
    query: Result<Query<AnalyzeQuery>, QueryRejection>,
) -> ApiResult<Json<VideoMetadata>> {
    let Query(query) = query.map_err(reject_query)?;
    info!(url = ?query.url, "analyze request");
    let metadata = state
        .extractor
        .analyze(query.url.as_deref())
        .await
        .map_err(|err| {
            error!(url = ?query.url, error = %err, "analysis failed");
            ApiError::from(err)
        })?;
    Ok(Json(metadata))
}

async fn download(
    State(state): State<AppState>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query.map_err(reject_query)?;
    info!(
        url = ?query.url,
        itag = ?query.itag,
        kind = ?query.kind,
        "download request"
    );
    let request = DownloadRequest::new(
        query.url.as_deref(),
        query.itag.as_deref(),
        query.kind.as_deref(),
        query.title.as_deref(),
    )
    .map_err(|err| {
        warn!(url = ?query.url, error = %err, "rejected download request");
        ApiError::from(err)
    })?;

    let stream = relay::open_stream(&state.extractor, &request)
        .await
        .map_err(|err| {
            error!(url = %request.url, itag = ?request.itag, error = %err, "download failed");
            ApiError::from(err)
        })?;

    let filename = request.filename();
    let mime = MimeGuess::from_path(&filename).first_or_octet_stream();
    let disposition = HeaderValue::from_str(&content_disposition(&filename))
        .map_err(|err| ApiError::internal(format!("invalid filename header: {err}")))?;

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

fn reject_query(rejection: QueryRejection) -> ApiError {
    warn!(error = %rejection.body_text(), "rejected query string");
    ApiError::from(rejection)
}

/// Serves the built front end. Unknown paths get `index.html` so client-side
/// routes survive a reload.
async fn serve_frontend(State(state): State<AppState>, uri: Uri) -> ApiResult<Response> {
    let root = &state.extractor.config().www_root;
    let asset = match static_path(root, uri.path()) {
        Some(path) if is_file(&path).await => path,
        _ => root.join(INDEX_FILE),
    };
    stream_file(asset).await
}

/// Maps a request path onto `root`, refusing anything that would leave it.
fn static_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut path = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(segment) => path.push(segment),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let guessed = MimeGuess::from_path(&path).first();
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let mut response = body.into_response();
    if let Some(mime) = guessed
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::stub_config;
    use axum::{body::to_bytes, http::Request};
    use std::{path::Path as StdPath, time::Duration};
    use tempfile::tempdir;
    use tower::ServiceExt;

    const VIDEO_URL: &str = "https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Dabc";

    fn app(dir: &StdPath, body: &str) -> Router {
        router(AppState::new(Extractor::new(stub_config(dir, body))))
    }

    async fn send(app: Router, uri: &str) -> Response {
        app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn missing_url_is_a_bad_request_without_spawning() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let body = format!("touch '{}'\nexit 0\n", marker.display());

        for uri in ["/api/analyze", "/api/download?itag=22", "/api/analyze?url="] {
            let response = send(app(dir.path(), &body), uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            let json = json_body(response).await;
            assert!(!json["error"].as_str().unwrap().is_empty());
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn malformed_query_is_a_json_bad_request() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let body = format!("touch '{}'\nexit 0\n", marker.display());

        for uri in ["/api/analyze?url=a&url=b", "/api/download?url=a&url=b"] {
            let response = send(app(dir.path(), &body), uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert!(header_str(&response, header::CONTENT_TYPE).starts_with("application/json"));
            let json = json_body(response).await;
            assert!(json["error"].as_str().unwrap().contains("url"), "{json}");
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn analyze_returns_metadata() {
        let dir = tempdir().unwrap();
        let body = r#"cat <<'JSON'
{"id": "abc", "title": "Sample", "uploader": "Channel", "view_count": 950,
 "duration": 45, "thumbnail": "https://img/abc.jpg",
 "formats": [{"format_id": "18", "format_note": "360p", "ext": "mp4",
              "vcodec": "avc1", "acodec": "mp4a", "filesize": 10}]}
JSON
"#;
        let response = send(app(dir.path(), body), &format!("/api/analyze?url={VIDEO_URL}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["id"], "abc");
        assert_eq!(json["url"], "https://www.youtube.com/watch?v=abc");
        assert_eq!(json["views"], "950");
        assert_eq!(json["duration"], "0:45");
        assert_eq!(json["summary"], "Ready to download");
        assert_eq!(json["formats"][0]["itag"], 18);
    }

    #[tokio::test]
    async fn extractor_failure_is_a_server_error() {
        let dir = tempdir().unwrap();
        let response = send(
            app(dir.path(), "echo 'ERROR: Unsupported URL' >&2\nexit 1\n"),
            &format!("/api/analyze?url={VIDEO_URL}"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "ERROR: Unsupported URL");
    }

    #[tokio::test]
    async fn slow_extractor_times_out() {
        let dir = tempdir().unwrap();
        let stub = stub_config(dir.path(), "exec sleep 30\n");
        let mut config = (*stub).clone();
        config.analyze_timeout = Duration::from_millis(300);
        let app = router(AppState::new(Extractor::new(std::sync::Arc::new(config))));

        let response = send(app, &format!("/api/analyze?url={VIDEO_URL}")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert!(json["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn download_streams_attachment() {
        let dir = tempdir().unwrap();
        // Echo the arguments back as the "media" so the invocation is visible.
        let response = send(
            app(dir.path(), "printf '%s\\n' \"$@\"\n"),
            &format!("/api/download?url={VIDEO_URL}&type=audio&title=Foo%3A%20Bar%3F!%202024"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_str(&response, header::CONTENT_DISPOSITION),
            "attachment; filename=\"Foo_Bar_2024.mp3\""
        );
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "audio/mpeg");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let args: Vec<&str> = std::str::from_utf8(&bytes).unwrap().lines().collect();
        assert_eq!(args[0], "https://www.youtube.com/watch?v=abc");
        assert_eq!(&args[1..3], ["-o", "-"]);
        assert_eq!(
            &args[args.len() - 5..],
            ["-f", "bestaudio", "-x", "--audio-format", "mp3"]
        );
    }

    #[tokio::test]
    async fn download_failure_before_output_is_json() {
        let dir = tempdir().unwrap();
        let response = send(
            app(dir.path(), "echo 'ERROR: Requested format is not available' >&2\nexit 1\n"),
            &format!("/api/download?url={VIDEO_URL}&itag=999"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "Download failed");
    }

    #[tokio::test]
    async fn fallback_serves_assets_and_index() {
        let dir = tempdir().unwrap();
        let www = dir.path().join("dist");
        std::fs::create_dir_all(www.join("assets")).unwrap();
        std::fs::write(www.join(INDEX_FILE), "<html>app</html>").unwrap();
        std::fs::write(www.join("assets/app.js"), "console.log(1)").unwrap();

        let response = send(app(dir.path(), "exit 0\n"), "/assets/app.js").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header_str(&response, header::CONTENT_TYPE).contains("javascript"));

        let response = send(app(dir.path(), "exit 0\n"), "/watch/abc").await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<html>app</html>");

        let response = send(app(dir.path(), "exit 0\n"), "/../Cargo.toml").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header_str(&response, header::CONTENT_TYPE).contains("html"));
    }

    #[tokio::test]
    async fn fallback_only_answers_get() {
        let dir = tempdir().unwrap();
        let www = dir.path().join("dist");
        std::fs::create_dir_all(&www).unwrap();
        std::fs::write(www.join(INDEX_FILE), "<html>app</html>").unwrap();

        let request = Request::post("/watch/abc").body(Body::empty()).unwrap();
        let response = app(dir.path(), "exit 0\n").oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn fallback_without_build_is_not_found() {
        let dir = tempdir().unwrap();
        let response = send(app(dir.path(), "exit 0\n"), "/").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn static_path_refuses_parent_components() {
        let root = StdPath::new("/srv/www");
        assert_eq!(
            static_path(root, "/assets/app.js"),
            Some(PathBuf::from("/srv/www/assets/app.js"))
        );
        assert_eq!(static_path(root, "/a/../../etc/passwd"), None);
    }
}
