use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use shotsync_core::db::SqliteScreenshotStore;
use shotsync_core::models::FileId;
use shotsync_core::payload::{LoadResponse, SaveSet, FILES_FIELD, SCREENSHOTS_FIELD};
use shotsync_core::reconcile::to_wire_sets;
use shotsync_core::{Error, Result};
use tracing::{info, warn};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub async fn run_web_server(port: u16, db_path: PathBuf) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port))?;
    serve(listener, db_path).await
}

pub async fn serve(listener: TcpListener, db_path: PathBuf) -> Result<()> {
    SqliteScreenshotStore::open(&db_path)?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    info!(%addr, db = %db_path.display(), "screenshot server listening");

    axum::Server::from_tcp(listener)
        .map_err(|err| Error::InvalidArgument(format!("server error: {err}")))?
        .serve(router(db_path).into_make_service())
        .await
        .map_err(|err| Error::InvalidArgument(format!("server error: {err}")))?;

    Ok(())
}

pub fn router(db_path: PathBuf) -> Router {
    let state = Arc::new(AppState { db_path });
    Router::new()
        .route(
            "/ide/project/:project/test/:test/screenshots/load",
            get(load_handler),
        )
        .route(
            "/ide/project/:project/test/:test/screenshots/save",
            post(save_handler),
        )
        .route(
            "/ide/project/:project/test/:test/screenshots/:file_id/image",
            get(image_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

struct AppState {
    db_path: PathBuf,
}

#[derive(Serialize)]
struct SaveResponse {
    success: bool,
    screenshots: usize,
}

pub fn image_url(project: &str, test: &str, file_id: FileId) -> String {
    format!("/ide/project/{project}/test/{test}/screenshots/{file_id}/image")
}

async fn load_handler(
    State(state): State<Arc<AppState>>,
    Path((project, test)): Path<(String, String)>,
) -> axum::response::Response {
    let db_path = state.db_path.clone();
    let (p, t) = (project.clone(), test.clone());
    let result = tokio::task::spawn_blocking(move || {
        let store = SqliteScreenshotStore::open(&db_path)?;
        store.load_sets(&p, &t)
    })
    .await;

    match result {
        Ok(Ok(sets)) => Json(LoadResponse {
            screenshots: to_wire_sets(&sets, |_, file| image_url(&project, &test, file.id)),
        })
        .into_response(),
        Ok(Err(err)) => error_response(err),
        Err(_) => background_failure(),
    }
}

async fn save_handler(
    State(state): State<Arc<AppState>>,
    Path((project, test)): Path<(String, String)>,
    multipart: Multipart,
) -> axum::response::Response {
    let (request, parts) = match read_save_form(multipart).await {
        Ok(form) => form,
        Err(err) => return error_response(err),
    };

    let db_path = state.db_path.clone();
    let (p, t) = (project.clone(), test.clone());
    let result = tokio::task::spawn_blocking(move || {
        let mut store = SqliteScreenshotStore::open(&db_path)?;
        store.apply_save(&p, &t, &request, &parts)
    })
    .await;

    match result {
        Ok(Ok(sets)) => {
            info!(%project, %test, sets = sets.len(), "screenshots saved");
            Json(SaveResponse {
                success: true,
                screenshots: sets.len(),
            })
            .into_response()
        }
        Ok(Err(err)) => error_response(err),
        Err(_) => background_failure(),
    }
}

async fn image_handler(
    State(state): State<Arc<AppState>>,
    Path((project, test, file_id)): Path<(String, String, FileId)>,
) -> axum::response::Response {
    let db_path = state.db_path.clone();
    let image = tokio::task::spawn_blocking(move || {
        let store = SqliteScreenshotStore::open(&db_path)?;
        store.file_image(&project, &test, file_id)
    })
    .await;

    match image {
        Ok(Ok(Some((content_type, data)))) => {
            ([(header::CONTENT_TYPE, content_type)], data).into_response()
        }
        Ok(Ok(None)) => (StatusCode::NOT_FOUND, "Screenshot not found").into_response(),
        Ok(Err(err)) => error_response(err),
        Err(_) => background_failure(),
    }
}

async fn read_save_form(mut multipart: Multipart) -> Result<(Vec<SaveSet>, Vec<Vec<u8>>)> {
    let mut request: Option<Vec<SaveSet>> = None;
    let mut parts = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            SCREENSHOTS_FIELD => {
                let text = field.text().await.map_err(malformed)?;
                request = Some(serde_json::from_str(&text)?);
            }
            FILES_FIELD => parts.push(field.bytes().await.map_err(malformed)?.to_vec()),
            other => warn!(field = other, "ignoring unexpected form field"),
        }
    }

    let request = request.ok_or_else(|| {
        Error::InvalidArgument(format!("missing {SCREENSHOTS_FIELD} field"))
    })?;
    Ok((request, parts))
}

fn malformed(err: MultipartError) -> Error {
    Error::InvalidArgument(format!("malformed upload: {err}"))
}

fn error_response(err: Error) -> axum::response::Response {
    let status = match err {
        Error::InvalidArgument(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %err, %status, "screenshot request failed");
    (status, err.to_string()).into_response()
}

fn background_failure() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "background task failed",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    use shotsync_core::config::SyncConfig;
    use shotsync_core::http::HttpStore;
    use shotsync_core::model::{ModelEvent, ScreenshotsModel};
    use shotsync_core::models::{Platform, Upload};
    use shotsync_core::payload::SaveFile;
    use shotsync_core::store::ScreenshotStore;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn temp_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screenshots.sqlite");
        (dir, path)
    }

    fn start_server(db_path: PathBuf) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, db_path));
        format!("http://{addr}")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn model_round_trips_through_server() {
        let (_dir, db_path) = temp_db();
        let base_url = start_server(db_path.clone());
        let store = Arc::new(HttpStore::new(base_url, "12"));
        let model = ScreenshotsModel::new("7", store, &SyncConfig::default());
        let aplite = Platform::new("aplite");

        model.load().await;
        assert!(model.has_loaded());
        assert!(model.screenshots().is_empty());

        model
            .add_uploaded_files(
                vec![Upload::from_bytes("a.png", PNG_HEADER.to_vec())],
                None,
                &aplite,
            )
            .await;
        model.set_name(0, "Set 1");
        model.save().await;

        let sets = model.screenshots();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].id, Some(0));
        assert_eq!(sets[0].name, "Set 1");
        let file = sets[0].file(&aplite).unwrap();
        assert_eq!(file.id, Some(0));
        assert!(!file.is_new);
        assert_eq!(file.src, image_url("12", "7", 0));

        let stored = SqliteScreenshotStore::open(&db_path)
            .unwrap()
            .file_image("12", "7", 0)
            .unwrap()
            .unwrap();
        assert_eq!(stored, ("image/png".to_string(), PNG_HEADER.to_vec()));

        model.delete_file(0, &aplite);
        model.save().await;
        assert!(model.screenshots().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reupload_keeps_file_id() {
        let (_dir, db_path) = temp_db();
        let base_url = start_server(db_path.clone());
        let store = Arc::new(HttpStore::new(base_url, "12"));
        let model = ScreenshotsModel::new("9", store, &SyncConfig::default());
        let chalk = Platform::new("chalk");

        model.load().await;
        model
            .add_uploaded_files(vec![Upload::from_bytes("one.png", vec![1])], None, &chalk)
            .await;
        model.save().await;
        model
            .add_uploaded_files(vec![Upload::from_bytes("two.png", vec![2])], Some(0), &chalk)
            .await;
        model.save().await;

        let sets = model.screenshots();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].file(&chalk).unwrap().id, Some(0));
        let (_, data) = SqliteScreenshotStore::open(&db_path)
            .unwrap()
            .file_image("12", "9", 0)
            .unwrap()
            .unwrap();
        assert_eq!(data, vec![2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saving_nothing_clears_the_test() {
        let (_dir, db_path) = temp_db();
        let base_url = start_server(db_path.clone());
        let store = HttpStore::new(base_url, "12");
        let basalt = Platform::new("basalt");
        let set = shotsync_core::ScreenshotSet::new("only").with_file(
            basalt.clone(),
            shotsync_core::ScreenshotFile::pending(Upload::from_bytes("b.png", vec![4]), None),
        );

        store.save("3", &[set]).await.unwrap();
        assert_eq!(store.load("3").await.unwrap().len(), 1);
        assert!(store.load("4").await.unwrap().is_empty());

        store.save("3", &[]).await.unwrap();
        assert!(store.load("3").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_test_loads_empty() {
        let (_dir, db_path) = temp_db();
        let base_url = start_server(db_path.clone());
        let store = HttpStore::new(base_url, "12");
        let model = ScreenshotsModel::new("5", Arc::new(store), &SyncConfig::default());
        let mut rx = model.subscribe();

        model.load().await;

        assert!(matches!(rx.try_recv(), Ok(ModelEvent::Changed(sets)) if sets.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn image_handler_serves_stored_bytes() {
        let (_dir, db_path) = temp_db();
        let request = vec![SaveSet {
            id: None,
            name: "a".to_string(),
            files: [(
                Platform::new("aplite"),
                SaveFile {
                    id: None,
                    upload_id: Some(0),
                },
            )]
            .into_iter()
            .collect(),
        }];
        SqliteScreenshotStore::open(&db_path)
            .unwrap()
            .apply_save("12", "7", &request, &[PNG_HEADER.to_vec()])
            .unwrap();
        let state = Arc::new(AppState {
            db_path: db_path.clone(),
        });

        let found = image_handler(
            State(state.clone()),
            Path(("12".to_string(), "7".to_string(), 0)),
        )
        .await;
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(found.headers()[header::CONTENT_TYPE], "image/png");

        let missing = image_handler(
            State(state.clone()),
            Path(("12".to_string(), "7".to_string(), 99)),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let other_project = image_handler(
            State(state.clone()),
            Path(("999".to_string(), "7".to_string(), 0)),
        )
        .await;
        assert_eq!(other_project.status(), StatusCode::NOT_FOUND);

        let other_test = image_handler(
            State(state),
            Path(("12".to_string(), "other".to_string(), 0)),
        )
        .await;
        assert_eq!(other_test.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_arguments_map_to_bad_request() {
        let response = error_response(Error::InvalidArgument("uploadId 4".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = error_response(Error::Config("broken".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
