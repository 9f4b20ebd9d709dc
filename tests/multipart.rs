//! Multipart uploads over the spill threshold land on disk and are gone
//! once the request is done.

use std::path::PathBuf;
use std::sync::Arc;

use apiary::{Api, Backend, Chain, Error, FileData, Options, Req, Response, Router, StatusCode};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;

const BOUNDARY: &str = "X-APIARY-BOUNDARY";

fn multipart_body(caption: &str, file: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"caption\"\r\n\r\n{caption}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"cat.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload(uri: &str, body: Vec<u8>) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn router(options: Options, seen: Arc<Mutex<Vec<PathBuf>>>) -> Router {
    let mut api = Api::new(options);
    api.register("POST", "/photos/{id}", Chain::new(), move |req: Req| {
        let seen = Arc::clone(&seen);
        async move {
            let photo = &req.params.files["photo"][0];
            for file in req.params.files.values().flatten() {
                if let FileData::Disk(path) = &file.data {
                    assert!(path.exists());
                    seen.lock().push(path.clone());
                }
            }
            let bytes = photo.bytes().unwrap();
            Response::text(format!(
                "{}:{}:{}:{}",
                req.param("id").unwrap_or_default(),
                req.params.get("caption"),
                bytes.len(),
                photo.is_spilled()
            ))
        }
    })
    .unwrap();
    let mut router = Router::new();
    api.activate(Backend::Native(&mut router)).unwrap();
    router
}

#[tokio::test]
async fn large_parts_spill_and_are_removed_after_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let router = router(
        Options::new().max_memory(64).temp_dir(dir.path()),
        Arc::clone(&seen),
    );

    let file = vec![b'x'; 4096];
    let res = router.handle(upload("/photos/9", multipart_body("a,b", &file))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"9:a:4096:true");

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with(dir.path()));
    assert!(!seen[0].exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn small_parts_stay_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let router = router(Options::new().temp_dir(dir.path()), Arc::clone(&seen));

    let res = router.handle(upload("/photos/1", multipart_body("sunny", b"tiny"))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"1:sunny:4:false");
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn malformed_multipart_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let router = router(
        Options::new().max_memory(8).temp_dir(dir.path()),
        Arc::new(Mutex::new(Vec::new())),
    );

    let mut body = multipart_body("x", &[b'y'; 512]);
    // Drop the closing delimiter.
    body.truncate(body.len() - 40);
    let res = router.handle(upload("/photos/1", body)).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

fn spilling_api(dir: &std::path::Path) -> Api {
    Api::new(Options::new().max_memory(64).temp_dir(dir))
}

fn activate(api: Api) -> Router {
    let mut router = Router::new();
    api.activate(Backend::Native(&mut router)).unwrap();
    router
}

#[tokio::test]
async fn spill_files_go_when_the_handler_panics() {
    let dir = tempfile::tempdir().unwrap();
    let mut api = spilling_api(dir.path());
    api.register("POST", "/photos", Chain::new(), |req: Req| async move {
        if req.params.files["photo"][0].is_spilled() {
            panic!("photo rejected");
        }
        "kept in memory"
    })
    .unwrap();
    let router = activate(api);

    let res = router.handle(upload("/photos", multipart_body("x", &[b'z'; 2048]))).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn spill_files_go_when_a_middleware_panics() {
    let dir = tempfile::tempdir().unwrap();
    let mut api = spilling_api(dir.path());
    let inspect = |req: &mut Req| -> Result<(), Error> {
        if !req.params.spill().is_empty() {
            panic!("scanner crashed");
        }
        Ok(())
    };
    api.register("POST", "/photos", Chain::new().with(inspect), |_req: Req| async { "stored" })
        .unwrap();
    let router = activate(api);

    let res = router.handle(upload("/photos", multipart_body("x", &[b'z'; 2048]))).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
