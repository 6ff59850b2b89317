use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use serde_json::Value;

use customvision_host::error::{VisionError, VisionResult};
use customvision_host::handlers::AppState;
use customvision_host::inference::Predictor;
use customvision_host::models::{BoundingBox, Prediction};
use customvision_host::routes;

const LIMIT: usize = 4 * 1024 * 1024;

/// Reports the decoded image size as its tag so tests can see what arrived.
#[derive(Default)]
struct EchoPredictor {
    calls: AtomicUsize,
}

impl Predictor for EchoPredictor {
    fn predict(&self, image: &DynamicImage) -> VisionResult<Vec<Prediction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Prediction {
            probability: 0.875,
            tag_id: 0,
            tag_name: format!("{}x{}", image.width(), image.height()),
            bounding_box: Some(BoundingBox {
                left: 0.25,
                top: 0.25,
                width: 0.5,
                height: 0.5,
            }),
        }])
    }
}

struct FailingPredictor;

impl Predictor for FailingPredictor {
    fn predict(&self, _image: &DynamicImage) -> VisionResult<Vec<Prediction>> {
        Err(VisionError::Inference("graph exploded".into()))
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buf, ImageOutputFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn multipart_body(boundary: &str, field: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{f}\"; filename=\"upload.png\"\r\nContent-Type: image/png\r\n\r\n",
            b = boundary,
            f = field
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

macro_rules! app {
    ($predictor:expr) => {
        test::init_service(
            App::new().configure(routes::init(web::Data::new(AppState::new($predictor, LIMIT)))),
        )
        .await
    };
}

#[actix_rt::test]
async fn index_is_a_health_check() {
    let app = app!(Arc::new(EchoPredictor::default()));
    let req = test::TestRequest::get().uri("/").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, "CustomVision.ai model host harness");
}

#[actix_rt::test]
async fn raw_image_body_is_predicted() {
    let predictor = Arc::new(EchoPredictor::default());
    let app = app!(predictor.clone());

    let req = test::TestRequest::post()
        .uri("/image")
        .insert_header(("content-type", "application/octet-stream"))
        .set_payload(png(64, 48))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["predictions"][0]["tagName"], "64x48");
    assert_eq!(body["predictions"][0]["boundingBox"]["width"], 0.5);
    assert_eq!(body["project"], "");
    assert_eq!(body["iteration"], "");
    assert!(body["id"].as_str().map_or(false, |id| !id.is_empty()));
    assert!(body["created"].is_string());
    assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);
}

#[actix_rt::test]
async fn every_alias_predicts_the_same() {
    let app = app!(Arc::new(EchoPredictor::default()));
    let image = png(32, 32);

    let mut seen = Vec::new();
    for uri in [
        "/image",
        "/proj-1/image",
        "/proj-1/image/nostore",
        "/proj-1/classify/iterations/x/image",
        "/proj-1/classify/iterations/x/image/nostore",
        "/proj-1/detect/iterations/Iteration3/image",
        "/proj-1/detect/iterations/Iteration3/image/nostore",
    ] {
        let req = test::TestRequest::post()
            .uri(uri)
            .set_payload(image.clone())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
        let body: Value = test::read_body_json(resp).await;
        seen.push(body["predictions"].clone());
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
}

#[actix_rt::test]
async fn multipart_upload_uses_image_data_field() {
    let app = app!(Arc::new(EchoPredictor::default()));

    let req = test::TestRequest::post()
        .uri("/proj/image")
        .insert_header((
            "content-type",
            "multipart/form-data; boundary=----cvboundary",
        ))
        .set_payload(multipart_body("----cvboundary", "imageData", &png(20, 10)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["predictions"][0]["tagName"], "20x10");
}

#[actix_rt::test]
async fn multipart_without_image_data_fails() {
    let predictor = Arc::new(EchoPredictor::default());
    let app = app!(predictor.clone());

    let req = test::TestRequest::post()
        .uri("/image")
        .insert_header(("content-type", "multipart/form-data; boundary=xyz"))
        .set_payload(multipart_body("xyz", "somethingElse", &png(8, 8)))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(predictor.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn unreadable_image_is_a_500_with_message() {
    let predictor = Arc::new(EchoPredictor::default());
    let app = app!(predictor.clone());

    let req = test::TestRequest::post()
        .uri("/image")
        .set_payload(&b"definitely not a jpeg"[..])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let msg: String = test::read_body_json(resp).await;
    assert!(msg.starts_with("[ERROR] Exception in score"), "{}", msg);
    assert!(msg.contains("decode"), "{}", msg);
    assert_eq!(predictor.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn oversized_body_never_reaches_the_model() {
    let predictor = Arc::new(EchoPredictor::default());
    let app = app!(predictor.clone());

    let req = test::TestRequest::post()
        .uri("/image")
        .set_payload(vec![0u8; LIMIT + 1])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(predictor.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn inference_failure_is_a_500() {
    let app = app!(Arc::new(FailingPredictor));

    let req = test::TestRequest::post()
        .uri("/image")
        .set_payload(png(16, 16))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let msg: String = test::read_body_json(resp).await;
    assert!(msg.contains("graph exploded"), "{}", msg);
}

#[actix_rt::test]
async fn unreachable_url_is_a_500() {
    let predictor = Arc::new(EchoPredictor::default());
    let app = app!(predictor.clone());

    for uri in ["/url", "/proj/detect/iterations/x/url/nostore"] {
        let req = test::TestRequest::post()
            .uri(uri)
            .set_json(serde_json::json!({ "url": "http://127.0.0.1:9/cat.jpg" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR, "{}", uri);
    }
    assert_eq!(predictor.calls.load(Ordering::SeqCst), 0);
}

#[actix_rt::test]
async fn url_body_must_be_json_with_url() {
    let app = app!(Arc::new(EchoPredictor::default()));

    let req = test::TestRequest::post()
        .uri("/url")
        .set_payload(&b"{\"link\": \"http://example.com/a.jpg\"}"[..])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let msg: String = test::read_body_json(resp).await;
    assert!(msg.contains("url"), "{}", msg);
}

#[actix_rt::test]
async fn get_on_prediction_routes_is_not_allowed() {
    let app = app!(Arc::new(EchoPredictor::default()));
    let req = test::TestRequest::get().uri("/image").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
}
