use std::net::TcpListener;

use claims::assert_matches;
use claims::assert_none;
use claims::assert_some;
use subscriber_import::upload_client::UploadError;
use wiremock::matchers::any;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::destination;
use crate::helpers::init_tracing;
use crate::helpers::records;
use crate::helpers::secs;
use crate::helpers::uploader_for;
use crate::helpers::Mode;
use crate::helpers::Progress;
use crate::helpers::RecordingSleep;
use crate::helpers::TestUploader;

/// Respond with each status once, in order, then 201 forever
async fn respond_in_sequence(
    app: &TestUploader,
    statuses: &[u16],
) {
    for &status in statuses {
        Mock::given(any())
            .respond_with(ResponseTemplate::new(status).set_body_string("try again"))
            .up_to_n_times(1)
            .mount(&app.server)
            .await;
    }
    Mock::given(any())
        .respond_with(ResponseTemplate::new(201))
        .mount(&app.server)
        .await;
}

#[tokio::test]
async fn uploads_in_batches() {
    let app = TestUploader::spawn(Mode::Rest, 500, 6).await;
    Mock::given(path("/rest/v1/newsletter_subscribers"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(3)
        .mount(&app.server)
        .await;

    let mut progress = Progress::default();
    let report = app.uploader.upload(&records(1200), progress.record()).await;

    assert!(report.is_success());
    assert_eq!(report.uploaded, 1200);
    assert_eq!(app.batch_sizes().await, [500, 500, 200]);
    assert_eq!(
        progress.tuples(),
        [(1, 500, 1200), (2, 1000, 1200), (3, 1200, 1200)]
    );
    assert!(app.sleep.delays().is_empty());
}

#[tokio::test]
async fn batches_preserve_order() {
    let app = TestUploader::spawn(Mode::Rest, 2, 6).await;
    respond_in_sequence(&app, &[]).await;

    let report = app.uploader.upload(&records(5), |_| {}).await;
    assert!(report.is_success());

    let emails: Vec<String> = app
        .received()
        .await
        .iter()
        .flat_map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            body.as_array()
                .unwrap()
                .iter()
                .map(|row| row["email"].as_str().unwrap().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    let expected: Vec<String> = (0..5).map(|i| format!("user{i}@foo.com")).collect();
    assert_eq!(emails, expected);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let app = TestUploader::spawn(Mode::Rest, 500, 6).await;
    respond_in_sequence(&app, &[429]).await;

    let report = app.uploader.upload(&records(3), |_| {}).await;

    assert!(report.is_success());
    assert_eq!(report.uploaded, 3);
    assert_eq!(app.received().await.len(), 2);
    assert_eq!(app.sleep.delays(), secs(&[1.5]));
}

#[tokio::test]
async fn backoff_grows_between_retries() {
    let app = TestUploader::spawn(Mode::Rest, 500, 6).await;
    respond_in_sequence(&app, &[503, 500, 502, 504]).await;

    let report = app.uploader.upload(&records(3), |_| {}).await;

    assert!(report.is_success());
    assert_eq!(app.received().await.len(), 5);
    assert_eq!(app.sleep.delays(), secs(&[1.5, 2.5, 4.5, 8.5]));
}

#[tokio::test]
async fn conflict_is_retried() {
    let app = TestUploader::spawn(Mode::Rest, 500, 6).await;
    respond_in_sequence(&app, &[409, 408, 425]).await;

    let report = app.uploader.upload(&records(1), |_| {}).await;

    assert!(report.is_success());
    assert_eq!(app.received().await.len(), 4);
}

#[tokio::test]
async fn non_retryable_error_fails_immediately() {
    let app = TestUploader::spawn(Mode::Rest, 500, 6).await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid input syntax"))
        .expect(1)
        .mount(&app.server)
        .await;

    let mut progress = Progress::default();
    let report = app.uploader.upload(&records(3), progress.record()).await;

    assert_eq!(report.uploaded, 0);
    let failure = assert_some!(report.failure);
    assert_eq!(failure.batch_number, 1);
    assert_eq!(failure.error.to_string(), "HTTP 400: invalid input syntax");
    assert!(progress.0.is_empty());
    assert!(app.sleep.delays().is_empty());
}

#[tokio::test]
async fn retries_are_bounded() {
    let app = TestUploader::spawn(Mode::Rest, 500, 3).await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(4)
        .mount(&app.server)
        .await;

    let report = app.uploader.upload(&records(3), |_| {}).await;

    let failure = assert_some!(report.failure);
    assert_eq!(failure.error.to_string(), "HTTP 503: unavailable");
    assert_eq!(app.sleep.delays(), secs(&[1.5, 2.5, 4.5]));
}

#[tokio::test]
async fn zero_retries_means_one_attempt() {
    let app = TestUploader::spawn(Mode::Rest, 500, 0).await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&app.server)
        .await;

    let report = app.uploader.upload(&records(3), |_| {}).await;

    assert_some!(report.failure);
    assert!(app.sleep.delays().is_empty());
}

#[tokio::test]
async fn stops_at_first_failed_batch() {
    let app = TestUploader::spawn(Mode::Rest, 2, 6).await;
    // batch 2 holds user2 and user3
    Mock::given(body_string_contains("user2@foo.com"))
        .respond_with(ResponseTemplate::new(400).set_body_string("rejected"))
        .expect(1)
        .mount(&app.server)
        .await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&app.server)
        .await;

    let mut progress = Progress::default();
    let report = app.uploader.upload(&records(5), progress.record()).await;

    // batch 1 stays committed; batch 3 is never sent
    assert_eq!(report.uploaded, 2);
    let failure = assert_some!(report.failure);
    assert_eq!(failure.batch_number, 2);
    assert_eq!(app.batch_sizes().await, [2, 2]);
    assert_eq!(progress.tuples(), [(1, 2, 5)]);
}

#[tokio::test]
async fn no_content_is_success() {
    let app = TestUploader::spawn(Mode::Rest, 500, 6).await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&app.server)
        .await;

    let report = app.uploader.upload(&records(3), |_| {}).await;
    assert_none!(report.failure);
}

#[tokio::test]
async fn unexpected_status_is_not_retried() {
    let app = TestUploader::spawn(Mode::Rest, 500, 6).await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(202).set_body_string("accepted"))
        .expect(1)
        .mount(&app.server)
        .await;

    let report = app.uploader.upload(&records(3), |_| {}).await;

    let failure = assert_some!(report.failure);
    assert_eq!(failure.error.to_string(), "Unexpected status 202");
    assert!(app.sleep.delays().is_empty());
}

#[tokio::test]
async fn network_errors_are_retried() {
    init_tracing();
    // bind, then release, a port so that nothing is listening on it
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let sleep = RecordingSleep::default();
    let uploader = uploader_for(destination(Mode::Rest, &format!("http://127.0.0.1:{port}")), 500, 2)
        .with_sleep(sleep.clone());

    let report = uploader.upload(&records(3), |_| {}).await;

    let failure = assert_some!(report.failure);
    assert_matches!(failure.error, UploadError::Network(_));
    assert_eq!(sleep.delays(), secs(&[1.5, 2.5]));
}
