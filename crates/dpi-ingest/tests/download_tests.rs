//! Integration tests for source document downloads against a mock HTTP
//! server

use anyhow::Result;
use dpi_ingest::download::{DownloadConfig, Downloader};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader(max_retries: u32) -> Downloader {
    Downloader::new(DownloadConfig {
        timeout_secs: 5,
        max_retries,
    })
    .expect("downloader builds")
}

#[tokio::test]
async fn test_fetch_returns_body_and_content_type() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"%PDF-1.7 content".to_vec())
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;

    let file = downloader(1)
        .fetch(&format!("{}/doc.pdf", server.uri()))
        .await?;

    assert_eq!(file.data, b"%PDF-1.7 content".to_vec());
    assert_eq!(file.content_type_header, "application/pdf");
    Ok(())
}

#[tokio::test]
async fn test_fetch_retries_after_server_error() -> Result<()> {
    let server = MockServer::start().await;
    // first attempt fails, second succeeds
    Mock::given(method("GET"))
        .and(path("/flaky.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;

    let file = downloader(2)
        .fetch(&format!("{}/flaky.pdf", server.uri()))
        .await?;

    assert_eq!(file.data, b"ok".to_vec());
    Ok(())
}

#[tokio::test]
async fn test_fetch_mutates_url_on_404() -> Result<()> {
    let server = MockServer::start().await;
    // only the percent-stripped path exists; the original URL 404s and the
    // downloader retries with '%' characters removed
    Mock::given(method("GET"))
        .and(path("/files/a25b.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"found".to_vec()))
        .mount(&server)
        .await;

    let file = downloader(1)
        .fetch(&format!("{}/files/a%25b.pdf", server.uri()))
        .await?;

    assert_eq!(file.data, b"found".to_vec());
    Ok(())
}

#[tokio::test]
async fn test_fetch_fails_after_exhausting_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.pdf"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let url = format!("{}/broken.pdf", server.uri());
    let err = downloader(2).fetch(&url).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("500"), "unexpected error: {}", message);
}
