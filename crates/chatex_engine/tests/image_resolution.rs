use std::sync::Arc;

use chatex_engine::{
    collect_conversation_turns, FetchSettings, Fetcher, FetcherProxy, ImageCache, ImageResolver, LiveDocument,
    NoProxy, ReqwestFetcher,
};
use pretty_assertions::assert_eq;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

fn png() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "image/png")
        .set_body_bytes(PNG_BYTES.to_vec())
}

fn resolver(settings: FetchSettings) -> ImageResolver {
    let fetcher: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new(settings));
    ImageResolver::new(
        fetcher.clone(),
        Arc::new(FetcherProxy::new(fetcher)),
        Arc::new(ImageCache::new()),
        Url::parse("https://chatgpt.com/c/abc").unwrap(),
    )
}

fn page_with_images(srcs: &[&str]) -> LiveDocument {
    let turns: String = srcs
        .iter()
        .enumerate()
        .map(|(n, src)| {
            format!(
                r#"<article data-testid="conversation-turn-{n}"><div data-message-author-role="assistant"><div class="markdown prose"><p>Figure number {n}</p><img src="{src}" alt="figure"></div></div></article>"#
            )
        })
        .collect();
    let markup = format!(r#"<html><body><main><div data-testid="conversation-main">{turns}</div></main></body></html>"#);
    LiveDocument::parse(&markup, Url::parse("https://chatgpt.com/c/abc").unwrap())
}

#[tokio::test]
async fn a_url_shared_by_several_turns_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/shared.png"))
        .respond_with(png())
        .expect(1)
        .mount(&server)
        .await;
    let src = format!("{}/img/shared.png", server.uri());
    let doc = page_with_images(&[&src, &src]);
    let mut turns = collect_conversation_turns(&doc).turns;
    let resolver = resolver(FetchSettings::default());

    let report = resolver.resolve_turns(&mut turns).await;

    assert_eq!((report.resolved, report.failed), (1, 0));
    let expected = "data:image/png;base64,iVBORw0KGgpmYWtl";
    for turn in &turns {
        assert_eq!(turn.images[0].data_url.as_deref(), Some(expected));
        assert!(turn.markdown_resolved.contains(&format!("![figure]({expected})")));
        assert!(turn.markdown.contains("__CED_IMAGE_0__"));
        assert!(turn.html.contains(&format!("src=\"{expected}\"")));
    }
    assert_eq!(resolver.cache().get(&src).as_deref(), Some(expected));
}

#[tokio::test]
async fn cached_urls_skip_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/once.png"))
        .respond_with(png())
        .expect(1)
        .mount(&server)
        .await;
    let src = format!("{}/img/once.png", server.uri());
    let resolver = resolver(FetchSettings::default());

    let first = resolver.fetch_data_url(&src).await;
    let second = resolver.fetch_data_url(&src).await;

    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn rejected_credentialed_fetch_falls_through_to_the_proxy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/private.png"))
        .and(header("cookie", "session=42"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/private.png"))
        .respond_with(png())
        .expect(1)
        .mount(&server)
        .await;
    let resolver = resolver(FetchSettings {
        cookie_header: Some("session=42".to_string()),
        ..FetchSettings::default()
    });

    let data = resolver.fetch_data_url(&format!("{}/img/private.png", server.uri())).await;

    assert_eq!(data.as_deref(), Some("data:image/png;base64,iVBORw0KGgpmYWtl"));
}

#[tokio::test]
async fn without_a_proxy_the_uncredentialed_tier_still_runs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/private.png"))
        .and(header("cookie", "session=42"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/private.png"))
        .respond_with(png())
        .expect(1)
        .mount(&server)
        .await;
    let fetcher: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new(FetchSettings {
        cookie_header: Some("session=42".to_string()),
        ..FetchSettings::default()
    }));
    let resolver = ImageResolver::new(
        fetcher,
        Arc::new(NoProxy),
        Arc::new(ImageCache::new()),
        Url::parse("https://chatgpt.com/").unwrap(),
    );

    assert!(resolver.fetch_data_url(&format!("{}/img/private.png", server.uri())).await.is_some());
}

#[tokio::test]
async fn non_image_responses_leave_the_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>sign in</html>"),
        )
        .mount(&server)
        .await;
    let src = format!("{}/img/login", server.uri());
    let doc = page_with_images(&[&src]);
    let mut turns = collect_conversation_turns(&doc).turns;

    let report = resolver(FetchSettings::default()).resolve_turns(&mut turns).await;

    assert_eq!((report.resolved, report.failed), (0, 1));
    assert_eq!(turns[0].images[0].data_url, None);
    assert_eq!(turns[0].markdown_resolved, turns[0].markdown);
}

#[tokio::test]
async fn local_references_never_touch_the_network() {
    let resolver = resolver(FetchSettings::default());

    assert_eq!(
        resolver.fetch_data_url("data:image/gif;base64,R0lG").await.as_deref(),
        Some("data:image/gif;base64,R0lG")
    );
    assert_eq!(resolver.fetch_data_url("blob:https://chatgpt.com/1234").await, None);
    assert_eq!(
        resolver
            .fetch_data_url("https://www.google.com/s2/favicons?domain=rust-lang.org")
            .await,
        None
    );
    assert_eq!(resolver.fetch_data_url("   ").await, None);
    assert!(resolver.cache().is_empty());
}
