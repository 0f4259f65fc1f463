//! Refresh cycle: fetch → parse → dedup → filter → acquire → submit → persist.
//!
//! One [`Refresher::refresh_all`] call is one cycle over every enabled feed.
//! Failures stay inside the feed (or item) where they happen; the worst
//! outcome of any error is that the affected items are tried again next cycle.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::client::{AcquisitionClient, Placement};
use crate::config::Config;
use crate::feed::{
    acquire_payload, fetch_feed, parse_feed, ContentFilter, FetchError, FilterError, ParseError,
};
use crate::storage::{
    filter_downloaded, Feed, FeedStore, FeedStoreError, Ledger, LedgerError, PayloadCache,
};

/// Why a single feed produced nothing this cycle.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Counters for one successfully processed feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Items parsed from the document.
    pub candidates: usize,
    /// Items not yet in the ledger.
    pub fresh: usize,
    /// Fresh items that passed the include/exclude rules.
    pub accepted: usize,
    /// Items the client took; these are now in the ledger.
    pub submitted: usize,
}

/// Outcome of one feed within a cycle.
#[derive(Debug)]
pub struct FeedReport {
    pub link: String,
    pub result: Result<FeedStats, FeedError>,
}

/// Outcome of one refresh cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub feeds: Vec<FeedReport>,
    /// Feeds present in the feed list but disabled.
    pub skipped: usize,
}

impl CycleReport {
    pub fn submitted(&self) -> usize {
        self.feeds
            .iter()
            .filter_map(|f| f.result.as_ref().ok())
            .map(|s| s.submitted)
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.feeds.iter().filter(|f| f.result.is_err()).count()
    }
}

/// Runs refresh cycles against explicit stores and an explicit HTTP client.
pub struct Refresher {
    http: reqwest::Client,
    feeds: FeedStore,
    ledger: Ledger,
    cache: PayloadCache,
    timeout: Duration,
    max_concurrent_feeds: usize,
}

impl Refresher {
    pub fn new(
        http: reqwest::Client,
        feeds: FeedStore,
        ledger: Ledger,
        cache: PayloadCache,
    ) -> Self {
        Self {
            http,
            feeds,
            ledger,
            cache,
            timeout: Duration::from_secs(30),
            max_concurrent_feeds: 4,
        }
    }

    /// Wire up the stores under `data_dir`/`cache_dir` with the config's limits.
    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        data_dir: &Path,
        cache_dir: &Path,
    ) -> Self {
        Self::new(
            http,
            FeedStore::new(data_dir),
            Ledger::new(data_dir),
            PayloadCache::new(cache_dir),
        )
        .with_timeout(config.request_timeout())
        .with_max_concurrent_feeds(config.max_concurrent_feeds())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent_feeds(mut self, max: usize) -> Self {
        self.max_concurrent_feeds = max.max(1);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run one cycle over every enabled feed in the feed store.
    ///
    /// Only an unreadable feed list fails the cycle as a whole.
    pub async fn refresh_all(
        &self,
        client: &dyn AcquisitionClient,
    ) -> Result<CycleReport, FeedStoreError> {
        let feeds = self.feeds.load().await?;
        Ok(self.refresh_feeds(feeds, client).await)
    }

    /// Run one cycle over the given feeds.
    ///
    /// Feeds are processed concurrently up to the configured limit. Results
    /// are returned in completion order, not input order.
    pub async fn refresh_feeds(
        &self,
        feeds: Vec<Feed>,
        client: &dyn AcquisitionClient,
    ) -> CycleReport {
        let total = feeds.len();
        let enabled: Vec<Feed> = feeds.into_iter().filter(|f| f.enabled).collect();
        let skipped = total - enabled.len();

        tracing::info!(
            feeds = enabled.len(),
            disabled = skipped,
            client = client.client_type(),
            "Starting refresh cycle"
        );

        if !client.supports_placement_submission() {
            tracing::debug!(
                client = client.client_type(),
                "Client does not accept submissions, nothing will be downloaded"
            );
        }

        let reports: Vec<FeedReport> = stream::iter(enabled)
            .map(move |feed| async move {
                let result = self.refresh_feed(&feed, client).await;
                if let Err(e) = &result {
                    tracing::warn!(feed = %feed.display_name(), link = %feed.link, error = %e, "Feed refresh failed");
                }
                FeedReport {
                    link: feed.link,
                    result,
                }
            })
            .buffer_unordered(self.max_concurrent_feeds)
            .collect()
            .await;

        let report = CycleReport {
            feeds: reports,
            skipped,
        };

        tracing::info!(
            feeds = report.feeds.len(),
            failed = report.failed(),
            submitted = report.submitted(),
            "Refresh cycle finished"
        );

        report
    }

    /// Process one feed end to end.
    ///
    /// The feed's ledger partition is locked for the whole run, so two
    /// overlapping cycles never interleave on the same feed.
    pub async fn refresh_feed(
        &self,
        feed: &Feed,
        client: &dyn AcquisitionClient,
    ) -> Result<FeedStats, FeedError> {
        let filter = ContentFilter::new(&feed.includes, &feed.excludes, feed.regex)?;

        let _guard = self.ledger.lock(&feed.link).await;

        let bytes = fetch_feed(&self.http, &feed.link, self.timeout).await?;
        let candidates = parse_feed(&bytes)?;
        let downloaded = self.ledger.load(&feed.link).await?;

        let mut stats = FeedStats {
            candidates: candidates.len(),
            ..FeedStats::default()
        };

        let fresh = filter_downloaded(&downloaded, candidates);
        stats.fresh = fresh.len();

        let accepted = filter.apply(fresh);
        stats.accepted = accepted.len();

        tracing::debug!(
            feed = %feed.display_name(),
            candidates = stats.candidates,
            fresh = stats.fresh,
            accepted = stats.accepted,
            "Feed parsed"
        );

        if accepted.is_empty() || !client.supports_placement_submission() {
            return Ok(stats);
        }

        let placement = Placement::for_feed(feed);
        let mut attempted = HashSet::new();
        let mut submitted = HashSet::new();

        for item in &accepted {
            // Several entries may share a link under different titles; one try per link
            if !attempted.insert(item.link.as_str()) {
                tracing::debug!(link = %item.link, title = %item.title, "Link already handled this cycle");
                continue;
            }

            let payload =
                match acquire_payload(&self.http, &self.cache, &item.link, self.timeout).await {
                    Ok(payload) => payload,
                    Err(e) if e.is_persistence() => {
                        tracing::warn!(link = %item.link, error = %e, "Failed to cache payload");
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(link = %item.link, error = %e, "No payload, will retry next cycle");
                        continue;
                    }
                };

            match client.add_payload(&payload, &placement).await {
                Ok(()) => {
                    tracing::info!(
                        feed = %feed.display_name(),
                        title = %item.title,
                        link = %item.link,
                        "Submitted"
                    );
                    submitted.insert(item.link.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        client = client.client_type(),
                        link = %item.link,
                        error = %e,
                        "Submission failed, will retry next cycle"
                    );
                }
            }
        }

        stats.submitted = submitted.len();
        if !submitted.is_empty() {
            // Items are already with the client; a lost write means resubmission next cycle
            if let Err(e) = self.ledger.save(&feed.link, &submitted).await {
                tracing::warn!(
                    feed = %feed.display_name(),
                    submitted = submitted.len(),
                    error = %e,
                    "Failed to persist ledger, items may be submitted again"
                );
                return Err(e.into());
            }
        }

        Ok(stats)
    }

    /// Run a cycle now and then every `interval` until `shutdown` resolves.
    ///
    /// Missed ticks are skipped rather than bunched up. When `shutdown`
    /// resolves mid-cycle the cycle is dropped: in-flight requests are
    /// abandoned and the feed being processed keeps its previous ledger.
    pub async fn run_periodic<F>(
        &self,
        client: &dyn AcquisitionClient,
        interval: Duration,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = timer.tick() => {}
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, abandoning refresh cycle");
                    break;
                }
                result = self.refresh_all(client) => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "Could not load feed list, skipping cycle");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, NoopClient};
    use crate::storage::CachedPayload;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingClient {
        submitted: Mutex<Vec<(String, Placement)>>,
        reject: bool,
    }

    #[async_trait]
    impl AcquisitionClient for RecordingClient {
        fn client_type(&self) -> &'static str {
            "recording"
        }

        fn supports_placement_submission(&self) -> bool {
            true
        }

        async fn add_payload(
            &self,
            payload: &CachedPayload,
            placement: &Placement,
        ) -> Result<(), ClientError> {
            if self.reject {
                return Err(ClientError::Rejected("test".into()));
            }
            self.submitted
                .lock()
                .unwrap()
                .push((payload.link.clone(), placement.clone()));
            Ok(())
        }
    }

    struct Fixture {
        data: tempfile::TempDir,
        cache: tempfile::TempDir,
        refresher: Refresher,
    }

    fn fixture() -> Fixture {
        let data = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let refresher = Refresher::from_config(
            &Config::default(),
            reqwest::Client::new(),
            data.path(),
            cache.path(),
        )
        .with_timeout(Duration::from_secs(5));
        Fixture {
            data,
            cache,
            refresher,
        }
    }

    fn feed_for(server: &MockServer) -> Feed {
        Feed {
            title: "Test".into(),
            link: format!("{}/rss", server.uri()),
            path: "/downloads".into(),
            category: "tv".into(),
            tags: vec!["a".into(), "b".into()],
            enabled: true,
            ..Feed::default()
        }
    }

    async fn serve_feed(server: &MockServer, items: &[(&str, &str)]) {
        let body: String = items
            .iter()
            .map(|(title, file)| {
                format!(
                    r#"<item><title>{title}</title><enclosure url="{}/{file}"/></item>"#,
                    server.uri()
                )
            })
            .collect();
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "<rss version=\"2.0\"><channel>{body}</channel></rss>"
            )))
            .mount(server)
            .await;
    }

    async fn serve_payload(server: &MockServer, file: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{file}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"d4:infoe".to_vec()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_submits_and_records_in_ledger() {
        let server = MockServer::start().await;
        serve_feed(&server, &[("Ep 1", "ep1.torrent")]).await;
        serve_payload(&server, "ep1.torrent").await;

        let fx = fixture();
        let client = RecordingClient::default();
        let feed = feed_for(&server);

        let stats = fx.refresher.refresh_feed(&feed, &client).await.unwrap();

        assert_eq!(
            stats,
            FeedStats {
                candidates: 1,
                fresh: 1,
                accepted: 1,
                submitted: 1,
            }
        );
        let link = format!("{}/ep1.torrent", server.uri());
        let submitted = client.submitted.lock().unwrap().clone();
        assert_eq!(
            submitted,
            vec![(
                link.clone(),
                Placement {
                    save_path: "/downloads".into(),
                    category: "tv".into(),
                    tags: "a,b".into(),
                }
            )]
        );
        assert!(fx.refresher.ledger().load(&feed.link).await.unwrap().contains(&link));
    }

    #[tokio::test]
    async fn test_rejected_submission_not_recorded() {
        let server = MockServer::start().await;
        serve_feed(&server, &[("Ep 1", "ep1.torrent")]).await;
        serve_payload(&server, "ep1.torrent").await;

        let fx = fixture();
        let client = RecordingClient {
            reject: true,
            ..RecordingClient::default()
        };
        let feed = feed_for(&server);

        let stats = fx.refresher.refresh_feed(&feed, &client).await.unwrap();

        assert_eq!(stats.submitted, 0);
        assert!(fx.refresher.ledger().load(&feed.link).await.unwrap().is_empty());
        assert!(!fx.refresher.ledger().partition_path(&feed.link).exists());
    }

    #[tokio::test]
    async fn test_unsupported_client_downloads_nothing() {
        let server = MockServer::start().await;
        serve_feed(&server, &[("Ep 1", "ep1.torrent")]).await;
        Mock::given(method("GET"))
            .and(path("/ep1.torrent"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture();
        let feed = feed_for(&server);

        let stats = fx.refresher.refresh_feed(&feed, &NoopClient).await.unwrap();

        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.submitted, 0);
        assert!(fx.refresher.ledger().load(&feed.link).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_payload_retried_next_cycle() {
        let server = MockServer::start().await;
        serve_feed(&server, &[("Ep 1", "ep1.torrent")]).await;
        Mock::given(method("GET"))
            .and(path("/ep1.torrent"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        serve_payload(&server, "ep1.torrent").await;

        let fx = fixture();
        let client = RecordingClient::default();
        let feed = feed_for(&server);

        let first = fx.refresher.refresh_feed(&feed, &client).await.unwrap();
        assert_eq!(first.submitted, 0);

        let second = fx.refresher.refresh_feed(&feed, &client).await.unwrap();
        assert_eq!(second.submitted, 1);
    }

    #[tokio::test]
    async fn test_invalid_regex_fails_feed_without_fetching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture();
        let feed = Feed {
            includes: vec!["(".into()],
            regex: true,
            ..feed_for(&server)
        };

        let err = fx
            .refresher
            .refresh_feed(&feed, &RecordingClient::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Filter(_)));
    }

    #[tokio::test]
    async fn test_unreadable_ledger_skips_feed() {
        let server = MockServer::start().await;
        serve_feed(&server, &[("Ep 1", "ep1.torrent")]).await;
        Mock::given(method("GET"))
            .and(path("/ep1.torrent"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture();
        let feed = feed_for(&server);
        let client = RecordingClient::default();

        // A directory where the partition file should be cannot be read
        let partition = fx.refresher.ledger().partition_path(&feed.link);
        std::fs::create_dir_all(&partition).unwrap();

        let err = fx.refresher.refresh_feed(&feed, &client).await.unwrap_err();

        assert!(matches!(err, FeedError::Ledger(LedgerError::Read { .. })), "got {err:?}");
        assert!(client.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_link_submitted_once_per_cycle() {
        let server = MockServer::start().await;
        let body = format!(
            r#"<rss version="2.0"><channel>
                <item><title>A</title><link>{0}/x.torrent</link></item>
                <item><title>B</title><enclosure url="{0}/x.torrent"/></item>
            </channel></rss>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/x.torrent"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"d4:infoe".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture();
        let client = RecordingClient::default();
        let feed = feed_for(&server);

        let stats = fx.refresher.refresh_feed(&feed, &client).await.unwrap();

        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.submitted, 1);
        assert_eq!(client.submitted.lock().unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ledger_write_failure_reported_and_retried() {
        let server = MockServer::start().await;
        serve_feed(&server, &[("Ep 1", "ep1.torrent")]).await;
        serve_payload(&server, "ep1.torrent").await;

        let fx = fixture();
        let feed = feed_for(&server);
        let client = RecordingClient::default();

        // A dangling symlink as the host directory: reads find no partition,
        // but the directory can never be created for the write.
        let partition = fx.refresher.ledger().partition_path(&feed.link);
        let host_dir = partition.parent().unwrap().to_path_buf();
        std::fs::create_dir_all(host_dir.parent().unwrap()).unwrap();
        std::os::unix::fs::symlink(fx.data.path().join("missing"), &host_dir).unwrap();

        let err = fx.refresher.refresh_feed(&feed, &client).await.unwrap_err();

        assert!(matches!(err, FeedError::Ledger(LedgerError::Write { .. })), "got {err:?}");
        assert_eq!(client.submitted.lock().unwrap().len(), 1);
        assert!(!partition.exists());

        // Nothing was recorded, so the item goes out again once the ledger is writable
        std::fs::remove_file(&host_dir).unwrap();
        let retry = fx.refresher.refresh_feed(&feed, &client).await.unwrap();
        assert_eq!(retry.submitted, 1);
        assert_eq!(fx.refresher.ledger().load(&feed.link).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_write_failure_skips_item() {
        let server = MockServer::start().await;
        serve_feed(&server, &[("Ep 1", "ep1.torrent")]).await;
        serve_payload(&server, "ep1.torrent").await;

        let fx = fixture();
        let feed = feed_for(&server);
        let client = RecordingClient::default();

        // A regular file where the payload directory should be
        std::fs::write(fx.cache.path().join("torrent"), b"").unwrap();

        let stats = fx.refresher.refresh_feed(&feed, &client).await.unwrap();

        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.submitted, 0);
        assert!(client.submitted.lock().unwrap().is_empty());
        assert!(!fx.refresher.ledger().partition_path(&feed.link).exists());
    }

    #[tokio::test]
    async fn test_disabled_feeds_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture();
        let feed = Feed {
            enabled: false,
            ..feed_for(&server)
        };

        let report = fx
            .refresher
            .refresh_feeds(vec![feed], &RecordingClient::default())
            .await;

        assert!(report.feeds.is_empty());
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_run_periodic_stops_on_shutdown() {
        let fx = fixture();
        let client = NoopClient;

        tokio::time::timeout(
            Duration::from_secs(5),
            fx.refresher
                .run_periodic(&client, Duration::from_secs(3600), async {}),
        )
        .await
        .expect("run_periodic should return once shutdown resolves");
    }
}
