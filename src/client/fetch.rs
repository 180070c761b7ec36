use crate::config::Conf;
use crate::errors::DownloaderError;
use crate::prelude::*;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use url::Url;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

fn fetch_error(url: &Url, source: reqwest::Error) -> DownloaderError {
    DownloaderError::Fetch {
        url: url.to_string(),
        source,
    }
}

/// HTTP access with a simple bounded retry.
pub(crate) struct Fetcher {
    http: reqwest::Client,
    retries: u32,
    retry_delay: Duration,
}

impl Fetcher {
    pub(crate) fn new(conf: &Conf) -> Result<Self> {
        let user_agent = conf.user_agent.as_deref().unwrap_or(USER_AGENT);
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(conf.timeout_secs))
            .timeout(Duration::from_secs(conf.timeout_secs));
        if conf.no_proxy {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|err| {
                DownloaderError::LoadConfig(
                    anyhow::Error::new(err).context("could not build the http client"),
                )
            })?;
        Ok(Self {
            http,
            retries: conf.retries,
            retry_delay: Duration::from_millis(conf.retry_delay_ms),
        })
    }

    #[instrument(skip(self), fields(url = %url))]
    pub(crate) async fn fetch_text(&self, url: &Url) -> Result<String> {
        self.with_retries(url, move || async move {
            let response = self.get(url).await?;
            response.text().await.map_err(|err| fetch_error(url, err))
        })
        .await
    }

    /// Streams the body of `url` into `target`, returning the number of bytes written.
    pub(crate) async fn download_to(&self, url: &Url, target: &Path) -> Result<u64> {
        self.with_retries(url, move || async move {
            let mut response = self.get(url).await?;
            let mut file = tokio::fs::File::create(target)
                .await
                .map_err(|err| DownloaderError::Write(target.to_path_buf(), err))?;
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await.map_err(|err| fetch_error(url, err))? {
                file.write_all(&chunk)
                    .await
                    .map_err(|err| DownloaderError::Write(target.to_path_buf(), err))?;
                written += chunk.len() as u64;
            }
            file.flush()
                .await
                .map_err(|err| DownloaderError::Write(target.to_path_buf(), err))?;
            trace!("wrote {} bytes to {:?}", written, target);
            Ok::<_, DownloaderError>(written)
        })
        .await
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|err| fetch_error(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloaderError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    async fn with_retries<T, F, Fut>(&self, url: &Url, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut failures = 0;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && failures < self.retries => {
                    failures += 1;
                    warn!(
                        "attempt {} of {} for {} failed: {}, retrying in {:?}",
                        failures,
                        self.retries + 1,
                        url,
                        err,
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Reply, TestServer};

    fn conf() -> Conf {
        Conf {
            retries: 2,
            retry_delay_ms: 10,
            timeout_secs: 5,
            no_proxy: true,
            ..Conf::default()
        }
    }

    #[tokio::test]
    async fn fetches_text() {
        let server = TestServer::start(vec![(
            "/index.m3u8",
            vec![Reply::ok("#EXTM3U\n#EXTINF:4,\na.ts\n")],
        )])
        .await;
        let fetcher = Fetcher::new(&conf()).unwrap();
        let text = fetcher.fetch_text(&server.url("/index.m3u8")).await.unwrap();
        assert!(text.starts_with("#EXTM3U"));
        assert_eq!(server.hits("/index.m3u8"), 1);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = TestServer::start(vec![(
            "/index.m3u8",
            vec![Reply::status(503), Reply::status(500), Reply::ok("#EXTM3U\n")],
        )])
        .await;
        let fetcher = Fetcher::new(&conf()).unwrap();
        let text = fetcher.fetch_text(&server.url("/index.m3u8")).await.unwrap();
        assert_eq!(text, "#EXTM3U\n");
        assert_eq!(server.hits("/index.m3u8"), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_retry_budget() {
        let server = TestServer::start(vec![("/seg.ts", vec![Reply::status(502)])]).await;
        let fetcher = Fetcher::new(&conf()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let result = fetcher
            .download_to(&server.url("/seg.ts"), &dir.path().join("00000.ts"))
            .await;
        assert!(matches!(
            result,
            Err(DownloaderError::HttpStatus { status, .. }) if status.as_u16() == 502
        ));
        assert_eq!(server.hits("/seg.ts"), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = TestServer::start(vec![]).await;
        let fetcher = Fetcher::new(&conf()).unwrap();
        let result = fetcher.fetch_text(&server.url("/missing.m3u8")).await;
        assert!(matches!(
            result,
            Err(DownloaderError::HttpStatus { status, .. }) if status.as_u16() == 404
        ));
        assert_eq!(server.hits("/missing.m3u8"), 1);
    }

    #[tokio::test]
    async fn unreachable_hosts_fail_with_fetch_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = Fetcher::new(&conf()).unwrap();
        let url = Url::parse(&format!("http://{}/index.m3u8", addr)).unwrap();
        assert!(matches!(
            fetcher.fetch_text(&url).await,
            Err(DownloaderError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn downloads_body_to_file() {
        let body = vec![0x47u8; 100_000];
        let server =
            TestServer::start(vec![("/seg.ts", vec![Reply::bytes(200, body.clone())])]).await;
        let fetcher = Fetcher::new(&conf()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("00000.ts");
        let written = fetcher
            .download_to(&server.url("/seg.ts"), &target)
            .await
            .unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), body);
    }
}
