//! The tag retrieval pipeline.
//!
//! Takes a batch of [`TagRequest`]s and produces exactly one [`TagResult`]
//! per request, in request order. Requests are processed strictly one after
//! the other: request *i + 1* is not started before request *i* has
//! completed, successfully or not. A failure of any kind, from a refused
//! connection to a file without tags, yields [`TagResult::Unavailable`] at
//! that position and the batch carries on.
//!
//! # Example
//!
//! ```rust
//! use ongaku::{fetch::HttpFetcher, pipeline::Pipeline};
//!
//! let pipeline = Pipeline::new(HttpFetcher::new(http_client));
//! let results = pipeline.fetch_all(&context.urls_for_tags).await;
//! assert_eq!(results.len(), context.urls_for_tags.len());
//! ```

use std::time::Duration;

use crate::{
    error::Result,
    fetch::Fetch,
    protocol::{TagRequest, TagResult, Tags},
    tags,
};

/// Turns raw bytes into tags. `tags::parse` unless overridden.
pub type Parser = fn(&[u8], Option<&str>) -> Result<Tags>;

/// Sequential, failure-tolerant tag retrieval.
pub struct Pipeline<F> {
    fetcher: F,
    parser: Parser,
    timeout: Option<Duration>,
}

impl<F: Fetch> Pipeline<F> {
    /// Creates a pipeline that fetches with `fetcher` and parses with
    /// [`tags::parse`], without a timeout.
    #[must_use]
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            parser: tags::parse,
            timeout: None,
        }
    }

    /// Bounds every request to `timeout`.
    ///
    /// Without a timeout, a host that never answers holds its position in
    /// the batch, and thereby the whole batch, indefinitely.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Parser) -> Self {
        self.parser = parser;
        self
    }

    /// Retrieves the tags for every request, in order.
    ///
    /// The result has the same length as `requests`, and the result at
    /// position *i* belongs to the request at position *i*.
    pub async fn fetch_all(&self, requests: &[TagRequest]) -> Vec<TagResult> {
        let mut results = Vec::with_capacity(requests.len());

        for (index, request) in requests.iter().enumerate() {
            let result = match self.fetch_one(request).await {
                Ok(tags) => TagResult::Found(tags),
                Err(e) => {
                    debug!("tags unavailable for #{index} ({}): {e}", request.get_url);
                    TagResult::Unavailable
                }
            };
            results.push(result);
        }

        let found = results.iter().filter(|result| result.is_available()).count();
        debug!("retrieved tags for {found} of {} items", results.len());

        results
    }

    async fn fetch_one(&self, request: &TagRequest) -> Result<Tags> {
        let data = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.fetcher.fetch(request)).await??,
            None => self.fetcher.fetch(request).await?,
        };

        (self.parser)(&data, tags::extension(&request.get_url))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::error::Error;

    /// Serves canned bodies per URL after a per-URL latency, and records
    /// when each fetch started and finished.
    #[derive(Default)]
    struct FakeFetcher {
        bodies: HashMap<String, (Duration, Option<&'static str>)>,
        trace: Arc<Mutex<Vec<(String, Instant, Instant)>>>,
    }

    impl FakeFetcher {
        fn serve(mut self, url: &str, latency_ms: u64, body: Option<&'static str>) -> Self {
            self.bodies
                .insert(url.to_owned(), (Duration::from_millis(latency_ms), body));
            self
        }
    }

    #[async_trait]
    impl Fetch for FakeFetcher {
        async fn fetch(&self, request: &TagRequest) -> Result<Vec<u8>> {
            let started = Instant::now();
            let (latency, body) = self
                .bodies
                .get(&request.get_url)
                .copied()
                .unwrap_or((Duration::ZERO, None));
            tokio::time::sleep(latency).await;

            self.trace
                .lock()
                .unwrap()
                .push((request.get_url.clone(), started, Instant::now()));

            body.map(|body| body.as_bytes().to_vec())
                .ok_or_else(|| Error::not_found(format!("{} does not exist", request.get_url)))
        }
    }

    /// Reads tags from JSON, so that tests can write bodies by hand.
    fn json_parser(data: &[u8], _extension: Option<&str>) -> Result<Tags> {
        Ok(serde_json::from_slice(data)?)
    }

    fn requests(urls: &[&str]) -> Vec<TagRequest> {
        urls.iter()
            .map(|url| TagRequest {
                get_url: (*url).to_owned(),
                head_url: None,
            })
            .collect()
    }

    fn title(result: &TagResult) -> Option<&str> {
        match result {
            TagResult::Found(tags) => tags.title.as_deref(),
            TagResult::Unavailable => None,
        }
    }

    #[tokio::test]
    async fn failures_keep_their_position() {
        let fetcher = FakeFetcher::default()
            .serve("ok1", 0, Some(r#"{"title":"one"}"#))
            .serve("ok2", 0, Some(r#"{"title":"two"}"#));
        let pipeline = Pipeline::new(fetcher).with_parser(json_parser);

        let results = pipeline.fetch_all(&requests(&["ok1", "bad", "ok2"])).await;

        assert_eq!(results.len(), 3);
        assert_eq!(title(&results[0]), Some("one"));
        assert_eq!(results[1], TagResult::Unavailable);
        assert_eq!(title(&results[2]), Some("two"));
    }

    #[tokio::test]
    async fn parser_failures_are_unavailable() {
        let fetcher = FakeFetcher::default()
            .serve("garbled", 0, Some("{not json"))
            .serve("fine", 0, Some(r#"{"title":"fine"}"#));
        let pipeline = Pipeline::new(fetcher).with_parser(json_parser);

        let results = pipeline.fetch_all(&requests(&["garbled", "fine"])).await;

        assert_eq!(results[0], TagResult::Unavailable);
        assert_eq!(title(&results[1]), Some("fine"));
    }

    #[tokio::test]
    async fn every_mix_of_outcomes_preserves_length_and_order() {
        let fetcher = FakeFetcher::default()
            .serve("a", 0, Some(r#"{"title":"a"}"#))
            .serve("b", 0, Some(r#"{"title":"b"}"#));
        let pipeline = Pipeline::new(fetcher).with_parser(json_parser);

        // All combinations of three positions being served or failing.
        for mask in 0u8..8 {
            let urls: Vec<&str> = (0..3)
                .map(|bit| if mask & (1 << bit) == 0 { "x" } else { ["a", "b", "a"][bit] })
                .collect();
            let results = pipeline.fetch_all(&requests(&urls)).await;

            assert_eq!(results.len(), urls.len());
            for (url, result) in urls.iter().zip(&results) {
                match *url {
                    "x" => assert_eq!(*result, TagResult::Unavailable),
                    url => assert_eq!(title(result), Some(url)),
                }
            }
        }
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_results() {
        let pipeline = Pipeline::new(FakeFetcher::default());
        assert!(pipeline.fetch_all(&[]).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_never_overlap() {
        let fetcher = FakeFetcher::default()
            .serve("A", 100, Some(r#"{"title":"A"}"#))
            .serve("B", 10, Some(r#"{"title":"B"}"#))
            .serve("C", 50, Some(r#"{"title":"C"}"#));
        let trace = Arc::clone(&fetcher.trace);
        let pipeline = Pipeline::new(fetcher).with_parser(json_parser);

        pipeline.fetch_all(&requests(&["A", "B", "C"])).await;

        let trace = trace.lock().unwrap();
        let order: Vec<_> = trace.iter().map(|(url, _, _)| url.as_str()).collect();
        assert_eq!(order, ["A", "B", "C"]);
        for pair in trace.windows(2) {
            let (_, _, previous_finished) = &pair[0];
            let (_, next_started, _) = &pair[1];
            assert!(next_started >= previous_finished);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_turns_hung_fetch_into_unavailable() {
        let fetcher = FakeFetcher::default()
            .serve("hung", 60_000, Some(r#"{"title":"late"}"#))
            .serve("quick", 10, Some(r#"{"title":"quick"}"#));
        let pipeline = Pipeline::new(fetcher)
            .with_parser(json_parser)
            .with_timeout(Some(Duration::from_secs(1)));

        let results = pipeline.fetch_all(&requests(&["hung", "quick"])).await;

        assert_eq!(results[0], TagResult::Unavailable);
        assert_eq!(title(&results[1]), Some("quick"));
    }
}
