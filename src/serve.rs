//! Line-delimited JSON requests over stdio.
//!
//! Each input line is `{"id": .., "op": "<name>", ..params}`; each output
//! line is the reply envelope with the same `id`. Replies are written in
//! completion order, not input order.

use futures::{StreamExt, stream};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::store::EventStore;
use crate::views::types::Paging;
use crate::views::{DEFAULT_JOIN_AMOUNT, DEFAULT_LIST_AMOUNT, SemanticViews, ViewError, reply};

const MAX_IN_FLIGHT: usize = 8;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Labels {
        lang: String,
        amount: Option<u32>,
        skip: Option<u32>,
    },
    Semantics {
        lang: String,
        amount: Option<u32>,
        skip: Option<u32>,
    },
    Enrich {
        lang: String,
        amount: Option<u32>,
        skip: Option<u32>,
    },
    Loud {
        lang: String,
        amount: Option<u32>,
        skip: Option<u32>,
    },
    Noogle {
        lang: String,
        label: String,
        amount: Option<u32>,
        skip: Option<u32>,
    },
    Langinfo {
        lang: String,
    },
    /// Last computed snapshot, without refreshing.
    Cached {
        lang: String,
    },
    Languages,
    Keywords {
        lang: String,
    },
    Unit {
        #[serde(alias = "semanticId")]
        semantic_id: String,
    },
}

fn paging(amount: Option<u32>, skip: Option<u32>, default_amount: u32) -> Paging {
    Paging::new(amount.unwrap_or(default_amount), skip.unwrap_or(0))
}

/// Run one request against the views and wrap the outcome in the reply
/// envelope.
pub async fn dispatch<S: EventStore, C: Clock>(views: &SemanticViews<S, C>, request: Request) -> Value {
    match request {
        Request::Labels { lang, amount, skip } => reply(
            views
                .list_labels(&lang, paging(amount, skip, DEFAULT_LIST_AMOUNT))
                .await,
        ),
        Request::Semantics { lang, amount, skip } => reply(
            views
                .list_semantics(&lang, paging(amount, skip, DEFAULT_LIST_AMOUNT))
                .await,
        ),
        Request::Enrich { lang, amount, skip } => reply(
            views
                .list_enriched(&lang, paging(amount, skip, DEFAULT_JOIN_AMOUNT))
                .await,
        ),
        Request::Loud { lang, amount, skip } => reply(
            views
                .list_ranked_keywords(&lang, paging(amount, skip, DEFAULT_JOIN_AMOUNT))
                .await,
        ),
        Request::Noogle {
            lang,
            label,
            amount,
            skip,
        } => reply(
            views
                .list_grouped(&lang, &label, paging(amount, skip, DEFAULT_JOIN_AMOUNT))
                .await,
        ),
        Request::Langinfo { lang } => reply(views.language_snapshot(&lang).await),
        Request::Cached { lang } => reply(views.cached_snapshot(&lang)),
        Request::Languages => reply(views.languages().await),
        Request::Keywords { lang } => reply(views.keywords(&lang).await),
        Request::Unit { semantic_id } => reply(views.unit(&semantic_id).await),
    }
}

/// Failure envelope for a line that never became a request.
fn rejected(reason: &'static str) -> Value {
    let mut out = ViewError::InvalidArgument(reason).to_payload();
    out["id"] = Value::Null;
    out
}

async fn handle_line<S: EventStore, C: Clock>(views: &SemanticViews<S, C>, line: Vec<u8>) -> Value {
    let line = match String::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            warn!(%e, "request line is not UTF-8");
            return rejected("request is not valid UTF-8");
        }
    };
    let mut raw: Value = match serde_json::from_str(&line) {
        Ok(v) => v,
        Err(e) => {
            warn!(%e, "unparseable request line");
            return rejected("request is not valid JSON");
        }
    };
    let id = raw
        .as_object_mut()
        .and_then(|obj| obj.remove("id"))
        .unwrap_or(Value::Null);

    let mut out = match serde_json::from_value::<Request>(raw) {
        Ok(request) => {
            debug!(?request, "request");
            dispatch(views, request).await
        }
        Err(e) => {
            warn!(%e, "rejected request");
            let mut body = ViewError::InvalidArgument("unknown op or missing parameter").to_payload();
            body["detail"] = json!(e.to_string());
            body
        }
    };
    out["id"] = id;
    out
}

/// Serve requests from `input` until EOF, writing one reply per line.
/// Undecodable lines are answered and skipped; a failed read ends the loop
/// with that error.
pub async fn serve<S, C, R, W>(
    views: &SemanticViews<S, C>,
    input: R,
    output: &mut W,
) -> std::io::Result<()>
where
    S: EventStore,
    C: Clock,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("serving requests on stdio");
    let lines = stream::unfold(Some(input), |input| async move {
        let mut input = input?;
        let mut line = Vec::new();
        match input.read_until(b'\n', &mut line).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(line), Some(input))),
            Err(e) => Some((Err(e), None)),
        }
    });

    let mut replies = std::pin::pin!(
        lines
            .filter(|line| {
                let blank = matches!(line, Ok(bytes) if bytes.trim_ascii().is_empty());
                std::future::ready(!blank)
            })
            .map(|line| async move {
                match line {
                    Ok(bytes) => Ok(handle_line(views, bytes).await),
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(MAX_IN_FLIGHT)
    );

    let mut served = 0usize;
    while let Some(out) = replies.next().await {
        let out = out.inspect_err(|e| error!(%e, served, "stdin read failed"))?;
        let mut buf = out.to_string();
        buf.push('\n');
        output.write_all(buf.as_bytes()).await?;
        output.flush().await?;
        served += 1;
    }
    info!(served, "input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::store::Collections;
    use crate::store::memory::MemoryStore;
    use std::time::Duration;

    fn views() -> SemanticViews<MemoryStore, ManualClock> {
        let store = MemoryStore::from_json(json!({
            "semantics": [
                { "semanticId": "a", "lang": "en", "label": "x", "wp": "X", "when": "2024-03-09T23:00:00Z" },
                { "semanticId": "b", "lang": "en", "label": "x", "wp": "X", "when": "2024-03-09T23:30:00Z" }
            ]
        }))
        .unwrap();
        let config = Config {
            collections: Collections::default(),
            keywords_dir: "/nonexistent".into(),
            store_timeout: Duration::from_secs(5),
        };
        SemanticViews::with_clock(store, &config, ManualClock::at("2024-03-10T00:00:00Z"))
    }

    async fn run(input: &str) -> Vec<Value> {
        run_bytes(input.as_bytes()).await
    }

    async fn run_bytes(input: &[u8]) -> Vec<Value> {
        let views = views();
        let mut out = Vec::new();
        serve(&views, input, &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn requests_parse_with_optional_paging() {
        let r: Request = serde_json::from_value(json!({ "op": "loud", "lang": "en" })).unwrap();
        assert_eq!(
            r,
            Request::Loud {
                lang: "en".into(),
                amount: None,
                skip: None
            }
        );
        let r: Request = serde_json::from_value(json!({ "op": "languages" })).unwrap();
        assert_eq!(r, Request::Languages);
    }

    #[tokio::test]
    async fn replies_echo_request_ids() {
        let replies = run(concat!(
            r#"{"id": 1, "op": "loud", "lang": "en"}"#,
            "\n\n",
            r#"{"id": "two", "op": "semantics", "lang": "en", "amount": 1}"#,
            "\n",
        ))
        .await;
        assert_eq!(replies.len(), 2);
        let by_id = |id: Value| replies.iter().find(|r| r["id"] == id).unwrap();

        let loud = by_id(json!(1));
        assert_eq!(loud["content"][0]["label"], "x");
        assert_eq!(loud["content"][0]["count"], 2);

        let page = by_id(json!("two"));
        assert_eq!(page["content"].as_array().unwrap().len(), 1);
        assert_eq!(page["content"][0]["semanticId"], "b");
    }

    #[tokio::test]
    async fn bad_lines_get_invalid_argument_replies() {
        let replies = run("not json\n{\"id\": 7, \"op\": \"explode\"}\n").await;
        assert_eq!(replies.len(), 2);
        for r in &replies {
            assert_eq!(r["kind"], "invalid_argument");
        }
        assert!(replies.iter().any(|r| r["id"] == 7));
    }

    #[tokio::test]
    async fn view_errors_travel_in_the_envelope() {
        let replies = run(r#"{"id": 3, "op": "langinfo", "lang": "zz"}"#).await;
        assert_eq!(replies[0]["id"], 3);
        assert_eq!(replies[0]["kind"], "unsupported_language");
        assert_eq!(replies[0]["supported"]["de"], "german");
    }

    #[tokio::test]
    async fn non_utf8_line_is_answered_and_serving_continues() {
        let mut input = br#"{"id": 1, "op": "loud", "lang": "en"}"#.to_vec();
        input.extend_from_slice(b"\n\xff\xfe garbage\n");
        input.extend_from_slice(br#"{"id": 2, "op": "loud", "lang": "en"}"#);
        input.push(b'\n');

        let replies = run_bytes(&input).await;
        assert_eq!(replies.len(), 3);
        for id in [1, 2] {
            let answered = replies.iter().find(|r| r["id"] == id).unwrap();
            assert_eq!(answered["content"][0]["count"], 2);
        }
        let bad = replies.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(bad["kind"], "invalid_argument");
        assert!(bad["message"].as_str().unwrap().contains("UTF-8"));
    }

    struct BrokenPipe;

    impl tokio::io::AsyncRead for BrokenPipe {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _: &mut std::task::Context<'_>,
            _: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("pipe gone")))
        }
    }

    #[tokio::test]
    async fn read_failures_are_returned() {
        use tokio::io::AsyncReadExt;

        let views = views();
        let input = tokio::io::BufReader::new(
            (&br#"{"id": 1, "op": "languages"}"#[..]).chain(BrokenPipe),
        );
        let mut out = Vec::new();
        let err = serve(&views, input, &mut out).await.unwrap_err();
        assert_eq!(err.to_string(), "pipe gone");
    }
}
