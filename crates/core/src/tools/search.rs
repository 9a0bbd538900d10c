use super::{ToolClients, ToolFailure};
use crate::http::{self, ServiceError, truncate};
use schemars::JsonSchema;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const LABEL: &str = "Search";
const TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RESULTS: usize = 3;
const SOURCE_TITLES: usize = 2;
const SNIPPET_CHARS: usize = 200;

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SearchArgs {
    /// What to search for, e.g. "latest news about AI".
    pub query: String,
}

#[derive(Deserialize, Debug, Default)]
struct SearchResponse {
    answer: Option<String>,
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize, Debug, Default)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

fn failure(err: ServiceError) -> ToolFailure {
    match err {
        ServiceError::Status(401) => ToolFailure::new(
            "status",
            "I'm having authentication issues with the search service.",
        ),
        ServiceError::Status(429) => ToolFailure::new(
            "status",
            "I've reached the search limit for now. Please try again later.",
        ),
        other => ToolFailure::from_service(LABEL, &other),
    }
}

fn format_results(query: &str, response: &SearchResponse) -> String {
    if let Some(answer) = response.answer.as_deref().filter(|a| !a.trim().is_empty()) {
        let mut out = format!("I found information about '{query}'. {answer}");
        let sources: Vec<&str> = response
            .results
            .iter()
            .take(SOURCE_TITLES)
            .map(|hit| hit.title.as_str())
            .filter(|title| !title.is_empty() && title.chars().count() < 100)
            .collect();
        if !sources.is_empty() {
            out.push_str(&format!(
                " This information comes from sources including: {}.",
                sources.join(", ")
            ));
        }
        return out;
    }

    let snippets: Vec<String> = response
        .results
        .iter()
        .take(MAX_RESULTS)
        .filter(|hit| !hit.content.is_empty())
        .map(|hit| {
            let snippet = truncate(&hit.content, SNIPPET_CHARS);
            let ellipsis = if snippet.len() < hit.content.len() { "..." } else { "" };
            format!("{}: {snippet}{ellipsis}", hit.title)
        })
        .collect();
    if snippets.is_empty() {
        return format!(
            "I searched for '{query}' but found limited information. Would you like me to try a more specific search?"
        );
    }
    format!("I found several results for '{query}': {}", snippets.join(" ... "))
}

pub async fn run(clients: &ToolClients, args: SearchArgs) -> Result<String, ToolFailure> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(ToolFailure::new(
            "invalid_argument",
            "What would you like me to search for?",
        ));
    }
    let Some(api_key) = clients.settings.tavily_api_key.as_ref() else {
        return Err(ToolFailure::new(
            "not_configured",
            "I cannot search the web right now because the search service is not configured.",
        ));
    };

    let body = json!({
        "api_key": api_key.expose_secret(),
        "query": query,
        "search_depth": "basic",
        "include_answer": true,
        "include_images": false,
        "include_raw_content": false,
        "max_results": MAX_RESULTS,
    });
    let response = http::post_json(
        &clients.http,
        &clients.settings.search_url,
        &body,
        clients.timeout(TIMEOUT),
    )
    .await
    .map_err(failure)?;

    let parsed: SearchResponse = serde_json::from_value::<Option<SearchResponse>>(response)
        .map_err(|e| failure(ServiceError::MalformedJson(e.to_string())))?
        .unwrap_or_default();
    Ok(format_results(query, &parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolSettings;
    use crate::tools::test_support::clients;
    use secrecy::SecretString;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tools_for(server: &MockServer) -> ToolClients {
        clients(ToolSettings {
            search_url: server.uri(),
            tavily_api_key: Some(SecretString::from("tvly-test".to_string())),
            max_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        })
    }

    fn query(q: &str) -> SearchArgs {
        SearchArgs { query: q.to_string() }
    }

    #[test]
    fn test_answer_with_sources() {
        let response = SearchResponse {
            answer: Some("Rust 1.80 shipped in July.".into()),
            results: vec![
                SearchHit { title: "Rust Blog".into(), content: "x".into() },
                SearchHit { title: "".into(), content: "y".into() },
                SearchHit { title: "Third".into(), content: "z".into() },
            ],
        };
        assert_eq!(
            format_results("rust release", &response),
            "I found information about 'rust release'. Rust 1.80 shipped in July. This information comes from sources including: Rust Blog."
        );
    }

    #[test]
    fn test_snippets_without_answer() {
        let long = "a".repeat(250);
        let response = SearchResponse {
            answer: None,
            results: vec![
                SearchHit { title: "One".into(), content: "short".into() },
                SearchHit { title: "Two".into(), content: long },
            ],
        };
        let out = format_results("q", &response);
        assert!(out.starts_with("I found several results for 'q': One: short ... Two: aaa"));
        assert!(out.ends_with(&format!("{}...", "a".repeat(10))));

        let empty = format_results("q", &SearchResponse::default());
        assert!(empty.contains("found limited information"));
    }

    #[tokio::test]
    async fn test_sends_key_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "api_key": "tvly-test",
                "query": "weather in Oslo",
                "include_answer": true
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"answer": "Cold.", "results": []})),
            )
            .mount(&server)
            .await;

        let out = run(&tools_for(&server), query("  weather in Oslo ")).await.unwrap();
        assert_eq!(out, "I found information about 'weather in Oslo'. Cold.");
    }

    #[tokio::test]
    async fn test_failures_yield_distinct_sentences() {
        let cases = [
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": "late"}))
                .set_delay(Duration::from_millis(600)),
            ResponseTemplate::new(500),
            ResponseTemplate::new(200).set_body_string("<html>"),
            ResponseTemplate::new(401),
            ResponseTemplate::new(429),
        ];
        let mut seen = Vec::new();
        for template in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(template)
                .mount(&server)
                .await;
            let failure = run(&tools_for(&server), query("anything")).await.unwrap_err();
            assert!(!failure.spoken.starts_with("I found"));
            assert!(!seen.contains(&failure.spoken));
            seen.push(failure.spoken);
        }
    }

    #[tokio::test]
    async fn test_missing_key_and_empty_query() {
        let tools = clients(ToolSettings::default());
        assert_eq!(run(&tools, query("x")).await.unwrap_err().kind, "not_configured");
        assert_eq!(run(&tools, query(" ")).await.unwrap_err().kind, "invalid_argument");
    }
}
