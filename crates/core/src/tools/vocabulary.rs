//! Lookups against the student's vocabulary store.
//!
//! `GET /words/search?word=` answers `{"word": {...}}`, or 404 when the word is
//! not in the list. `GET /words/random?count=&trained=false` answers
//! `{"words": [...]}`. Records carry `word`, `translate` and `transcript`.

use super::{ToolClients, ToolFailure};
use crate::http::{self, ServiceError};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const LABEL: &str = "Vocabulary";
const TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PRACTICE_COUNT: i64 = 5;

#[derive(Deserialize, JsonSchema, Debug)]
pub struct LookupWordArgs {
    /// The English word to look up.
    pub word: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct PracticeWordsArgs {
    #[schemars(description = "How many words to practise, 1 to 10. Defaults to 5.")]
    pub count: Option<i64>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
struct WordRecord {
    word: String,
    #[serde(default, alias = "translate")]
    translation: Option<String>,
    #[serde(default, alias = "transcript")]
    transcription: Option<String>,
    #[serde(default)]
    example: Option<String>,
}

impl WordRecord {
    fn translation(&self) -> Option<&str> {
        self.translation.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Accepts `{"word": {...}}`, `{"words": [...]}` or a bare list.
fn records(payload: Value) -> Result<Vec<WordRecord>, ServiceError> {
    let list = match payload {
        Value::Object(mut obj) => match (obj.remove("words"), obj.remove("word")) {
            (Some(words), _) => words,
            (None, Some(Value::Object(word))) => Value::Array(vec![Value::Object(word)]),
            _ => Value::Array(Vec::new()),
        },
        other => other,
    };
    serde_json::from_value(list).map_err(|e| ServiceError::MalformedJson(e.to_string()))
}

async fn query(
    clients: &ToolClients,
    route: &str,
    params: &[(&str, String)],
) -> Result<Vec<WordRecord>, ServiceError> {
    let base = clients
        .settings
        .vocabulary_url
        .as_deref()
        .ok_or(ServiceError::NotConfigured)?;
    let url = format!("{}{}", base.trim_end_matches('/'), route);

    http::get_json(&clients.http, &url, params, clients.timeout(TIMEOUT))
        .await
        .and_then(records)
}

fn describe(record: &WordRecord) -> String {
    let mut out = match record.translation() {
        Some(translation) => format!("The word '{}' means '{translation}'.", record.word),
        None => format!("The word '{}' is in the student's vocabulary list.", record.word),
    };
    if let Some(transcription) = record.transcription.as_deref().filter(|t| !t.is_empty()) {
        out.push_str(&format!(" Pronunciation: {transcription}."));
    }
    if let Some(example) = record.example.as_deref().filter(|e| !e.is_empty()) {
        out.push_str(&format!(" Example: {example}"));
    }
    out.push_str(" Ask the student to pronounce it and use it in a sentence of their own.");
    out
}

pub async fn lookup(clients: &ToolClients, args: LookupWordArgs) -> Result<String, ToolFailure> {
    let word = args.word.trim();
    if word.is_empty() {
        return Err(ToolFailure::new(
            "invalid_argument",
            "Which word would you like me to look up?",
        ));
    }

    let found = match query(clients, "/words/search", &[("word", word.to_string())]).await {
        Ok(found) => found,
        // The store answers 404 for words the student has not saved.
        Err(ServiceError::Status(404)) => Vec::new(),
        Err(e) => return Err(ToolFailure::from_service(LABEL, &e)),
    };
    let exact = found
        .iter()
        .find(|r| r.word.eq_ignore_ascii_case(word))
        .or(found.first());
    Ok(match exact {
        Some(record) => describe(record),
        None => format!("I couldn't find '{word}' in the student's vocabulary list."),
    })
}

pub async fn practice(
    clients: &ToolClients,
    args: PracticeWordsArgs,
) -> Result<String, ToolFailure> {
    let count = args.count.unwrap_or(DEFAULT_PRACTICE_COUNT).clamp(1, 10);
    let words = query(
        clients,
        "/words/random",
        &[("count", count.to_string()), ("trained", "false".to_string())],
    )
    .await
    .map_err(|e| ToolFailure::from_service(LABEL, &e))?;

    if words.is_empty() {
        return Ok("There are no new words to practise right now.".to_string());
    }
    let lines: Vec<String> = words
        .iter()
        .enumerate()
        .map(|(i, r)| match r.translation() {
            Some(translation) => format!("{}. {} – {translation}", i + 1, r.word),
            None => format!("{}. {}", i + 1, r.word),
        })
        .collect();
    let intro = match lines.len() {
        1 => "Here is 1 word to practise".to_string(),
        n => format!("Here are {n} words to practise"),
    };
    Ok(format!("{intro}: {}", lines.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolSettings;
    use crate::tools::test_support::clients;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tools_for(server: &MockServer) -> ToolClients {
        clients(ToolSettings {
            vocabulary_url: Some(format!("{}/", server.uri())),
            max_timeout: Some(Duration::from_millis(200)),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_lookup_reads_store_record_and_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/words/search"))
            .and(query_param("word", "apple"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"word": {
                "word": "Apple", "translate": "яблоко", "transcript": "ˈæp.əl", "trained": false
            }})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/words/search"))
            .and(query_param("word", "zebra"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "Word not found"})),
            )
            .mount(&server)
            .await;

        let tools = tools_for(&server);
        let out = lookup(&tools, LookupWordArgs { word: "apple".into() })
            .await
            .unwrap();
        assert!(out.starts_with("The word 'Apple' means 'яблоко'. Pronunciation: ˈæp.əl."));

        let out = lookup(&tools, LookupWordArgs { word: " zebra ".into() })
            .await
            .unwrap();
        assert_eq!(out, "I couldn't find 'zebra' in the student's vocabulary list.");
    }

    #[tokio::test]
    async fn test_lookup_without_translation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/words/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"word": {"word": "bridge", "translate": null}})),
            )
            .mount(&server)
            .await;

        let out = lookup(&tools_for(&server), LookupWordArgs { word: "bridge".into() })
            .await
            .unwrap();
        assert!(out.starts_with("The word 'bridge' is in the student's vocabulary list."));
    }

    #[tokio::test]
    async fn test_practice_reads_store_words_and_singular() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/words/random"))
            .and(query_param("count", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"words": [
                {"word": "river", "translate": "река", "transcript": "ˈrɪv.ər"}
            ]})))
            .mount(&server)
            .await;

        let out = practice(&tools_for(&server), PracticeWordsArgs { count: Some(1) })
            .await
            .unwrap();
        assert_eq!(out, "Here is 1 word to practise: 1. river – река");
    }

    #[tokio::test]
    async fn test_practice_clamps_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/words/random"))
            .and(query_param("count", "10"))
            .and(query_param("trained", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"word": "river", "translation": "река"},
                {"word": "bridge", "translation": "мост"}
            ])))
            .mount(&server)
            .await;

        let out = practice(&tools_for(&server), PracticeWordsArgs { count: Some(99) })
            .await
            .unwrap();
        assert_eq!(out, "Here are 2 words to practise: 1. river – река; 2. bridge – мост");
    }

    #[tokio::test]
    async fn test_failures_yield_distinct_sentences() {
        let cases = [
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(600)),
            ResponseTemplate::new(500),
            ResponseTemplate::new(200).set_body_json(json!({"words": "nope"})),
        ];
        let mut seen = Vec::new();
        for template in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(template)
                .mount(&server)
                .await;
            let failure = practice(&tools_for(&server), PracticeWordsArgs { count: None })
                .await
                .unwrap_err();
            assert!(!failure.spoken.starts_with("Here are"));
            assert!(!seen.contains(&failure.spoken));
            seen.push(failure.spoken);
        }

        let unconfigured = clients(ToolSettings::default());
        let failure = lookup(&unconfigured, LookupWordArgs { word: "x".into() })
            .await
            .unwrap_err();
        assert_eq!(failure.kind, "not_configured");
    }
}
