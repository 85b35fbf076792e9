//! Turns free-form navigation requests into a start/end pair.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::{
    ChatCompletionResponse, ChatMessage, ChatRequest, MessagesRequest, MessagesResponse,
};
use crate::core::config::{AiProvider, AiSettings};
use crate::core::navigation::{NavigationError, RouteParser};
use crate::utils::url::construct_api_url;

const AI_TIMEOUT: Duration = Duration::from_secs(30);
const ROUTE_MAX_TOKENS: u32 = 200;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const TRIM_CHARS: &[char] = &['。', '！', '？', '，', '.', '!', '?', ',', '"', '\'', '“', '”'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    /// `None` means the user's current location.
    pub start: Option<String>,
    pub end: String,
}

impl RouteRequest {
    fn new(start: Option<&str>, end: &str) -> Option<Self> {
        let end = clean(end);
        if end.is_empty() {
            return None;
        }
        let start = start.map(clean).filter(|start| !start.is_empty());
        Some(Self { start, end })
    }

    /// Reads `{"start": ..., "end": ...}`; a null or empty start is allowed.
    pub fn from_value(value: &Value) -> Result<Self, NavigationError> {
        let end = value
            .get("end")
            .and_then(Value::as_str)
            .ok_or_else(|| NavigationError::Parse("response has no end location".to_string()))?;
        let start = value.get("start").and_then(Value::as_str);
        Self::new(start, end)
            .ok_or_else(|| NavigationError::Parse("end location is empty".to_string()))
    }
}

fn clean(text: &str) -> String {
    text.trim().trim_matches(TRIM_CHARS).trim().to_string()
}

/// Parses the reply as JSON, or failing that the first `{...}` block in it.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let open = text.find('{')?;
    let close = open + text[open..].find('}')?;
    serde_json::from_str::<Value>(&text[open..=close])
        .ok()
        .filter(Value::is_object)
}

pub fn route_prompt(request: &str) -> String {
    format!(
        "Parse this navigation request and extract the start location (A) and end location (B).\n\
         Return a JSON object with 'start' and 'end' keys. Use null for 'start' when the user \
         gives no starting point.\n\n\
         User request: {request}\n\n\
         Response format:\n\
         {{\"start\": \"location A\", \"end\": \"location B\"}}\n\n\
         Only return the JSON, no other text."
    )
}

fn http_client() -> Result<Client, NavigationError> {
    Client::builder()
        .timeout(AI_TIMEOUT)
        .build()
        .map_err(|err| NavigationError::Ai(err.to_string()))
}

/// Sends `request` and decodes a successful JSON reply.
async fn send_for_reply<T>(request: RequestBuilder) -> Result<T, NavigationError>
where
    T: DeserializeOwned,
{
    let response = request
        .send()
        .await
        .map_err(|err| NavigationError::Ai(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        warn!(status = %status, "AI request failed");
        return Err(NavigationError::Ai(format!("HTTP {status}: {}", text.trim())));
    }

    response
        .json()
        .await
        .map_err(|err| NavigationError::Ai(format!("invalid response: {err}")))
}

fn route_from_reply(content: Option<&str>) -> Result<RouteRequest, NavigationError> {
    let content =
        content.ok_or_else(|| NavigationError::Ai("response has no content".to_string()))?;
    let value = extract_json_object(content).ok_or_else(|| {
        NavigationError::Parse(format!("no JSON object in AI reply: {}", content.trim()))
    })?;
    RouteRequest::from_value(&value)
}

/// Builds the parser for the resolved provider.
pub fn ai_route_parser(settings: AiSettings) -> Result<Box<dyn RouteParser>, NavigationError> {
    let parser: Box<dyn RouteParser> = match settings.provider {
        AiProvider::OpenAi => Box::new(OpenAiRouteParser::new(settings)?),
        AiProvider::Anthropic => Box::new(AnthropicRouteParser::new(settings)?),
    };
    Ok(parser)
}

/// Asks an OpenAI-compatible chat-completion endpoint to extract the route.
pub struct OpenAiRouteParser {
    client: Client,
    settings: AiSettings,
}

impl OpenAiRouteParser {
    pub fn new(settings: AiSettings) -> Result<Self, NavigationError> {
        Ok(Self {
            client: http_client()?,
            settings,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl RouteParser for OpenAiRouteParser {
    async fn parse(&self, request: &str) -> Result<RouteRequest, NavigationError> {
        let body = ChatRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage::user(route_prompt(request))],
            stream: false,
            temperature: Some(0.7),
            max_tokens: Some(ROUTE_MAX_TOKENS),
        };
        let url = construct_api_url(&self.settings.base_url, "chat/completions");
        debug!(url = %url, model = %self.settings.model, "Requesting route extraction");

        let completion: ChatCompletionResponse = send_for_reply(
            self.client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.settings.api_key))
                .header("Content-Type", "application/json")
                .json(&body),
        )
        .await?;
        route_from_reply(completion.first_content())
    }
}

/// Asks Anthropic's messages endpoint to extract the route.
pub struct AnthropicRouteParser {
    client: Client,
    settings: AiSettings,
}

impl AnthropicRouteParser {
    pub fn new(settings: AiSettings) -> Result<Self, NavigationError> {
        Ok(Self {
            client: http_client()?,
            settings,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl RouteParser for AnthropicRouteParser {
    async fn parse(&self, request: &str) -> Result<RouteRequest, NavigationError> {
        let body = MessagesRequest {
            model: self.settings.model.clone(),
            max_tokens: ROUTE_MAX_TOKENS,
            messages: vec![ChatMessage::user(route_prompt(request))],
        };
        let url = construct_api_url(&self.settings.base_url, "messages");
        debug!(url = %url, model = %self.settings.model, "Requesting route extraction");

        let message: MessagesResponse = send_for_reply(
            self.client
                .post(&url)
                .header("x-api-key", &self.settings.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("Content-Type", "application/json")
                .json(&body),
        )
        .await?;
        route_from_reply(message.first_text())
    }
}

/// Offline parser for the common phrasings: `从A到B`, `A到B`, `去B`,
/// `from A to B` and `to B`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternRouteParser;

impl PatternRouteParser {
    pub fn parse_text(&self, request: &str) -> Option<RouteRequest> {
        let text = request.trim();
        parse_chinese(text).or_else(|| parse_english(text))
    }
}

fn parse_chinese(text: &str) -> Option<RouteRequest> {
    if let Some(index) = text.find('从') {
        let rest = &text[index + '从'.len_utf8()..];
        if let Some(split) = rest.find(['到', '去']) {
            let separator = rest[split..].chars().next()?;
            let (start, end) = (&rest[..split], &rest[split + separator.len_utf8()..]);
            return RouteRequest::new(Some(start), end);
        }
    }
    if let Some((start, end)) = text.split_once('到') {
        if !clean(start).is_empty() {
            return RouteRequest::new(Some(start), end);
        }
    }
    let index = text.find(['去', '到'])?;
    let separator = text[index..].chars().next()?;
    RouteRequest::new(None, &text[index + separator.len_utf8()..])
}

fn parse_english(text: &str) -> Option<RouteRequest> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    if let Some(from) = lower.find("from ") {
        let after_from = from + "from ".len();
        if let Some(to) = lower[after_from..].find(" to ") {
            let to = after_from + to;
            return RouteRequest::new(Some(&text[after_from..to]), &text[to + " to ".len()..]);
        }
    }
    let to = if lower.starts_with("to ") {
        0
    } else {
        lower.find(" to ")? + 1
    };
    RouteRequest::new(None, &text[to + "to ".len()..])
}

#[async_trait]
impl RouteParser for PatternRouteParser {
    async fn parse(&self, request: &str) -> Result<RouteRequest, NavigationError> {
        self.parse_text(request).ok_or_else(|| {
            NavigationError::Parse(format!("could not find a destination in '{}'", request.trim()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn parsed(text: &str) -> Option<(Option<String>, String)> {
        PatternRouteParser
            .parse_text(text)
            .map(|route| (route.start, route.end))
    }

    fn pair(start: Option<&str>, end: &str) -> Option<(Option<String>, String)> {
        Some((start.map(str::to_string), end.to_string()))
    }

    #[test]
    fn parses_chinese_phrasings() {
        assert_eq!(parsed("从北京到上海"), pair(Some("北京"), "上海"));
        assert_eq!(parsed("我要从广州去深圳。"), pair(Some("广州"), "深圳"));
        assert_eq!(parsed("北京西站到首都机场"), pair(Some("北京西站"), "首都机场"));
        assert_eq!(parsed("我想去天安门"), pair(None, "天安门"));
        assert_eq!(parsed("到上海"), pair(None, "上海"));
    }

    #[test]
    fn parses_english_phrasings() {
        assert_eq!(
            parsed("From Beijing to Shanghai"),
            pair(Some("Beijing"), "Shanghai")
        );
        assert_eq!(
            parsed("navigate to the Forbidden City!"),
            pair(None, "the Forbidden City")
        );
        assert_eq!(parsed("to Hangzhou"), pair(None, "Hangzhou"));
    }

    #[test]
    fn rejects_requests_without_destination() {
        assert_eq!(parsed("hello there"), None);
        assert_eq!(parsed("从北京到"), None);
        assert_eq!(parsed(""), None);
    }

    #[test]
    fn extracts_json_from_chatty_reply() {
        assert_eq!(
            extract_json_object("{\"start\": \"A\", \"end\": \"B\"}"),
            Some(json!({"start": "A", "end": "B"}))
        );
        assert_eq!(
            extract_json_object("Sure! Here it is:\n{\"start\": null, \"end\": \"上海\"}\nEnjoy."),
            Some(json!({"start": null, "end": "上海"}))
        );
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object("[1, 2]"), None);
    }

    #[test]
    fn route_from_value_requires_end() {
        let route = RouteRequest::from_value(&json!({"start": "", "end": " 上海 "})).unwrap();
        assert_eq!(route.start, None);
        assert_eq!(route.end, "上海");
        assert!(RouteRequest::from_value(&json!({"start": "A"})).is_err());
        assert!(RouteRequest::from_value(&json!({"end": ""})).is_err());
    }

    async fn serve_once(status: &str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/v1"), handle)
    }

    fn settings(base_url: String) -> AiSettings {
        AiSettings {
            provider: AiProvider::OpenAi,
            base_url,
            model: "test-model".to_string(),
            api_key: "sk-test-key".to_string(),
        }
    }

    fn clear_proxy_env() {
        for key in [
            "HTTP_PROXY",
            "http_proxy",
            "HTTPS_PROXY",
            "https_proxy",
            "ALL_PROXY",
            "all_proxy",
        ] {
            std::env::remove_var(key);
        }
        std::env::set_var("NO_PROXY", "*");
    }

    #[tokio::test]
    async fn openai_parser_posts_prompt_and_reads_reply() {
        clear_proxy_env();
        let reply = json!({
            "choices": [{"message": {"role": "assistant", "content": "```json\n{\"start\": \"北京\", \"end\": \"上海\"}\n```"}}]
        });
        let (base_url, server) = serve_once("200 OK", reply.to_string()).await;

        let parser = OpenAiRouteParser::new(settings(base_url)).unwrap();
        let route = parser.parse("从北京到上海").await.unwrap();
        assert_eq!(route.start.as_deref(), Some("北京"));
        assert_eq!(route.end, "上海");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /v1/chat/completions"));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: bearer sk-test-key"));
        assert!(request.contains("\"model\":\"test-model\""));
    }

    #[tokio::test]
    async fn openai_parser_reports_http_errors() {
        clear_proxy_env();
        let (base_url, _server) =
            serve_once("401 Unauthorized", "{\"error\": \"bad key\"}".to_string()).await;

        let parser = OpenAiRouteParser::new(settings(base_url)).unwrap();
        let err = parser.parse("去上海").await.unwrap_err();
        assert!(matches!(err, NavigationError::Ai(ref message) if message.contains("401")));
    }

    #[tokio::test]
    async fn anthropic_parser_uses_messages_api() {
        clear_proxy_env();
        let reply = json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "{\"start\": null, \"end\": \"西湖\"}"}]
        });
        let (base_url, server) = serve_once("200 OK", reply.to_string()).await;

        let parser = ai_route_parser(AiSettings {
            provider: AiProvider::Anthropic,
            ..settings(base_url)
        })
        .unwrap();
        let route = parser.parse("我想去西湖").await.unwrap();
        assert_eq!(route.start, None);
        assert_eq!(route.end, "西湖");

        let request = server.await.unwrap();
        let lowered = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /v1/messages"), "{request}");
        assert!(lowered.contains("x-api-key: sk-test-key"));
        assert!(lowered.contains("anthropic-version: 2023-06-01"));
        assert!(!lowered.contains("authorization:"));
        assert!(request.contains("\"max_tokens\":200"));
    }

    #[tokio::test]
    async fn anthropic_reply_without_text_is_an_ai_error() {
        clear_proxy_env();
        let (base_url, _server) = serve_once("200 OK", json!({"content": []}).to_string()).await;

        let parser = AnthropicRouteParser::new(settings(base_url)).unwrap();
        assert_eq!(parser.model(), "test-model");
        let err = parser.parse("去上海").await.unwrap_err();
        assert!(matches!(err, NavigationError::Ai(_)));
    }
}
