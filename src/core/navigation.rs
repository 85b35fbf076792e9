//! The five-step navigation pipeline and the collaborators it drives.

use async_trait::async_trait;
use reqwest::Url;
use std::error::Error as StdError;
use std::fmt;
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::core::route_parser::RouteRequest;
use crate::mcp::gateway::GatewayError;

pub const AMAP_NAVIGATION_URL: &str = "https://uri.amap.com/navigation";

/// Start locations that mean "wherever the user is now".
pub const CURRENT_LOCATION_KEYWORDS: &[&str] = &[
    "当前位置",
    "我的位置",
    "current location",
    "这里",
    "此地",
];

#[derive(Debug)]
pub enum NavigationError {
    /// The request text could not be turned into a route.
    Parse(String),
    Geocode { location: String, message: String },
    Browser(String),
    Gateway(GatewayError),
    /// The chat-completion service failed or answered nonsense.
    Ai(String),
}

impl fmt::Display for NavigationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigationError::Parse(message) => write!(f, "Failed to parse request: {message}"),
            NavigationError::Geocode { location, message } => {
                write!(f, "Failed to geocode location '{location}': {message}")
            }
            NavigationError::Browser(message) => write!(f, "Failed to open browser: {message}"),
            NavigationError::Gateway(source) => write!(f, "{source}"),
            NavigationError::Ai(message) => write!(f, "AI request failed: {message}"),
        }
    }
}

impl StdError for NavigationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            NavigationError::Gateway(source) => Some(source),
            _ => None,
        }
    }
}

impl From<GatewayError> for NavigationError {
    fn from(err: GatewayError) -> Self {
        NavigationError::Gateway(err)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub formatted_address: String,
}

impl Coordinates {
    /// Used when every way of locating the user has failed.
    pub fn default_location() -> Self {
        Self {
            name: "北京市".to_string(),
            longitude: 116.4074,
            latitude: 39.9042,
            formatted_address: "中国北京市".to_string(),
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.longitude, self.latitude)
    }
}

#[async_trait]
pub trait RouteParser: Send + Sync {
    async fn parse(&self, request: &str) -> Result<RouteRequest, NavigationError>;
}

#[async_trait]
pub trait LocationResolver: Send {
    /// Makes the backend usable and describes what was connected.
    async fn connect(&mut self) -> Result<String, NavigationError>;

    async fn resolve(&mut self, name: &str) -> Result<Coordinates, NavigationError>;

    /// Best effort; falls back to [`Coordinates::default_location`].
    async fn current_location(&mut self) -> Coordinates;
}

pub trait BrowserOpener {
    fn open(&self, url: &str) -> Result<(), NavigationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationStep {
    Connect,
    ParseRequest,
    StartLocation,
    EndLocation,
    OpenBrowser,
}

impl NavigationStep {
    pub const TOTAL: usize = 5;

    pub fn number(self) -> usize {
        match self {
            NavigationStep::Connect => 1,
            NavigationStep::ParseRequest => 2,
            NavigationStep::StartLocation => 3,
            NavigationStep::EndLocation => 4,
            NavigationStep::OpenBrowser => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NavigationStep::Connect => "Connecting to geocoding service",
            NavigationStep::ParseRequest => "Parsing request",
            NavigationStep::StartLocation => "Getting coordinates for start location",
            NavigationStep::EndLocation => "Getting coordinates for end location",
            NavigationStep::OpenBrowser => "Opening navigation in browser",
        }
    }
}

/// Receives progress of each pipeline step.
pub trait StepReporter {
    fn started(&mut self, step: NavigationStep);
    fn succeeded(&mut self, step: NavigationStep, detail: &str);
    fn failed(&mut self, step: NavigationStep, error: &NavigationError);
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationOutcome {
    pub start: Coordinates,
    pub end: Coordinates,
    pub url: String,
}

pub fn is_current_location(start: Option<&str>) -> bool {
    match start {
        None => true,
        Some(name) => {
            let name = name.trim();
            name.is_empty()
                || CURRENT_LOCATION_KEYWORDS
                    .iter()
                    .any(|keyword| name.to_lowercase().contains(keyword))
        }
    }
}

/// Builds the Amap navigation link between two resolved points.
pub fn navigation_url(start: &Coordinates, end: &Coordinates) -> String {
    let point = |c: &Coordinates| format!("{},{},{}", c.longitude, c.latitude, c.name);
    // The base is a constant, so parsing cannot fail.
    let mut url = match Url::parse(AMAP_NAVIGATION_URL) {
        Ok(url) => url,
        Err(_) => return AMAP_NAVIGATION_URL.to_string(),
    };
    url.query_pairs_mut()
        .append_pair("from", &point(start))
        .append_pair("to", &point(end))
        .append_pair("mode", "car")
        .append_pair("policy", "1")
        .append_pair("src", "ai-navigator")
        .append_pair("coordinate", "gaode")
        .append_pair("callnative", "0");
    url.to_string()
}

/// Opens URLs with the platform's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowserOpener;

impl BrowserOpener for SystemBrowserOpener {
    fn open(&self, url: &str) -> Result<(), NavigationError> {
        let mut command = if cfg!(target_os = "macos") {
            let mut command = Command::new("open");
            command.arg(url);
            command
        } else if cfg!(target_os = "windows") {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", "", url]);
            command
        } else {
            let mut command = Command::new("xdg-open");
            command.arg(url);
            command
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|err| NavigationError::Browser(err.to_string()))
    }
}

fn report<T>(
    reporter: &mut dyn StepReporter,
    step: NavigationStep,
    result: Result<T, NavigationError>,
    detail: impl FnOnce(&T) -> String,
) -> Result<T, NavigationError> {
    match &result {
        Ok(value) => reporter.succeeded(step, &detail(value)),
        Err(err) => reporter.failed(step, err),
    }
    result
}

/// Runs connect, parse, start lookup, end lookup and browser launch in
/// order, stopping at the first failure.
pub async fn navigate(
    request: &str,
    parser: &dyn RouteParser,
    resolver: &mut dyn LocationResolver,
    opener: &dyn BrowserOpener,
    reporter: &mut dyn StepReporter,
) -> Result<NavigationOutcome, NavigationError> {
    reporter.started(NavigationStep::Connect);
    let connected = resolver.connect().await;
    report(reporter, NavigationStep::Connect, connected, |detail| detail.clone())?;

    reporter.started(NavigationStep::ParseRequest);
    let parsed = parser.parse(request).await;
    let route = report(reporter, NavigationStep::ParseRequest, parsed, |route| {
        format!(
            "Parsed: {} → {}",
            route.start.as_deref().unwrap_or("当前位置"),
            route.end
        )
    })?;
    debug!(start = ?route.start, end = %route.end, "Parsed route");

    reporter.started(NavigationStep::StartLocation);
    let start = if is_current_location(route.start.as_deref()) {
        Ok(resolver.current_location().await)
    } else {
        let name = route.start.as_deref().unwrap_or_default();
        resolver.resolve(name).await
    };
    let start = report(reporter, NavigationStep::StartLocation, start, |c| {
        format!("Start: {c}")
    })?;

    reporter.started(NavigationStep::EndLocation);
    let end = resolver.resolve(&route.end).await;
    let end = report(reporter, NavigationStep::EndLocation, end, |c| {
        format!("End: {c}")
    })?;

    reporter.started(NavigationStep::OpenBrowser);
    let url = navigation_url(&start, &end);
    let opened = opener.open(&url);
    report(reporter, NavigationStep::OpenBrowser, opened, |_| {
        format!("Navigation opened from {} to {}", start.name, end.name)
    })?;
    info!(url = %url, "Navigation opened");

    Ok(NavigationOutcome { start, end, url })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedParser(Result<RouteRequest, String>);

    #[async_trait]
    impl RouteParser for FixedParser {
        async fn parse(&self, _request: &str) -> Result<RouteRequest, NavigationError> {
            self.0.clone().map_err(NavigationError::Parse)
        }
    }

    #[derive(Default)]
    struct TableResolver {
        fail_connect: bool,
        resolved: Vec<String>,
        current_lookups: usize,
    }

    #[async_trait]
    impl LocationResolver for TableResolver {
        async fn connect(&mut self) -> Result<String, NavigationError> {
            if self.fail_connect {
                Err(NavigationError::Geocode {
                    location: String::new(),
                    message: "no geocoding tool".to_string(),
                })
            } else {
                Ok("connected".to_string())
            }
        }

        async fn resolve(&mut self, name: &str) -> Result<Coordinates, NavigationError> {
            self.resolved.push(name.to_string());
            match name {
                "上海" => Ok(Coordinates {
                    name: name.to_string(),
                    longitude: 121.4737,
                    latitude: 31.2304,
                    formatted_address: "上海市".to_string(),
                }),
                "广州" => Ok(Coordinates {
                    name: name.to_string(),
                    longitude: 113.2644,
                    latitude: 23.1291,
                    formatted_address: "广东省广州市".to_string(),
                }),
                other => Err(NavigationError::Geocode {
                    location: other.to_string(),
                    message: "Invalid response format".to_string(),
                }),
            }
        }

        async fn current_location(&mut self) -> Coordinates {
            self.current_lookups += 1;
            Coordinates::default_location()
        }
    }

    #[derive(Default)]
    struct RecordingOpener(Mutex<Vec<String>>);

    impl BrowserOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<(), NavigationError> {
            self.0.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingReporter(Vec<String>);

    impl StepReporter for RecordingReporter {
        fn started(&mut self, step: NavigationStep) {
            self.0.push(format!("start {}", step.number()));
        }
        fn succeeded(&mut self, step: NavigationStep, _detail: &str) {
            self.0.push(format!("ok {}", step.number()));
        }
        fn failed(&mut self, step: NavigationStep, _error: &NavigationError) {
            self.0.push(format!("fail {}", step.number()));
        }
    }

    fn route(start: Option<&str>, end: &str) -> FixedParser {
        FixedParser(Ok(RouteRequest {
            start: start.map(str::to_string),
            end: end.to_string(),
        }))
    }

    fn query_value(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn recognizes_current_location_phrases() {
        assert!(is_current_location(None));
        assert!(is_current_location(Some("  ")));
        assert!(is_current_location(Some("我的位置")));
        assert!(is_current_location(Some("Current Location")));
        assert!(!is_current_location(Some("北京西站")));
    }

    #[test]
    fn builds_amap_url_with_encoded_names() {
        let start = Coordinates::default_location();
        let end = Coordinates {
            name: "上海 虹桥".to_string(),
            longitude: 121.32,
            latitude: 31.19,
            formatted_address: String::new(),
        };
        let url = navigation_url(&start, &end);

        assert!(url.starts_with("https://uri.amap.com/navigation?"));
        assert!(!url.contains(' '));
        assert_eq!(
            query_value(&url, "from").as_deref(),
            Some("116.4074,39.9042,北京市")
        );
        assert_eq!(
            query_value(&url, "to").as_deref(),
            Some("121.32,31.19,上海 虹桥")
        );
        assert_eq!(query_value(&url, "mode").as_deref(), Some("car"));
        assert_eq!(query_value(&url, "policy").as_deref(), Some("1"));
        assert_eq!(query_value(&url, "src").as_deref(), Some("ai-navigator"));
        assert_eq!(query_value(&url, "coordinate").as_deref(), Some("gaode"));
        assert_eq!(query_value(&url, "callnative").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn runs_all_five_steps() {
        let parser = route(Some("广州"), "上海");
        let mut resolver = TableResolver::default();
        let opener = RecordingOpener::default();
        let mut reporter = RecordingReporter::default();

        let outcome = navigate("从广州到上海", &parser, &mut resolver, &opener, &mut reporter)
            .await
            .unwrap();

        assert_eq!(outcome.start.name, "广州");
        assert_eq!(outcome.end.name, "上海");
        assert_eq!(resolver.resolved, vec!["广州", "上海"]);
        assert_eq!(opener.0.lock().unwrap().as_slice(), &[outcome.url.clone()]);
        assert_eq!(
            reporter.0,
            vec![
                "start 1", "ok 1", "start 2", "ok 2", "start 3", "ok 3", "start 4", "ok 4",
                "start 5", "ok 5"
            ]
        );
    }

    #[tokio::test]
    async fn missing_start_uses_current_location() {
        let parser = route(None, "上海");
        let mut resolver = TableResolver::default();
        let opener = RecordingOpener::default();
        let mut reporter = RecordingReporter::default();

        let outcome = navigate("去上海", &parser, &mut resolver, &opener, &mut reporter)
            .await
            .unwrap();

        assert_eq!(resolver.current_lookups, 1);
        assert_eq!(resolver.resolved, vec!["上海"]);
        assert_eq!(outcome.start, Coordinates::default_location());
    }

    #[tokio::test]
    async fn aborts_at_first_failed_step() {
        let parser = route(Some("火星"), "上海");
        let mut resolver = TableResolver::default();
        let opener = RecordingOpener::default();
        let mut reporter = RecordingReporter::default();

        let err = navigate("从火星到上海", &parser, &mut resolver, &opener, &mut reporter)
            .await
            .unwrap_err();

        assert!(matches!(err, NavigationError::Geocode { ref location, .. } if location == "火星"));
        assert_eq!(resolver.resolved, vec!["火星"]);
        assert!(opener.0.lock().unwrap().is_empty());
        assert_eq!(reporter.0.last().map(String::as_str), Some("fail 3"));
    }

    #[tokio::test]
    async fn connect_failure_stops_before_parsing() {
        let parser = FixedParser(Err("should not be reached".to_string()));
        let mut resolver = TableResolver {
            fail_connect: true,
            ..Default::default()
        };
        let opener = RecordingOpener::default();
        let mut reporter = RecordingReporter::default();

        let result = navigate("anything", &parser, &mut resolver, &opener, &mut reporter).await;

        assert!(result.is_err());
        assert_eq!(reporter.0, vec!["start 1", "fail 1"]);
    }
}
