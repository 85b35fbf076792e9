//! Coarse user location from a public IP-geolocation service.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::core::navigation::{Coordinates, NavigationError};

pub const IPINFO_URL: &str = "https://ipinfo.io/json";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const CITY_NAMES: &[(&str, &str)] = &[
    ("Guangzhou", "广州"),
    ("Beijing", "北京"),
    ("Shanghai", "上海"),
    ("Shenzhen", "深圳"),
    ("Hangzhou", "杭州"),
    ("Chengdu", "成都"),
    ("Wuhan", "武汉"),
    ("Xi'an", "西安"),
    ("Chongqing", "重庆"),
    ("Nanjing", "南京"),
];

const REGION_NAMES: &[(&str, &str)] = &[
    ("Guangdong", "广东"),
    ("Beijing", "北京"),
    ("Shanghai", "上海"),
    ("Zhejiang", "浙江"),
    ("Sichuan", "四川"),
    ("Hubei", "湖北"),
    ("Shaanxi", "陕西"),
    ("Chongqing", "重庆"),
    ("Jiangsu", "江苏"),
];

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("CN", "中国"),
    ("US", "美国"),
    ("JP", "日本"),
    ("KR", "韩国"),
    ("SG", "新加坡"),
];

/// Chinese name for a known English place name, otherwise the name itself.
fn localized<'a>(table: &[(&str, &'a str)], name: &'a str) -> &'a str {
    table
        .iter()
        .find(|(english, _)| *english == name)
        .map(|(_, chinese)| *chinese)
        .unwrap_or(name)
}

/// The subset of an ipinfo.io reply that is used.
#[derive(Debug, Default, Deserialize)]
pub struct IpInfo {
    /// `"latitude,longitude"`
    #[serde(default)]
    pub loc: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl IpInfo {
    pub fn to_coordinates(&self) -> Result<Coordinates, NavigationError> {
        let invalid = |message: String| NavigationError::Geocode {
            location: "IP".to_string(),
            message,
        };
        let loc = self
            .loc
            .as_deref()
            .ok_or_else(|| invalid("reply has no loc field".to_string()))?;
        let (latitude, longitude) = loc
            .split_once(',')
            .and_then(|(lat, lng)| {
                Some((lat.trim().parse::<f64>().ok()?, lng.trim().parse::<f64>().ok()?))
            })
            .ok_or_else(|| invalid(format!("unreadable loc '{loc}'")))?;

        let city = localized(CITY_NAMES, self.city.as_deref().unwrap_or("未知城市"));
        let region = localized(REGION_NAMES, self.region.as_deref().unwrap_or_default());
        let country = localized(COUNTRY_NAMES, self.country.as_deref().unwrap_or_default());

        let name = if !region.is_empty() && region != city {
            format!("{region}{city}")
        } else {
            city.to_string()
        };
        Ok(Coordinates {
            name,
            longitude,
            latitude,
            formatted_address: format!("{country}{region}{city}"),
        })
    }
}

/// Looks the caller's public IP up on an ipinfo.io-compatible endpoint.
#[derive(Debug, Clone)]
pub struct IpLocator {
    client: Client,
    url: String,
}

impl IpLocator {
    pub fn new() -> Result<Self, NavigationError> {
        Self::with_url(IPINFO_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, NavigationError> {
        let client = Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|err| NavigationError::Geocode {
                location: "IP".to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub async fn locate(&self) -> Result<Coordinates, NavigationError> {
        let failed = |message: String| NavigationError::Geocode {
            location: "IP".to_string(),
            message,
        };
        debug!(url = %self.url, "Looking up location by IP");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| failed(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")));
        }
        let info: IpInfo = response
            .json()
            .await
            .map_err(|err| failed(format!("invalid response: {err}")))?;
        info.to_coordinates()
    }
}
