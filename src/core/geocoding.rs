//! Location lookup through geocoding tools exposed by an MCP server.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::core::ip_location::IpLocator;
use crate::core::navigation::{Coordinates, LocationResolver, NavigationError};
use crate::mcp::endpoint::EndpointConfig;
use crate::mcp::gateway::ToolGateway;

/// Geocoding tools in order of preference, with the argument each expects.
pub const GEOCODING_TOOLS: &[(&str, &str)] = &[
    ("maps_geo", "address"),
    ("maps_text_search", "keywords"),
    ("geocode", "address"),
];

/// Tools tried, in order, to locate the user.
pub const POSITIONING_TOOLS: &[&str] = &["get_location", "ip_location"];

const CURRENT_LOCATION_NAME: &str = "当前位置";

/// Resolves names by calling geocoding tools through the gateway, so every
/// lookup is permission-checked and audited.
pub struct McpLocationResolver<'a> {
    gateway: &'a mut ToolGateway,
    endpoint: EndpointConfig,
    ip_locator: Option<IpLocator>,
}

impl<'a> McpLocationResolver<'a> {
    pub fn new(gateway: &'a mut ToolGateway, endpoint: EndpointConfig) -> Self {
        Self {
            gateway,
            endpoint,
            ip_locator: None,
        }
    }

    /// Tried after the server's positioning tools, before the default.
    pub fn with_ip_locator(mut self, locator: IpLocator) -> Self {
        self.ip_locator = Some(locator);
        self
    }

    fn server(&self) -> &str {
        &self.endpoint.name
    }

    /// First preferred geocoding tool the server offers.
    pub fn geocoding_tool(&self) -> Option<(&'static str, &'static str)> {
        GEOCODING_TOOLS
            .iter()
            .copied()
            .find(|(tool, _)| self.gateway.has_tool(self.server(), tool))
    }

    async fn call(&mut self, tool: &str, arguments: Value) -> Result<Value, NavigationError> {
        let server = self.endpoint.name.clone();
        // Lookups run unattended; anything needing a prompt is refused.
        Ok(self.gateway.call_tool(&server, tool, arguments, true).await?)
    }
}

#[async_trait]
impl LocationResolver for McpLocationResolver<'_> {
    async fn connect(&mut self) -> Result<String, NavigationError> {
        if !self.gateway.is_registered(self.server()) {
            self.gateway.register_server(self.endpoint.clone()).await?;
        }
        match self.geocoding_tool() {
            Some((tool, _)) => Ok(format!(
                "Connected to MCP server '{}' with geocoding tool {tool}",
                self.server()
            )),
            None => {
                let available: Vec<String> = self
                    .gateway
                    .server_capabilities(self.server())?
                    .into_iter()
                    .map(|record| record.tool_name)
                    .collect();
                Err(NavigationError::Geocode {
                    location: String::new(),
                    message: format!(
                        "no geocoding tool on server '{}' (available: {})",
                        self.server(),
                        available.join(", ")
                    ),
                })
            }
        }
    }

    async fn resolve(&mut self, name: &str) -> Result<Coordinates, NavigationError> {
        let Some((tool, argument)) = self.geocoding_tool() else {
            return Err(NavigationError::Geocode {
                location: name.to_string(),
                message: "no geocoding tool available".to_string(),
            });
        };
        debug!(tool, location = %name, "Geocoding location");
        let mut arguments = Map::new();
        arguments.insert(argument.to_string(), Value::from(name));
        let result = self.call(tool, Value::Object(arguments)).await?;
        parse_geocode_result(name, &result)
    }

    async fn current_location(&mut self) -> Coordinates {
        for tool in POSITIONING_TOOLS {
            if !self.gateway.has_tool(self.server(), tool) {
                continue;
            }
            let located = match self.call(tool, json!({})).await {
                Ok(result) => parse_geocode_result(CURRENT_LOCATION_NAME, &result),
                Err(err) => Err(err),
            };
            match located {
                Ok(coordinates) => return coordinates,
                Err(err) => warn!(tool, error = %err, "Positioning attempt failed"),
            }
        }
        if let Some(locator) = &self.ip_locator {
            match locator.locate().await {
                Ok(coordinates) => return coordinates,
                Err(err) => warn!(error = %err, "IP location lookup failed"),
            }
        }
        warn!("Could not determine current location; using default");
        Coordinates::default_location()
    }
}

fn parse_lng_lat(location: &str) -> Option<(f64, f64)> {
    let (lng, lat) = location.split_once(',')?;
    Some((lng.trim().parse().ok()?, lat.trim().parse().ok()?))
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn text_field<'v>(value: &'v Value, key: &str) -> &'v str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Reads coordinates out of a tool result whose first content block holds
/// JSON text in one of three shapes: `results[0].location` ("lng,lat"),
/// `pois[0].location`, or `{status: "success", location: {longitude, latitude}}`.
pub fn parse_geocode_result(name: &str, result: &Value) -> Result<Coordinates, NavigationError> {
    let invalid = |message: &str| NavigationError::Geocode {
        location: name.to_string(),
        message: message.to_string(),
    };

    let text = result
        .get("content")
        .and_then(|content| content.get(0))
        .and_then(|block| block.get("text"))
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| invalid("Invalid response format"))?;
    let data: Value = serde_json::from_str(text)
        .map_err(|err| invalid(&format!("response is not JSON: {err}")))?;

    let first = |field: &str| data.get(field).and_then(|items| items.get(0)).cloned();

    if let Some(item) = first("results") {
        if let Some((longitude, latitude)) = parse_lng_lat(text_field(&item, "location")) {
            return Ok(Coordinates {
                name: name.to_string(),
                longitude,
                latitude,
                formatted_address: format!(
                    "{}{}",
                    text_field(&item, "province"),
                    text_field(&item, "city")
                ),
            });
        }
    } else if let Some(poi) = first("pois") {
        if let Some((longitude, latitude)) = parse_lng_lat(text_field(&poi, "location")) {
            let address = text_field(&poi, "address");
            return Ok(Coordinates {
                name: name.to_string(),
                longitude,
                latitude,
                formatted_address: if address.is_empty() {
                    name.to_string()
                } else {
                    address.to_string()
                },
            });
        }
    } else if data.get("status").and_then(Value::as_str) == Some("success") {
        if let Some(location) = data.get("location") {
            let longitude = location.get("longitude").and_then(number);
            let latitude = location.get("latitude").and_then(number);
            if let (Some(longitude), Some(latitude)) = (longitude, latitude) {
                let address = text_field(&data, "formatted_address");
                return Ok(Coordinates {
                    name: name.to_string(),
                    longitude,
                    latitude,
                    formatted_address: if address.is_empty() {
                        name.to_string()
                    } else {
                        address.to_string()
                    },
                });
            }
        }
    }

    Err(invalid("Invalid response format"))
}
