pub mod config;
pub mod geocoding;
pub mod ip_location;
pub mod navigation;
pub mod route_parser;
