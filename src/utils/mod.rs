pub mod prometheus_parser;
pub mod upstream_client;
