use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphinatorConfig {
    pub amqp_connection: String,
    pub neo4j_uri: String,
    pub neo4j_username: String,
    pub neo4j_password: String,
    pub health_port: u16,
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub prefetch: u16,
    pub max_retries: u32,
}

impl Default for GraphinatorConfig {
    fn default() -> Self {
        Self {
            amqp_connection: "amqp://localhost:5672".to_string(),
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_username: "neo4j".to_string(),
            neo4j_password: "neo4j".to_string(),
            health_port: 8001,
            batch_size: 100,
            flush_interval_secs: 5,
            prefetch: 100,
            max_retries: 10,
        }
    }
}

impl GraphinatorConfig {
    pub fn from_env() -> Result<Self> {
        let amqp_connection = std::env::var("AMQP_CONNECTION").context("AMQP_CONNECTION environment variable is required")?;
        let neo4j_uri = std::env::var("NEO4J_URI").context("NEO4J_URI environment variable is required")?;
        let neo4j_username = std::env::var("NEO4J_USERNAME").unwrap_or_else(|_| "neo4j".to_string());
        let neo4j_password = std::env::var("NEO4J_PASSWORD").context("NEO4J_PASSWORD environment variable is required")?;

        let health_port = std::env::var("HEALTH_PORT").unwrap_or_else(|_| "8001".to_string()).parse::<u16>().unwrap_or(8001);
        let batch_size = std::env::var("NEO4J_BATCH_SIZE").unwrap_or_else(|_| "100".to_string()).parse::<usize>().unwrap_or(100);
        let flush_interval_secs = std::env::var("NEO4J_FLUSH_INTERVAL").unwrap_or_else(|_| "5".to_string()).parse::<u64>().unwrap_or(5);
        let prefetch = std::env::var("NEO4J_PREFETCH").unwrap_or_else(|_| "100".to_string()).parse::<u16>().unwrap_or(100);

        Ok(Self { amqp_connection, neo4j_uri, neo4j_username, neo4j_password, health_port, batch_size, flush_interval_secs, prefetch, ..Default::default() })
    }
}
