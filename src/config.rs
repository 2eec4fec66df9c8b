use std::env::var;

use dotenvy::dotenv;

use crate::infrastructure::messaging::jetstream::JetstreamConfig;

pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub nats_url: String,
    pub gateway_base_url: String,
    pub gateway_api_key: String,
    pub default_country_code: String,
}

impl Config {
    pub fn try_parse() -> Result<Config, &'static str> {
        let _ = dotenv();

        Ok(Config {
            database_url: var("DATABASE_URL")
                .map_err(|_| "An error occured while getting DATABASE_URL env param")?,
            redis_url: var("REDIS_URL")
                .map_err(|_| "An error occured while getting REDIS_URL env param")?,
            nats_url: var("NATS_URL")
                .map_err(|_| "An error occured while getting NATS_URL env param")?,
            gateway_base_url: var("GATEWAY_BASE_URL")
                .map_err(|_| "An error occured while getting GATEWAY_BASE_URL env param")?,
            gateway_api_key: var("GATEWAY_API_KEY")
                .map_err(|_| "An error occured while getting GATEWAY_API_KEY env param")?,
            default_country_code: var("DEFAULT_COUNTRY_CODE").unwrap_or_else(|_| "55".to_string()),
        })
    }

    pub fn jetstream(&self) -> JetstreamConfig {
        JetstreamConfig {
            url: self.nats_url.clone(),
            ..JetstreamConfig::default()
        }
    }
}
