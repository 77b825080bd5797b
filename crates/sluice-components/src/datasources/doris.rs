//! Doris datasource: coordinates of the stream-load HTTP endpoint

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sluice_common::{ComponentConfig, ParamSpec};
use sluice_engine::component::{Connection, Datasource, HttpEndpoint};

#[derive(Debug, Default)]
pub struct DorisDatasource {
    endpoint: Option<HttpEndpoint>,
}

impl DorisDatasource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("host", "frontend host, http:// is added when missing"),
            ParamSpec::required("port", "frontend HTTP port"),
            ParamSpec::required("user", "user name"),
            ParamSpec::optional("password", "password"),
            ParamSpec::required("database", "database name"),
        ]
    }
}

#[async_trait]
impl Datasource for DorisDatasource {
    async fn init(&mut self, config: &ComponentConfig) -> Result<()> {
        let host = config.require("host")?;
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };

        self.endpoint = Some(HttpEndpoint {
            host,
            port: config.require("port")?.to_string(),
            user: config.require("user")?.to_string(),
            password: config.get_or("password", "").to_string(),
            database: config.require("database")?.to_string(),
        });
        Ok(())
    }

    fn connection(&self) -> Result<Connection> {
        self.endpoint
            .clone()
            .map(Connection::Http)
            .ok_or_else(|| anyhow!("doris datasource is not initialized"))
    }

    async fn close(&mut self) -> Result<()> {
        self.endpoint = None;
        Ok(())
    }
}
