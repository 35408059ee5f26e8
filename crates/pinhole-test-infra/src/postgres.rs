use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const IMAGE: &str = "postgres";
const INTERNAL_PORT: u16 = 5432;
const READY_LINE: &str = "database system is ready to accept connections";

/// Credentials and image tag for [`PostgresServer`]. Everything defaults to
/// `pinhole` on a `16-alpine` image.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(default = "pinhole".to_string())]
    database: String,
    #[builder(default = "pinhole".to_string())]
    username: String,
    #[builder(default = "pinhole".to_string())]
    password: String,
    #[builder(default = "16-alpine".to_string())]
    tag: String,
}

/// A throwaway Postgres container, removed when dropped.
pub struct PostgresServer {
    container: ContainerAsync<GenericImage>,
    config: PostgresConfig,
}

impl PostgresServer {
    /// Boots the container and waits for the server's first ready line.
    ///
    /// The official image prints that line once for its init server and again
    /// after restarting for real, so the first connection attempts may still
    /// be refused. Connect in a retry loop.
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        let container = GenericImage::new(IMAGE, config.tag.as_str())
            .with_exposed_port(INTERNAL_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr(READY_LINE))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .start()
            .await?;

        Ok(Self { container, config })
    }

    pub async fn host(&self) -> Result<String> {
        Ok(self.container.get_host().await?.to_string())
    }

    /// Host port mapped to the server's 5432.
    pub async fn port(&self) -> Result<u16> {
        Ok(self.container.get_host_port_ipv4(INTERNAL_PORT).await?)
    }

    /// A `postgres://` DSN for the configured database.
    pub async fn database_url(&self) -> Result<String> {
        let PostgresConfig {
            database,
            username,
            password,
            ..
        } = &self.config;
        let host = self.host().await?;
        let port = self.port().await?;

        Ok(format!("postgres://{username}:{password}@{host}:{port}/{database}"))
    }

    pub fn container(&self) -> &ContainerAsync<GenericImage> {
        &self.container
    }
}
