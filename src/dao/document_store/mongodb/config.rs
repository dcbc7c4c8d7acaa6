use std::time::Duration;

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_DATABASE: &str = "tos_registration";
const APP_NAME: &str = "tos-registration";
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed client options plus the database holding the registration collections.
#[derive(Clone)]
pub struct MongoConfig {
    /// Driver options parsed from the URI.
    pub options: ClientOptions,
    /// Database holding the registration collections.
    pub database_name: String,

}

impl MongoConfig {
    /// Parse `uri`; the database defaults to `tos_registration`.
    ///
    /// Server selection is capped so a dead deployment fails fast and the
    /// supervisor can schedule the next attempt.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|source| MongoDaoError::InvalidUri {
                uri: uri.to_owned(),
                source,
            })?;
        options.app_name.get_or_insert_with(|| APP_NAME.to_owned());
        options
            .server_selection_timeout
            .get_or_insert(SERVER_SELECTION_TIMEOUT);

        Ok(Self {
            options,
            database_name: db_name
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_DATABASE)
                .to_owned(),
        })
    }
}
