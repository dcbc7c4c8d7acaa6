use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::timeout;
use tracing::debug;

use super::error::{MongoDaoError, MongoResult};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a client and check the deployment answers one ping.
///
/// Retries belong to the storage supervisor, which backs off between calls.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    match timeout(PING_TIMEOUT, database.run_command(doc! { "ping": 1 })).await {
        Ok(Ok(_)) => {
            debug!(database = database_name, "MongoDB answered initial ping");
            Ok((client, database))
        }
        Ok(Err(source)) => Err(MongoDaoError::InitialPing { source }),
        Err(_) => Err(MongoDaoError::PingTimeout {
            database: database_name.to_owned(),
            after: PING_TIMEOUT,
        }),
    }
}
