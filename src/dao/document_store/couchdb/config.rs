use std::env;

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_DATABASE: &str = "tos_registration";

/// Basic-auth pair sent with every CouchDB request.
#[derive(Debug, Clone)]
pub struct CouchCredentials {
    /// Basic-auth user.
    pub username: String,
    /// Basic-auth password.
    pub password: String,

}

/// Server and database the registration documents live in.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server root, e.g. `http://localhost:5984`.
    pub base_url: String,
    /// Database holding every collection.
    pub database: String,
    /// Sent as basic auth when present.
    pub credentials: Option<CouchCredentials>,

}

impl CouchConfig {
    /// Read `COUCH_BASE_URL` (required), `COUCH_DB`, and the optional
    /// `COUCH_USERNAME`/`COUCH_PASSWORD` pair.
    ///
    /// A username without a password, or the reverse, is rejected rather
    /// than silently sending anonymous requests.
    pub fn from_env() -> CouchResult<Self> {
        let base_url = env::var("COUCH_BASE_URL").map_err(|_| CouchDaoError::MissingEnvVar {
            var: "COUCH_BASE_URL",
        })?;
        let database = env::var("COUCH_DB")
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE.to_owned());

        let credentials = match (env::var("COUCH_USERNAME").ok(), env::var("COUCH_PASSWORD").ok()) {
            (Some(username), Some(password)) => Some(CouchCredentials { username, password }),
            (None, None) => None,
            (Some(_), None) => {
                return Err(CouchDaoError::MissingEnvVar {
                    var: "COUCH_PASSWORD",
                });
            }
            (None, Some(_)) => {
                return Err(CouchDaoError::MissingEnvVar {
                    var: "COUCH_USERNAME",
                });
            }
        };

        Ok(Self {
            base_url,
            database,
            credentials,
        })
    }
}
