use std::sync::Arc;

use futures::{StreamExt, future::BoxFuture};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::dao::{
    document_store::{
        Document, DocumentStore, DocumentStream, FieldEquals, StoredDocument, merge_patch,
    },
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        ChangesResponse, CouchDocument, DatabaseInfo, END_SUFFIX, FindResponse, collection_prefix,
        doc_id, seq_param,
    },
};

const MAX_CONFLICT_RETRIES: u32 = 8;
const FIND_LIMIT: usize = 10_000;
const LONGPOLL_TIMEOUT_MS: u64 = 25_000;

/// CouchDB-backed [`DocumentStore`] sharing one database between collections.
#[derive(Clone)]
pub struct CouchDocumentStore {
    client: Client,
    base_url: Arc<Url>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

enum WriteOutcome {
    Written,
    Conflict,
}

impl CouchDocumentStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url =
            Url::parse(&config.base_url).map_err(|err| CouchDaoError::InvalidBaseUrl {
                url: config.base_url.clone(),
                message: err.to_string(),
            })?;
        let database = Arc::<str>::from(config.database);
        let auth = config.credentials.map(|credentials| {
            (
                Arc::<str>::from(credentials.username),
                Arc::<str>::from(credentials.password),
            )
        });

        let store = Self {
            client,
            base_url: Arc::new(base_url),
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    /// Build `{base}/{database}/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> CouchResult<Url> {
        let mut url = Url::clone(&self.base_url);
        url.path_segments_mut()
            .map_err(|()| CouchDaoError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                message: "URL cannot be a base".into(),
            })?
            .pop_if_empty()
            .push(&self.database)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.url(&[])?;

        let response = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .map_err(|source| CouchDaoError::Database {
                database: database.clone(),
                action: "query",
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .request(Method::PUT, url)
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Database {
                        database: database.clone(),
                        action: "create",
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        path: &str,
    ) -> CouchResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: path.to_owned(),
                source,
            })
    }

    async fn send(&self, builder: reqwest::RequestBuilder, path: &str) -> CouchResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_owned(),
                source,
            })
    }

    async fn fetch(&self, doc_id: &str) -> CouchResult<Option<CouchDocument>> {
        let response = self
            .send(self.request(Method::GET, self.url(&[doc_id])?), doc_id)
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::read_json(response, doc_id).await.map(Some),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    async fn put(&self, document: &CouchDocument) -> CouchResult<WriteOutcome> {
        let response = self
            .send(
                self.request(Method::PUT, self.url(&[document.id.as_str()])?)
                    .json(document),
                &document.id,
            )
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(WriteOutcome::Conflict),
            status if status.is_success() => Ok(WriteOutcome::Written),
            other => Err(CouchDaoError::RequestStatus {
                path: document.id.clone(),
                status: other,
            }),
        }
    }

    async fn remove(&self, doc_id: &str, rev: &str) -> CouchResult<Option<WriteOutcome>> {
        let response = self
            .send(
                self.request(Method::DELETE, self.url(&[doc_id])?)
                    .query(&[("rev", rev)]),
                doc_id,
            )
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::CONFLICT => Ok(Some(WriteOutcome::Conflict)),
            status if status.is_success() => Ok(Some(WriteOutcome::Written)),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_owned(),
                status: other,
            }),
        }
    }

    fn contention(doc_id: &str) -> StorageError {
        CouchDaoError::Contention {
            path: doc_id.to_owned(),
            attempts: MAX_CONFLICT_RETRIES,
        }
        .into()
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> StorageResult<()> {
        let doc_id = doc_id(collection, id);
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let rev = self.fetch(&doc_id).await?.and_then(|existing| existing.rev);
            let document = CouchDocument::new(doc_id.clone(), rev, data.clone());
            match self.put(&document).await? {
                WriteOutcome::Written => return Ok(()),
                WriteOutcome::Conflict => {
                    debug!(doc_id = %doc_id, attempt, "revision conflict on upsert; retrying")
                }
            }
        }
        Err(Self::contention(&doc_id))
    }

    async fn create(&self, collection: &str, id: &str, data: Document) -> StorageResult<()> {
        let document = CouchDocument::new(doc_id(collection, id), None, data);
        match self.put(&document).await? {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::Conflict => Err(StorageError::already_exists(collection, id)),
        }
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
        precondition: Option<FieldEquals>,
    ) -> StorageResult<Document> {
        let doc_id = doc_id(collection, id);
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let mut current = self
                .fetch(&doc_id)
                .await?
                .ok_or_else(|| StorageError::not_found(collection, id))?;
            if let Some(condition) = &precondition
                && !condition.matches(&current.body)
            {
                return Err(condition.failed(collection, id));
            }

            merge_patch(&mut current.body, patch.clone());
            match self.put(&current).await? {
                WriteOutcome::Written => return Ok(current.body),
                WriteOutcome::Conflict => {
                    debug!(doc_id = %doc_id, attempt, "revision conflict on update; retrying")
                }
            }
        }
        Err(Self::contention(&doc_id))
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Option<FieldEquals>,
    ) -> StorageResult<bool> {
        let doc_id = doc_id(collection, id);
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let Some(current) = self.fetch(&doc_id).await? else {
                return Ok(false);
            };
            if precondition
                .as_ref()
                .is_some_and(|condition| !condition.matches(&current.body))
            {
                return Ok(false);
            }
            let Some(rev) = current.rev else {
                return Ok(false);
            };

            match self.remove(&doc_id, &rev).await? {
                None => return Ok(false),
                Some(WriteOutcome::Written) => return Ok(true),
                Some(WriteOutcome::Conflict) => {
                    debug!(doc_id = %doc_id, attempt, "revision conflict on delete; retrying")
                }
            }
        }
        Err(Self::contention(&doc_id))
    }

    async fn scan(
        &self,
        collection: &str,
        filter: Option<FieldEquals>,
    ) -> StorageResult<Vec<StoredDocument>> {
        const FIND: &str = "_find";
        let prefix = collection_prefix(collection);

        let mut selector = json!({
            "_id": { "$gt": &prefix, "$lt": format!("{prefix}{END_SUFFIX}") }
        });
        if let Some(condition) = filter {
            selector[condition.field] = json!(condition.value);
        }
        let body = json!({
            "selector": selector,
            "limit": FIND_LIMIT,
            "sort": [{ "_id": "asc" }],
        });

        let response = self
            .send(self.request(Method::POST, self.url(&[FIND])?).json(&body), FIND)
            .await?;
        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: FIND.to_owned(),
                status: response.status(),
            }
            .into());
        }

        let payload: FindResponse = Self::read_json(response, FIND).await?;
        Ok(payload
            .docs
            .into_iter()
            .map(|doc| doc.into_stored(&prefix))
            .collect())
    }

    async fn update_seq(&self) -> CouchResult<String> {
        let database = self.database.to_string();
        let response = self.send(self.request(Method::GET, self.url(&[])?), &database).await?;
        if !response.status().is_success() {
            return Err(CouchDaoError::DatabaseStatus {
                database,
                status: response.status(),
            });
        }
        let info: DatabaseInfo = Self::read_json(response, &database).await?;
        Ok(seq_param(&info.update_seq))
    }

    /// One long-poll round on `_changes`, restricted to a single document id.
    async fn poll_changes(&self, doc_id: &str, since: &str) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let timeout = LONGPOLL_TIMEOUT_MS.to_string();
        let builder = self
            .request(Method::POST, self.url(&[CHANGES])?)
            .query(&[
                ("feed", "longpoll"),
                ("filter", "_doc_ids"),
                ("include_docs", "true"),
                ("since", since),
                ("timeout", timeout.as_str()),
            ])
            .json(&json!({ "doc_ids": [doc_id] }));

        let response = self.send(builder, CHANGES).await?;
        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_owned(),
                status: response.status(),
            });
        }
        Self::read_json(response, CHANGES).await
    }

    async fn watch(&self, collection: &str, id: &str) -> StorageResult<DocumentStream> {
        let doc_id = doc_id(collection, id);
        let since = self.update_seq().await?;
        let initial = self.fetch(&doc_id).await?.map(|doc| doc.body);
        let store = self.clone();

        let stream = async_stream::stream! {
            yield Ok(initial);
            let mut since = since;
            loop {
                match store.poll_changes(&doc_id, &since).await {
                    Ok(page) => {
                        for row in page.results {
                            if row.deleted {
                                yield Ok(None);
                            } else {
                                yield Ok(row.doc.map(|doc| doc.body));
                            }
                        }
                        since = seq_param(&page.last_seq);
                    }
                    Err(err) => {
                        yield Err(StorageError::from(err));
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

impl DocumentStore for CouchDocumentStore {
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let (store, doc_id) = (self.clone(), doc_id(collection, id));
        Box::pin(async move { Ok(store.fetch(&doc_id).await?.map(|doc| doc.body)) })
    }

    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let (store, collection, id) = (self.clone(), collection.to_owned(), id.to_owned());
        Box::pin(async move { store.set(&collection, &id, data).await })
    }

    fn create_document(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let (store, collection, id) = (self.clone(), collection.to_owned(), id.to_owned());
        Box::pin(async move { store.create(&collection, &id, data).await })
    }

    fn update_document(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
        precondition: Option<FieldEquals>,
    ) -> BoxFuture<'static, StorageResult<Document>> {
        let (store, collection, id) = (self.clone(), collection.to_owned(), id.to_owned());
        Box::pin(async move { store.update(&collection, &id, patch, precondition).await })
    }

    fn delete_document(&self, collection: &str, id: &str) -> BoxFuture<'static, StorageResult<bool>> {
        let (store, collection, id) = (self.clone(), collection.to_owned(), id.to_owned());
        Box::pin(async move { store.delete(&collection, &id, None).await })
    }

    fn delete_document_if(
        &self,
        collection: &str,
        id: &str,
        precondition: FieldEquals,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let (store, collection, id) = (self.clone(), collection.to_owned(), id.to_owned());
        Box::pin(async move { store.delete(&collection, &id, Some(precondition)).await })
    }

    fn query_equals(
        &self,
        collection: &str,
        filter: FieldEquals,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>> {
        let (store, collection) = (self.clone(), collection.to_owned());
        Box::pin(async move { store.scan(&collection, Some(filter)).await })
    }

    fn list_documents(
        &self,
        collection: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<StoredDocument>>> {
        let (store, collection) = (self.clone(), collection.to_owned());
        Box::pin(async move { store.scan(&collection, None).await })
    }

    fn watch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<DocumentStream>> {
        let (store, collection, id) = (self.clone(), collection.to_owned(), id.to_owned());
        Box::pin(async move { store.watch(&collection, &id).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let database = store.database.to_string();
            let response = store
                .send(store.request(Method::GET, store.url(&[])?), &database)
                .await?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: database,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
