use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Bson, Document as BsonDocument, doc},
    change_stream::event::OperationType,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{FullDocumentType, IndexOptions},
};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::MongoDocument,
};
use crate::dao::{
    document_store::{
        Document, DocumentStore, DocumentStream, FieldEquals, StoredDocument, merge_patch,
    },
    storage::{StorageError, StorageResult},
};

const DUPLICATE_KEY_CODE: i32 = 11000;
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Secondary indexes backing the equality queries issued by the registration flow.
const INDEXES: &[(&str, &str, &str)] = &[
    ("tos_invites", "inviter_email", "invite_inviter_idx"),
    ("tos_invites", "invitee_email", "invite_invitee_idx"),
    ("users", "email", "user_email_idx"),
    ("orders", "userId", "order_user_idx"),
    ("tos_leaderboard", "rank", "leaderboard_rank_idx"),
];

/// MongoDB-backed [`DocumentStore`]; one collection per document collection.
///
/// Watches rely on change streams and therefore need a replica set.
#[derive(Clone)]
pub struct MongoDocumentStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    /// Ping the deployment through the admin database.
    async fn ping(&self) -> MongoResult<()> {
        let client = {
            let guard = self.state.read().await;
            guard.client.clone()
        };

        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

fn by_id(id: &str) -> BsonDocument {
    doc! { "_id": id }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE
    )
}

/// Match the stored revision; revision 0 also covers documents written by other tools.
fn revision_filter(id: &str, rev: i64) -> BsonDocument {
    let rev = if rev == 0 {
        Bson::Document(doc! { "$in": [0_i64, Bson::Null] })
    } else {
        Bson::Int64(rev)
    };
    doc! { "_id": id, "_rev": rev }
}

impl MongoDocumentStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        for &(collection, field, name) in INDEXES {
            let mut keys = BsonDocument::new();
            keys.insert(field, 1_i32);
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(Some(name.to_owned())).build())
                .build();

            database
                .collection::<BsonDocument>(collection)
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: field,
                    source,
                })?;
        }
        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection(&self, name: &str) -> Collection<MongoDocument> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<MongoDocument>(name)
    }

    async fn find(&self, collection: &str, id: &str) -> StorageResult<Option<MongoDocument>> {
        self.collection(collection)
            .await
            .find_one(by_id(id))
            .await
            .map_err(|source| {
                MongoDaoError::Load {
                    collection: collection.to_owned(),
                    id: id.to_owned(),
                    source,
                }
                .into()
            })
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> StorageResult<()> {
        let rev = self.find(collection, id).await?.map_or(0, |doc| doc.rev);
        let document = MongoDocument::new(id, rev + 1, data);
        self.collection(collection)
            .await
            .replace_one(by_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: collection.to_owned(),
                id: id.to_owned(),
                source,
            })?;
        Ok(())
    }

    async fn create(&self, collection: &str, id: &str, data: Document) -> StorageResult<()> {
        let document = MongoDocument::new(id, 1, data);
        match self.collection(collection).await.insert_one(&document).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StorageError::already_exists(collection, id)),
            Err(source) => Err(MongoDaoError::Write {
                collection: collection.to_owned(),
                id: id.to_owned(),
                source,
            }
            .into()),
        }
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
        precondition: Option<FieldEquals>,
    ) -> StorageResult<Document> {
        let handle = self.collection(collection).await;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self
                .find(collection, id)
                .await?
                .ok_or_else(|| StorageError::not_found(collection, id))?;
            if let Some(condition) = &precondition
                && !condition.matches(&current.body)
            {
                return Err(condition.failed(collection, id));
            }

            let mut next = MongoDocument::new(id, current.rev + 1, current.body);
            merge_patch(&mut next.body, patch.clone());

            let result = handle
                .replace_one(revision_filter(id, current.rev), &next)
                .await
                .map_err(|source| MongoDaoError::Write {
                    collection: collection.to_owned(),
                    id: id.to_owned(),
                    source,
                })?;
            if result.matched_count == 1 {
                return Ok(next.body);
            }
            debug!(collection, id, attempt, "concurrent write detected; retrying update");
        }

        Err(MongoDaoError::Contention {
            collection: collection.to_owned(),
            id: id.to_owned(),
            attempts: MAX_CAS_ATTEMPTS,
        }
        .into())
    }

    async fn delete(
        &self,
        collection: &str,
        id: &str,
        precondition: Option<FieldEquals>,
    ) -> StorageResult<bool> {
        let mut filter = by_id(id);
        if let Some(condition) = precondition {
            filter.insert(condition.field, condition.value);
        }

        let result = self
            .collection(collection)
            .await
            .delete_one(filter)
            .await
            .map_err(|source| MongoDaoError::Delete {
                collection: collection.to_owned(),
                id: id.to_owned(),
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn scan(
        &self,
        collection: &str,
        filter: Option<FieldEquals>,
    ) -> StorageResult<Vec<StoredDocument>> {
        let mut query = BsonDocument::new();
        if let Some(condition) = filter {
            query.insert(condition.field, condition.value);
        }

        let query_error = |source: MongoError| MongoDaoError::Query {
            collection: collection.to_owned(),
            source,
        };
        let documents: Vec<MongoDocument> = self
            .collection(collection)
            .await
            .find(query)
            .sort(doc! { "_id": 1 })
            .await
            .map_err(query_error)?
            .try_collect()
            .await
            .map_err(query_error)?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn watch(&self, collection: &str, id: &str) -> StorageResult<DocumentStream> {
        let changes = self
            .collection(collection)
            .await
            .watch()
            .pipeline([doc! { "$match": { "documentKey._id": id } }])
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::Watch {
                collection: collection.to_owned(),
                id: id.to_owned(),
                source,
            })?;
        let initial = self.find(collection, id).await?.map(|doc| doc.body);
        let (collection, id) = (collection.to_owned(), id.to_owned());

        let stream = async_stream::stream! {
            yield Ok(initial);
            futures::pin_mut!(changes);
            while let Some(event) = changes.next().await {
                match event {
                    Ok(event) => match event.operation_type {
                        OperationType::Delete => yield Ok(None),
                        OperationType::Drop | OperationType::DropDatabase | OperationType::Invalidate => {
                            yield Ok(None);
                            break;
                        }
                        _ => yield Ok(event.full_document.map(|doc| doc.body)),
                    },
                    Err(source) => {
                        yield Err(StorageError::from(MongoDaoError::Watch {
                            collection: collection.clone(),
                            id: id.clone(),
                            source,
                        }));
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}

impl DocumentStore for MongoDocumentStore {
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let (store, collection, id) = (self.clone(), collection.to_owned(), id.to_owned());
        Box::pin(async move { Ok(store.find(&collection, &id).await?.map(|doc| doc.body)) })
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
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
