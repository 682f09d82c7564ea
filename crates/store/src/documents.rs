use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::{BackendClient, BackendConfig, StoreError};

pub const OWNER_FIELD: &str = "created_by";

/// A single query in the backend's JSON query syntax.
#[derive(Debug, Clone, PartialEq)]
pub struct Query(Value);

impl Query {
    pub fn limit(limit: u64) -> Self {
        Self(serde_json::json!({ "method": "limit", "values": [limit] }))
    }

    pub fn encode(&self) -> String {
        self.0.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentList<T> {
    #[serde(default)]
    pub total: u64,
    pub documents: Vec<T>,
    /// Documents dropped from this page because they did not decode.
    #[serde(skip)]
    pub skipped: usize,
}

/// Which permissions a new document carries. Both default to on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionOptions {
    /// `read("any")`.
    pub public_read: bool,
    /// Update and delete for the owner.
    pub owner_write: bool,
}

impl Default for PermissionOptions {
    fn default() -> Self {
        Self {
            public_read: true,
            owner_write: true,
        }
    }
}

/// Permission strings for a document owned by `user_id`. With both options
/// off the list is empty and the collection defaults apply.
pub fn document_permissions(user_id: &str, options: PermissionOptions) -> Vec<String> {
    let mut permissions = Vec::with_capacity(3);
    if options.public_read {
        permissions.push("read(\"any\")".to_string());
    }
    if options.owner_write {
        permissions.push(format!("update(\"user:{}\")", user_id));
        permissions.push(format!("delete(\"user:{}\")", user_id));
    }
    permissions
}

#[derive(Clone)]
pub struct DocumentStore {
    client: BackendClient,
}

impl DocumentStore {
    pub fn new(config: BackendConfig) -> Result<Self, StoreError> {
        Ok(Self {
            client: BackendClient::new(config)?,
        })
    }

    pub fn from_client(client: BackendClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    /// Same store acting as the owner of `session`.
    pub fn as_user(&self, session: &str) -> Self {
        Self {
            client: self.client.with_session(session),
        }
    }

    fn documents_path(&self, collection_id: &str) -> String {
        format!(
            "databases/{}/collections/{}/documents",
            self.client.config().database_id,
            collection_id
        )
    }

    fn document_path(&self, collection_id: &str, document_id: &str) -> String {
        format!("{}/{}", self.documents_path(collection_id), document_id)
    }

    /// Lists one page. Documents that fail to decode as `T` are skipped and
    /// logged; the rest of the page is still returned.
    pub async fn list<T: DeserializeOwned>(
        &self,
        collection_id: &str,
        queries: &[Query],
    ) -> Result<DocumentList<T>, StoreError> {
        let params = queries
            .iter()
            .map(|q| ("queries[]", q.encode()))
            .collect::<Vec<_>>();
        let builder = self
            .client
            .request(Method::GET, &self.documents_path(collection_id))
            .query(&params);
        let page: DocumentList<Value> = self.client.send_json(builder).await?;
        Ok(decode_page(collection_id, page))
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        collection_id: &str,
        document_id: &str,
    ) -> Result<T, StoreError> {
        let builder = self
            .client
            .request(Method::GET, &self.document_path(collection_id, document_id));
        self.client.send_json(builder).await
    }

    pub async fn create(
        &self,
        collection_id: &str,
        document_id: &str,
        data: &Map<String, Value>,
        permissions: &[String],
    ) -> Result<Value, StoreError> {
        let mut body = serde_json::json!({
            "documentId": document_id,
            "data": data,
        });
        if !permissions.is_empty()
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("permissions".to_string(), Value::from(permissions.to_vec()));
        }

        let builder = self
            .client
            .request(Method::POST, &self.documents_path(collection_id))
            .json(&body);
        self.client.send_json(builder).await
    }

    /// Creates under a fresh id with permissions for `user_id`.
    pub async fn create_document_with_permissions(
        &self,
        collection_id: &str,
        data: &Map<String, Value>,
        user_id: &str,
        options: PermissionOptions,
    ) -> Result<Value, StoreError> {
        let document_id = Ulid::new().to_string();
        self.create(
            collection_id,
            &document_id,
            data,
            &document_permissions(user_id, options),
        )
        .await
    }

    pub async fn update(
        &self,
        collection_id: &str,
        document_id: &str,
        data: &Map<String, Value>,
    ) -> Result<Value, StoreError> {
        let builder = self
            .client
            .request(Method::PATCH, &self.document_path(collection_id, document_id))
            .json(&serde_json::json!({ "data": data }));
        self.client.send_json(builder).await
    }

    pub async fn delete(&self, collection_id: &str, document_id: &str) -> Result<(), StoreError> {
        let builder = self
            .client
            .request(Method::DELETE, &self.document_path(collection_id, document_id));
        self.client.send(builder).await?;
        Ok(())
    }

    /// Updates only when `user_id` created the document.
    pub async fn update_document_owned(
        &self,
        collection_id: &str,
        document_id: &str,
        data: &Map<String, Value>,
        user_id: &str,
    ) -> Result<Value, StoreError> {
        self.ensure_owner(collection_id, document_id, user_id).await?;
        let mut data = data.clone();
        data.remove(OWNER_FIELD);
        self.update(collection_id, document_id, &data).await
    }

    pub async fn delete_document_owned(
        &self,
        collection_id: &str,
        document_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        self.ensure_owner(collection_id, document_id, user_id).await?;
        self.delete(collection_id, document_id).await
    }

    async fn ensure_owner(
        &self,
        collection_id: &str,
        document_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let doc = self.get::<Value>(collection_id, document_id).await?;
        let owner = doc.get(OWNER_FIELD).and_then(Value::as_str);
        if owner != Some(user_id) {
            tracing::info!(
                collection = collection_id,
                document_id,
                "rejected write by non-owner"
            );
            return Err(StoreError::Unauthorized);
        }
        Ok(())
    }
}

fn decode_page<T: DeserializeOwned>(
    collection_id: &str,
    page: DocumentList<Value>,
) -> DocumentList<T> {
    let mut documents = Vec::with_capacity(page.documents.len());
    let mut skipped = 0;
    for raw in page.documents {
        let document_id = raw
            .get("$id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match serde_json::from_value::<T>(raw) {
            Ok(document) => documents.push(document),
            Err(err) => {
                skipped += 1;
                tracing::warn!(
                    collection = collection_id,
                    document_id = document_id.as_str(),
                    error = %err,
                    "skipping document that does not decode"
                );
            }
        }
    }

    DocumentList {
        total: page.total,
        documents,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_grant_public_read_and_owner_writes() {
        assert_eq!(
            document_permissions("u1", PermissionOptions::default()),
            vec![
                "read(\"any\")".to_string(),
                "update(\"user:u1\")".to_string(),
                "delete(\"user:u1\")".to_string(),
            ]
        );
    }

    #[test]
    fn private_document_gets_owner_writes_only() {
        let options = PermissionOptions {
            public_read: false,
            ..PermissionOptions::default()
        };
        assert_eq!(
            document_permissions("u1", options),
            vec![
                "update(\"user:u1\")".to_string(),
                "delete(\"user:u1\")".to_string(),
            ]
        );
    }

    #[test]
    fn read_only_document_gets_public_read_only() {
        let options = PermissionOptions {
            owner_write: false,
            ..PermissionOptions::default()
        };
        assert_eq!(
            document_permissions("u1", options),
            vec!["read(\"any\")".to_string()]
        );
    }

    #[test]
    fn no_options_leave_collection_defaults() {
        let options = PermissionOptions {
            public_read: false,
            owner_write: false,
        };
        assert!(document_permissions("u1", options).is_empty());
    }

    #[test]
    fn page_skips_documents_that_do_not_decode() {
        #[derive(Debug, Deserialize)]
        struct Named {
            name: String,
        }

        let page = DocumentList {
            total: 3,
            documents: vec![
                serde_json::json!({"$id": "a", "name": "Ana"}),
                serde_json::json!({"$id": "b", "name": 7}),
                serde_json::json!({"$id": "c", "name": "Luis"}),
            ],
            skipped: 0,
        };
        let decoded = decode_page::<Named>("candidates", page);

        assert_eq!(decoded.total, 3);
        assert_eq!(decoded.skipped, 1);
        let names = decoded.documents.iter().map(|d| d.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Ana", "Luis"]);
    }

    #[test]
    fn limit_query_encodes_as_json() {
        let encoded: Value = serde_json::from_str(&Query::limit(100).encode()).unwrap();
        assert_eq!(encoded, serde_json::json!({"method": "limit", "values": [100]}));
    }
}
