use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{BackendClient, PermissionOptions, StoreError, document_permissions};

/// A file received from a contributor, held in memory until uploaded.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub file_id: String,
    pub url: String,
}

#[derive(Deserialize)]
struct CreatedFile {
    #[serde(rename = "$id")]
    id: String,
}

#[derive(Clone)]
pub struct ObjectStorage {
    client: BackendClient,
}

impl ObjectStorage {
    pub fn from_client(client: BackendClient) -> Self {
        Self { client }
    }

    pub fn as_user(&self, session: &str) -> Self {
        Self {
            client: self.client.with_session(session),
        }
    }

    fn files_path(&self) -> String {
        format!("storage/buckets/{}/files", self.client.config().bucket_id)
    }

    /// Public view URL for a stored file.
    pub fn view_url(&self, file_id: &str) -> String {
        let path = format!("{}/{}/view", self.files_path(), file_id);
        format!(
            "{}?project={}",
            self.client.url(&path),
            self.client.config().project_id
        )
    }

    /// Stores the file readable by anyone and writable by `owner_id` only.
    pub async fn upload(&self, upload: Upload, owner_id: &str) -> Result<UploadedFile, StoreError> {
        let mut part = Part::bytes(upload.bytes).file_name(upload.file_name);
        if let Some(content_type) = upload.content_type.as_deref() {
            part = part.mime_str(content_type).map_err(|_| {
                StoreError::InvalidRequest(format!("invalid content type `{}`", content_type))
            })?;
        }

        let mut form = Form::new()
            .text("fileId", Ulid::new().to_string())
            .part("file", part);
        for permission in document_permissions(owner_id, PermissionOptions::default()) {
            form = form.text("permissions[]", permission);
        }

        let builder = self
            .client
            .request(Method::POST, &self.files_path())
            .multipart(form);
        let created: CreatedFile = self.client.send_json(builder).await?;

        Ok(UploadedFile {
            url: self.view_url(&created.id),
            file_id: created.id,
        })
    }
}
