use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;
use chrono::Utc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::auth::User;

use crate::models::{
    EncounterAttachment, EncounterError, EncounterStatus, SignedAttachmentUrl,
    UploadAttachmentRequest,
};
use crate::services::encounter::{ensure_author, EncounterService};

pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/webp",
    "text/plain",
];

const MAX_FILE_NAME_LEN: usize = 100;

pub struct AttachmentService {
    supabase: SupabaseClient,
    encounters: EncounterService,
    bucket: String,
    max_upload_bytes: usize,
    signed_url_ttl_seconds: u64,
}

impl AttachmentService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            encounters: EncounterService::new(config),
            bucket: config.storage_bucket.clone(),
            max_upload_bytes: config.max_upload_bytes,
            signed_url_ttl_seconds: config.signed_url_ttl_seconds,
        }
    }

    /// Stores the file, then its record. A failed record insert removes
    /// the stored object again.
    pub async fn upload_attachment(
        &self,
        encounter_id: Uuid,
        request: UploadAttachmentRequest,
        user: &User,
        auth_token: &str,
    ) -> Result<EncounterAttachment, EncounterError> {
        debug!("Uploading attachment {} to encounter {}", request.file_name, encounter_id);

        let encounter = self.encounters.get_encounter(encounter_id, auth_token).await?;
        ensure_author(user, &encounter)?;

        let content_type = normalize_content_type(&request.content_type)?;
        let bytes = decode_payload(&request.data)?;
        if bytes.is_empty() {
            return Err(EncounterError::InvalidFile("file is empty".to_string()));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(EncounterError::FileTooLarge {
                size: bytes.len(),
                limit: self.max_upload_bytes,
            });
        }

        let file_name = sanitize_file_name(&request.file_name);
        let storage_path = format!("encounters/{}/{}-{}", encounter_id, Uuid::new_v4(), file_name);
        let size_bytes = bytes.len();

        self.supabase
            .upload_object(&self.bucket, &storage_path, bytes, &content_type, auth_token)
            .await
            .map_err(|e| EncounterError::StorageError(e.to_string()))?;

        let record = json!({
            "encounter_id": encounter_id,
            "file_name": file_name,
            "content_type": content_type,
            "size_bytes": size_bytes,
            "storage_path": storage_path,
            "uploaded_by": user.id,
            "created_at": Utc::now().to_rfc3339()
        });

        let inserted: Result<Vec<Value>, anyhow::Error> = self.supabase.request_returning(
            Method::POST,
            "/rest/v1/encounter_attachments",
            auth_token,
            record,
        ).await;

        let rows = match inserted {
            Ok(rows) => rows,
            Err(e) => {
                error!("Attachment record for {} failed, removing stored object: {}", storage_path, e);
                if let Err(cleanup) = self.supabase.delete_object(&self.bucket, &storage_path, auth_token).await {
                    error!("Orphaned storage object {} could not be removed: {}", storage_path, cleanup);
                }
                return Err(e.into());
            }
        };

        let attachment = first_row(rows)?;
        info!("Attachment {} stored for encounter {} ({} bytes)", attachment.id, encounter_id, size_bytes);

        Ok(attachment)
    }

    pub async fn list_attachments(
        &self,
        encounter_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<EncounterAttachment>, EncounterError> {
        let path = format!(
            "/rest/v1/encounter_attachments?encounter_id=eq.{}&order=created_at.asc",
            encounter_id
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        result
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| EncounterError::DatabaseError(e.to_string())))
            .collect()
    }

    pub async fn get_attachment(
        &self,
        attachment_id: Uuid,
        auth_token: &str,
    ) -> Result<EncounterAttachment, EncounterError> {
        let path = format!("/rest/v1/encounter_attachments?id=eq.{}", attachment_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        first_row(result)
    }

    pub async fn attachment_url(
        &self,
        attachment_id: Uuid,
        auth_token: &str,
    ) -> Result<SignedAttachmentUrl, EncounterError> {
        let attachment = self.get_attachment(attachment_id, auth_token).await?;

        let url = self.supabase
            .create_signed_url(&self.bucket, &attachment.storage_path, self.signed_url_ttl_seconds, auth_token)
            .await
            .map_err(|e| EncounterError::StorageError(e.to_string()))?;

        Ok(SignedAttachmentUrl {
            attachment_id,
            url,
            expires_in: self.signed_url_ttl_seconds,
        })
    }

    pub async fn delete_attachment(
        &self,
        attachment_id: Uuid,
        user: &User,
        auth_token: &str,
    ) -> Result<(), EncounterError> {
        info!("Deleting attachment {}", attachment_id);

        let attachment = self.get_attachment(attachment_id, auth_token).await?;
        let encounter = self.encounters.get_encounter(attachment.encounter_id, auth_token).await?;
        ensure_author(user, &encounter)?;

        if encounter.status == EncounterStatus::Finalizado {
            return Err(EncounterError::AlreadyFinalized);
        }

        self.supabase
            .delete_object(&self.bucket, &attachment.storage_path, auth_token)
            .await
            .map_err(|e| EncounterError::StorageError(e.to_string()))?;

        let path = format!("/rest/v1/encounter_attachments?id=eq.{}", attachment_id);
        let _: Value = self.supabase.request(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
        ).await?;

        Ok(())
    }
}

/// Accepts plain base64 or a `data:<type>;base64,<payload>` URL.
pub fn decode_payload(data: &str) -> Result<Vec<u8>, EncounterError> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(cleaned.as_bytes())
        .map_err(|e| EncounterError::InvalidFile(format!("invalid base64 data: {}", e)))
}

pub fn normalize_content_type(raw: &str) -> Result<String, EncounterError> {
    let essence = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
        Ok(essence)
    } else {
        Err(EncounterError::InvalidFile(format!("content type {} is not accepted", raw)))
    }
}

/// Reduces a client file name to a safe storage path segment.
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();

    let mut name: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    name = name.trim_start_matches('.').to_string();

    if name.len() > MAX_FILE_NAME_LEN {
        name = name[name.len() - MAX_FILE_NAME_LEN..].to_string();
    }
    if name.is_empty() {
        name = "arquivo".to_string();
    }
    name
}

fn first_row(rows: Vec<Value>) -> Result<EncounterAttachment, EncounterError> {
    let row = rows.into_iter().next().ok_or(EncounterError::AttachmentNotFound)?;
    serde_json::from_value(row).map_err(|e| EncounterError::DatabaseError(e.to_string()))
}
