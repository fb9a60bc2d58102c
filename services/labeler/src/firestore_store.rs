use crate::config::FirestoreConfig;
use crate::error::{PipelineError, Result};
use crate::result_document::ResultDocument;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;
// Refresh this long before the token actually expires
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Keyed document persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write `document` as `collection/document_id`, replacing any existing document
    async fn upsert(
        &self,
        collection: &str,
        document_id: &str,
        document: &ResultDocument,
    ) -> Result<()>;
}

/// Google service account key file
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Read and parse a key file; any failure is a configuration error
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "Firebase credentials file not found: {} ({})",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&contents).map_err(|e| match e {
            PipelineError::Configuration(msg) => {
                PipelineError::Configuration(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let key: Self = serde_json::from_str(contents).map_err(|e| {
            PipelineError::Configuration(format!("invalid service account key: {}", e))
        })?;

        if key.project_id.is_empty() || key.client_email.is_empty() {
            return Err(PipelineError::Configuration(
                "service account key is missing project_id or client_email".to_string(),
            ));
        }

        Ok(key)
    }
}

#[derive(Serialize)]
struct TokenClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    TOKEN_LIFETIME_SECS
}

struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Document store backed by the Firestore REST API
pub struct FirestoreStore {
    http: reqwest::Client,
    documents_url: Url,
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
}

impl FirestoreStore {
    /// Create a store from configuration, loading the service account key
    pub fn new(config: &FirestoreConfig) -> Result<Self> {
        let key = ServiceAccountKey::from_file(&config.credentials_path)?;
        Self::from_key(config, key)
    }

    pub fn from_key(config: &FirestoreConfig, key: ServiceAccountKey) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            PipelineError::Configuration(format!("invalid service account private key: {}", e))
        })?;

        let project_id = config.project_id.as_deref().unwrap_or(&key.project_id);
        let documents_url = documents_url(&config.base_url, project_id, &config.database)?;

        info!(
            project_id = %project_id,
            database = %config.database,
            client_email = %key.client_email,
            "Firestore document store initialized"
        );

        Ok(Self {
            http: reqwest::Client::new(),
            documents_url,
            client_email: key.client_email,
            token_uri: key.token_uri,
            signing_key,
            token: Mutex::new(None),
        })
    }

    /// URL of `collection/document_id`.
    ///
    /// `collection` may be a nested path such as `users/u1/results`; each segment is
    /// encoded separately, while `document_id` is always a single segment.
    pub fn document_url(&self, collection: &str, document_id: &str) -> Result<Url> {
        let mut url = self.documents_url.clone();
        url.path_segments_mut()
            .map_err(|_| PipelineError::Persistence("base URL cannot have a path".to_string()))?
            .extend(collection.split('/').filter(|s| !s.is_empty()))
            .push(document_id);
        Ok(url)
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let now = Utc::now();
        let claims = TokenClaims {
            iss: &self.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_LIFETIME_SECS,
        };

        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| PipelineError::Persistence(format!("failed to sign token request: {}", e)))?;

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Persistence(format!(
                "token request rejected ({}): {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Persistence(format!("invalid token response: {}", e)))?;

        debug!(expires_in = token.expires_in, "Obtained Firestore access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + ChronoDuration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    #[instrument(skip(self, document), fields(tag_count = document.tags.len()))]
    async fn upsert(
        &self,
        collection: &str,
        document_id: &str,
        document: &ResultDocument,
    ) -> Result<()> {
        let url = self.document_url(collection, document_id)?;
        let body = encode_document(document)?;
        let token = self.access_token().await?;

        // PATCH without an update mask replaces the whole document
        let response = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Persistence(format!(
                "Firestore returned {}: {}",
                status, body
            )));
        }

        debug!("Document written to Firestore");
        Ok(())
    }
}

fn documents_url(base_url: &str, project_id: &str, database: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).map_err(|e| {
        PipelineError::Configuration(format!("invalid Firestore base URL {:?}: {}", base_url, e))
    })?;

    url.path_segments_mut()
        .map_err(|_| {
            PipelineError::Configuration(format!("Firestore base URL {:?} cannot have a path", base_url))
        })?
        .pop_if_empty()
        .extend(["projects", project_id, "databases", database, "documents"]);

    Ok(url)
}

/// Encode a result document as a Firestore `Document` body
pub fn encode_document(document: &ResultDocument) -> Result<Value> {
    let value = serde_json::to_value(document)
        .map_err(|e| PipelineError::Persistence(format!("failed to encode document: {}", e)))?;

    match to_firestore_value(&value) {
        Value::Object(mut map) => Ok(map
            .remove("mapValue")
            .unwrap_or_else(|| json!({ "fields": {} }))),
        _ => Err(PipelineError::Persistence(
            "document did not encode to a map".to_string(),
        )),
    }
}

/// Convert plain JSON into Firestore's typed value representation
fn to_firestore_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            // Firestore expects int64 values as strings
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64().unwrap_or_default() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(to_firestore_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(fields) => {
            let fields: Map<String, Value> = fields
                .iter()
                .map(|(k, v)| (k.clone(), to_firestore_value(v)))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}
