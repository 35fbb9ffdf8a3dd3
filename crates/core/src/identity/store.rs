//! User registry persistent store

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Error;
use crate::Result;

use super::model::User;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    id: Uuid,
    name: String,
    email: String,
    avatar_url: Option<String>,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl UserRecord {
    fn to_user(&self) -> User {
        User {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            avatar_url: self.avatar_url.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Clone)]
pub struct IdentityStore {
    users: Arc<RwLock<HashMap<Uuid, UserRecord>>>,
    file_path: PathBuf,
}

impl IdentityStore {
    pub async fn new(file_path: PathBuf) -> Result<Self> {
        let users = if file_path.exists() {
            let content = tokio::fs::read_to_string(&file_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to read users file: {}", e)))?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Storage(format!("Failed to parse users file: {}", e)))?
        } else {
            HashMap::new()
        };

        Ok(Self {
            users: Arc::new(RwLock::new(users)),
            file_path,
        })
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        avatar_url: Option<String>,
    ) -> Result<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("User name cannot be empty".to_string()));
        }
        let email = normalize_email(email)?;
        validate_password(password)?;

        let mut users = self.users.write().await;
        if users.values().any(|user| user.email == email) {
            return Err(Error::Conflict(format!("User '{}' already exists", email)));
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email,
            avatar_url: avatar_url.and_then(|url| {
                let trimmed = url.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed)
                }
            }),
            password_hash: hash_password(password),
            created_at: Utc::now(),
        };

        let mut next = users.clone();
        next.insert(record.id, record.clone());
        self.persist_snapshot(&next).await?;
        *users = next;

        Ok(record.to_user())
    }

    /// Verify credentials. Returns None for unknown email or bad password,
    /// without distinguishing the two.
    pub async fn authenticate(&self, email: &str, password: &str) -> Option<User> {
        let email = normalize_email(email).ok()?;
        let users = self.users.read().await;
        let record = users.values().find(|user| user.email == email)?;
        if verify_password(&record.password_hash, password) {
            Some(record.to_user())
        } else {
            None
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<User> {
        let users = self.users.read().await;
        users.get(&id).map(UserRecord::to_user)
    }

    pub async fn find_by_email(&self, email: &str) -> Option<User> {
        let email = normalize_email(email).ok()?;
        let users = self.users.read().await;
        users
            .values()
            .find(|user| user.email == email)
            .map(UserRecord::to_user)
    }

    async fn persist_snapshot(&self, users: &HashMap<Uuid, UserRecord>) -> Result<()> {
        let content = serde_json::to_string_pretty(users)
            .map_err(|e| Error::Storage(format!("Failed to serialize users: {}", e)))?;

        if let Some(parent) = self.file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let parent = self.file_path.parent().unwrap_or_else(|| Path::new("."));
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4().as_hyphenated()));

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write temp users file: {}", e)))?;

        if let Err(err) = tokio::fs::rename(&temp_path, &self.file_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::Storage(format!(
                "Failed to finalize users write: {}",
                err
            )));
        }

        Ok(())
    }
}

pub(crate) fn normalize_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    if normalized.is_empty() || !normalized.contains('@') {
        return Err(Error::InvalidInput("Invalid email".to_string()));
    }
    Ok(normalized)
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < 8 {
        return Err(Error::InvalidInput(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

fn hash_password(password: &str) -> String {
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    format!(
        "v1${}${}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(digest)
    )
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    let mut parts = stored_hash.split('$');
    let version = parts.next();
    let encoded_salt = parts.next();
    let encoded_digest = parts.next();
    if version != Some("v1") || encoded_salt.is_none() || encoded_digest.is_none() {
        return false;
    }

    let salt = match URL_SAFE_NO_PAD.decode(encoded_salt.unwrap()) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let expected_digest = match URL_SAFE_NO_PAD.decode(encoded_digest.unwrap()) {
        Ok(value) => value,
        Err(_) => return false,
    };

    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(password.as_bytes());
    let actual_digest = hasher.finalize();
    expected_digest == actual_digest.as_slice()
}
