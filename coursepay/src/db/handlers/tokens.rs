use crate::{
    crypto,
    db::{
        errors::Result,
        models::tokens::{TokenCreateDBRequest, TokenDBResponse, TokenKind},
    },
};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

// Database entity model for a token row, including the secret hash that never leaves this module
#[derive(Debug, Clone, FromRow)]
struct Token {
    id: Uuid,
    kind: TokenKind,
    subject_id: Uuid,
    secret_hash: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<Token> for TokenDBResponse {
    fn from(token: Token) -> Self {
        Self {
            id: token.id,
            kind: token.kind,
            subject_id: token.subject_id,
            expires_at: token.expires_at,
            created_at: token.created_at,
        }
    }
}

pub struct Tokens<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Tokens<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Store a new token, replacing any earlier token of the same kind for the subject
    #[instrument(skip(self, request), fields(kind = ?request.kind, subject_id = %request.subject_id), err)]
    pub async fn issue(&mut self, request: &TokenCreateDBRequest) -> Result<TokenDBResponse> {
        let secret_hash = crypto::hash_secret(&request.secret)?;
        let expires_at = request.kind.expires_at(Utc::now());

        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM tokens WHERE kind = $1 AND subject_id = $2")
            .bind(request.kind)
            .bind(request.subject_id)
            .execute(&mut *tx)
            .await?;

        let token = sqlx::query_as::<_, Token>(
            r#"
            INSERT INTO tokens (kind, subject_id, secret_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, kind, subject_id, secret_hash, expires_at, created_at
            "#,
        )
        .bind(request.kind)
        .bind(request.subject_id)
        .bind(secret_hash)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TokenDBResponse::from(token))
    }

    /// Whether an unexpired token of this kind matches `secret`, without consuming it
    #[instrument(skip(self, secret), err)]
    pub async fn verify(&mut self, kind: TokenKind, subject_id: Uuid, secret: &str) -> Result<bool> {
        let tokens = sqlx::query_as::<_, Token>(
            r#"
            SELECT id, kind, subject_id, secret_hash, expires_at, created_at
            FROM tokens
            WHERE kind = $1 AND subject_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(kind)
        .bind(subject_id)
        .fetch_all(&mut *self.db)
        .await?;

        let matched = tokens.iter().any(|t| crypto::verify_secret(secret, &t.secret_hash));
        if !matched && !tokens.is_empty() {
            self.record_failure(kind, subject_id).await?;
        }
        Ok(matched)
    }

    /// Lock and delete the unexpired token matching `secret`. Returns false when nothing matched.
    ///
    /// Run this inside the caller's transaction: the row lock makes a concurrent consumer wait
    /// and then find nothing, and a rollback leaves the token usable. A miss counts as a failed
    /// attempt, so commit before reporting it or the count is lost.
    #[instrument(skip(self, secret), err)]
    pub async fn consume(&mut self, kind: TokenKind, subject_id: Uuid, secret: &str) -> Result<bool> {
        let tokens = sqlx::query_as::<_, Token>(
            r#"
            SELECT id, kind, subject_id, secret_hash, expires_at, created_at
            FROM tokens
            WHERE kind = $1 AND subject_id = $2 AND expires_at > NOW()
            FOR UPDATE
            "#,
        )
        .bind(kind)
        .bind(subject_id)
        .fetch_all(&mut *self.db)
        .await?;

        let has_live_token = !tokens.is_empty();
        let Some(token) = tokens.into_iter().find(|t| crypto::verify_secret(secret, &t.secret_hash)) else {
            debug!("No matching {:?} token for subject {}", kind, subject_id);
            if has_live_token {
                self.record_failure(kind, subject_id).await?;
            }
            return Ok(false);
        };

        let deleted = sqlx::query("DELETE FROM tokens WHERE id = $1")
            .bind(token.id)
            .execute(&mut *self.db)
            .await?;

        Ok(deleted.rows_affected() == 1)
    }

    /// Count a wrong guess against the live tokens of the subject and revoke them at the limit
    async fn record_failure(&mut self, kind: TokenKind, subject_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE tokens SET failed_attempts = failed_attempts + 1
            WHERE kind = $1 AND subject_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(kind)
        .bind(subject_id)
        .execute(&mut *self.db)
        .await?;

        let revoked = sqlx::query("DELETE FROM tokens WHERE kind = $1 AND subject_id = $2 AND failed_attempts >= $3")
            .bind(kind)
            .bind(subject_id)
            .bind(kind.max_failed_attempts())
            .execute(&mut *self.db)
            .await?;
        if revoked.rows_affected() > 0 {
            warn!("Revoked {:?} token for subject {} after too many failed attempts", kind, subject_id);
        }
        Ok(())
    }

    /// Remove every expired token
    pub async fn purge_expired(&mut self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at <= NOW()")
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}
