use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Single-use ephemeral tokens. Each kind owns its lifetime and is stored with a
/// discriminator in the shared `tokens` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TokenKind {
    /// Passwordless sign-in link
    MagicToken,
    /// Email address confirmation
    Confirmation,
    /// Invitation to finish signing up
    Signup,
    ChangePassword,
    /// Code gating a wallet withdrawal, scoped to the wallet
    WalletOtp,
}

impl TokenKind {
    pub fn ttl(&self) -> Duration {
        match self {
            TokenKind::MagicToken => Duration::minutes(15),
            TokenKind::Confirmation => Duration::hours(24),
            TokenKind::Signup => Duration::hours(24),
            TokenKind::ChangePassword => Duration::hours(1),
            TokenKind::WalletOtp => Duration::minutes(15),
        }
    }

    /// Wrong guesses tolerated before the live token of this kind is revoked
    pub fn max_failed_attempts(&self) -> i32 {
        5
    }

    pub fn expires_at(&self, issued_at: DateTime<Utc>) -> DateTime<Utc> {
        issued_at + self.ttl()
    }
}

#[derive(Debug, Clone)]
pub struct TokenCreateDBRequest {
    pub kind: TokenKind,
    /// User or wallet the token is scoped to
    pub subject_id: Uuid,
    /// Plain secret; only its hash is stored
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct TokenDBResponse {
    pub id: Uuid,
    pub kind: TokenKind,
    pub subject_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
