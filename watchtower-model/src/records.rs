use chrono::{DateTime, Utc};

use crate::watermark::Watermark;

/// An immutable, insert-ordered row that a stream watches for.
pub trait StreamRecord: Send + Sync {
    /// Identifier, unique and strictly increasing within the stream.
    fn id(&self) -> i64;

    fn created_at(&self) -> DateTime<Utc>;

    /// Text rendered for this record in a notification digest.
    fn digest_line(&self) -> &str;

    fn position(&self) -> Watermark {
        Watermark::new(self.created_at(), self.id())
    }
}

/// A discovered landing domain (`domains` table).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Domain {
    pub id: i64,
    pub landing_domain: String,
    pub created_at: DateTime<Utc>,
}

impl StreamRecord for Domain {
    fn id(&self) -> i64 {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn digest_line(&self) -> &str {
        &self.landing_domain
    }
}

/// A discovered social-media link (`social_links` table).
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SocialLink {
    pub id: i64,
    pub url: String,
    /// Social network host (`t.me`, `vk.com`, ...), when known.
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StreamRecord for SocialLink {
    fn id(&self) -> i64 {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn digest_line(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn position_mirrors_record_keys() {
        let created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let link = SocialLink {
            id: 12,
            url: "https://t.me/example".into(),
            domain: Some("t.me".into()),
            created_at,
        };
        assert_eq!(link.position(), Watermark::new(created_at, 12));
        assert_eq!(link.digest_line(), "https://t.me/example");
    }
}
