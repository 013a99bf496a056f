use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::repo::RepoError;

// Surrogate keys are BIGSERIAL in Postgres
pub type Id = i64;

/// Generates `as_str`, `Display` and a validating `FromStr` for a closed string enum.
macro_rules! closed_enum {
    ($ty:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self { $($ty::$variant => $text),+ }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = RepoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(RepoError::Validation(format!("{}: unknown value '{other}'", $field))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "novel_status", rename_all = "kebab-case")]
pub enum NovelStatus {
    #[default]
    InProgress,
    Hiatus,
    Completed,
}
closed_enum!(NovelStatus, "novel.status", {
    InProgress => "in-progress",
    Hiatus => "hiatus",
    Completed => "completed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "chapter_status", rename_all = "lowercase")]
pub enum ChapterStatus {
    Published,
    #[default]
    Draft,
}
closed_enum!(ChapterStatus, "chapter.status", {
    Published => "published",
    Draft => "draft",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "image_type_enum", rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Cover,
    Chapter,
    Other,
}
closed_enum!(ImageType, "image.image_type", {
    Cover => "cover",
    Chapter => "chapter",
    Other => "other",
});

// ---------------- accounts ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Admin {
    pub admin_id: Id,
    pub username: String,
    #[serde(skip_serializing, default)]
    #[schema(write_only)]
    pub password: String, // stored as supplied; hashing happens upstream
    pub email: String,
    pub start_date: DateTime<Utc>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewAdmin {
    pub username: String,
    pub password: String,
    pub email: String,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateAdmin {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
}

/// Ban columns shared by `user` and `author` rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct BanState {
    pub is_banned: bool,
    pub ban_until: Option<DateTime<Utc>>,
    pub ban_admin_id: Option<Id>,
    pub ban_reason: Option<String>,
}

impl BanState {
    /// A ban without an end date never lapses.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_banned && self.ban_until.map_or(true, |until| until > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BanOrder {
    pub admin_id: Id,
    pub until: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub user_id: Id,
    pub username: String,
    #[serde(skip_serializing, default)]
    #[schema(write_only)]
    pub password: String,
    pub email: String,
    pub gender: Option<String>,
    pub birthdate: Option<DateTime<Utc>>,
    pub bio: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub ban: BanState,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: String,
    pub gender: Option<String>,
    pub birthdate: Option<DateTime<Utc>>,
    pub bio: Option<String>,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub birthdate: Option<DateTime<Utc>>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Author {
    pub author_id: Id,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    #[schema(write_only)]
    pub password: String,
    pub gender: Option<String>,
    pub bio: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub ban: BanState,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewAuthor {
    pub username: String,
    pub email: String,
    pub password: String,
    pub gender: Option<String>,
    pub bio: Option<String>,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateAuthor {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub gender: Option<String>,
    pub bio: Option<String>,
}

// ---------------- content ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Novel {
    pub novel_id: Id,
    pub author_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub status: NovelStatus,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewNovel {
    pub author_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub status: NovelStatus,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateNovel {
    pub title: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub status: Option<NovelStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Chapter {
    pub chapter_id: Id,
    pub novel_id: Id,
    pub chapter_number: i32,
    pub title: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ChapterStatus,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewChapter {
    pub novel_id: Id,
    pub chapter_number: i32,
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub status: ChapterStatus,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateChapter {
    pub chapter_number: Option<i32>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub status: Option<ChapterStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Image {
    pub image_id: Id,
    pub novel_id: Option<Id>,
    pub chapter_id: Option<Id>,
    pub author_id: Option<Id>,
    pub file_path: String,
    pub image_type: ImageType,
    pub uploaded_at: DateTime<Utc>,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct NewImage {
    pub novel_id: Option<Id>,
    pub chapter_id: Option<Id>,
    pub author_id: Option<Id>,
    pub file_path: String,
    #[serde(default)]
    pub image_type: ImageType,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateImage {
    pub file_path: Option<String>,
    pub image_type: Option<ImageType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Tag {
    pub tag_id: Id,
    pub name: String,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewTag {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct NovelTag {
    pub novel_tag_id: Id,
    pub novel_id: Id,
    pub tag_id: Id,
}

// ---------------- reader activity ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub comment_id: Id,
    pub user_id: Id,
    pub chapter_id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewComment {
    pub user_id: Id,
    pub chapter_id: Id,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Review {
    pub review_id: Id,
    pub user_id: Id,
    pub novel_id: Id,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReview {
    pub user_id: Id,
    pub novel_id: Id,
    pub content: Option<String>,
}

pub const MIN_SCORE: i32 = 1;
pub const MAX_SCORE: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Rating {
    pub rating_id: Id,
    pub user_id: Id,
    pub novel_id: Id,
    pub score: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewRating {
    pub user_id: Id,
    pub novel_id: Id,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Bookmark {
    pub bookmark_id: Id,
    pub user_id: Id,
    pub novel_id: Id,
    pub chapter_id: Option<Id>,
    pub progress: f64, // percentage or page, caller's choice
    pub updated_at: DateTime<Utc>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewBookmark {
    pub user_id: Id,
    pub novel_id: Id,
    pub chapter_id: Option<Id>,
    #[serde(default)]
    pub progress: f64,
}
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateBookmark {
    pub chapter_id: Option<Id>,
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct ReadingHistory {
    pub history_id: Id,
    pub user_id: Id,
    pub novel_id: Id,
    pub chapter_id: Id,
    pub read_at: DateTime<Utc>,
}
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReadingHistory {
    pub user_id: Id,
    pub novel_id: Id,
    pub chapter_id: Id,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_enums_accept_only_declared_values() {
        for s in NovelStatus::ALL {
            assert_eq!(s.as_str().parse::<NovelStatus>().unwrap(), *s);
        }
        assert!(matches!("paused".parse::<NovelStatus>(), Err(RepoError::Validation(_))));
        assert!(matches!("Published".parse::<ChapterStatus>(), Err(RepoError::Validation(_))));
        assert!(matches!("banner".parse::<ImageType>(), Err(RepoError::Validation(_))));
        assert_eq!("in-progress".parse::<NovelStatus>().unwrap(), NovelStatus::InProgress);
    }

    #[test]
    fn serde_rejects_unknown_status() {
        let ok: NewNovel = serde_json::from_str(r#"{"author_id":1,"title":"t","description":null,"summary":null,"status":"hiatus"}"#).unwrap();
        assert_eq!(ok.status, NovelStatus::Hiatus);
        let bad = serde_json::from_str::<NewNovel>(r#"{"author_id":1,"title":"t","description":null,"summary":null,"status":"dropped"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn defaults_follow_column_defaults() {
        assert_eq!(NovelStatus::default(), NovelStatus::InProgress);
        assert_eq!(ChapterStatus::default(), ChapterStatus::Draft);
        assert_eq!(ImageType::default(), ImageType::Cover);
        let bm: NewBookmark = serde_json::from_str(r#"{"user_id":1,"novel_id":2,"chapter_id":null}"#).unwrap();
        assert_eq!(bm.progress, 0.0);
    }

    #[test]
    fn ban_without_end_date_never_lapses() {
        let now = Utc::now();
        let mut ban = BanState { is_banned: true, ..Default::default() };
        assert!(ban.is_active(now));
        ban.ban_until = Some(now - chrono::Duration::hours(1));
        assert!(!ban.is_active(now));
        ban.ban_until = Some(now + chrono::Duration::hours(1));
        assert!(ban.is_active(now));
        assert!(!BanState::default().is_active(now));
    }
}
