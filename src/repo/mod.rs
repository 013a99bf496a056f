use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("uniqueness violation: {0}")] Uniqueness(String),
    #[error("referential integrity violation: {0}")] ReferentialIntegrity(String),
    #[error("validation failed: {0}")] Validation(String),
    #[error("storage error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait AdminRepo: Send + Sync {
    async fn create_admin(&self, new: NewAdmin) -> RepoResult<Admin>;
    async fn get_admin(&self, id: Id) -> RepoResult<Admin>;
    async fn update_admin(&self, id: Id, upd: UpdateAdmin) -> RepoResult<Admin>;
    async fn delete_admin(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User>;
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
    async fn ban_user(&self, id: Id, order: BanOrder) -> RepoResult<User>;
    async fn unban_user(&self, id: Id) -> RepoResult<User>;
}

#[async_trait]
pub trait AuthorRepo: Send + Sync {
    async fn create_author(&self, new: NewAuthor) -> RepoResult<Author>;
    async fn get_author(&self, id: Id) -> RepoResult<Author>;
    async fn update_author(&self, id: Id, upd: UpdateAuthor) -> RepoResult<Author>;
    /// Fails with `ReferentialIntegrity` while the author still owns novels.
    async fn delete_author(&self, id: Id) -> RepoResult<()>;
    async fn ban_author(&self, id: Id, order: BanOrder) -> RepoResult<Author>;
    async fn unban_author(&self, id: Id) -> RepoResult<Author>;
    async fn list_author_novels(&self, author_id: Id) -> RepoResult<Vec<Novel>>;
}

#[async_trait]
pub trait NovelRepo: Send + Sync {
    async fn create_novel(&self, new: NewNovel) -> RepoResult<Novel>;
    async fn get_novel(&self, id: Id) -> RepoResult<Novel>;
    async fn list_novels(&self) -> RepoResult<Vec<Novel>>;
    async fn update_novel(&self, id: Id, upd: UpdateNovel) -> RepoResult<Novel>;
    /// Removes the novel together with its chapters, images and reader activity.
    async fn delete_novel(&self, id: Id) -> RepoResult<()>;
    /// Chapters ordered by `chapter_number`.
    async fn list_chapters(&self, novel_id: Id) -> RepoResult<Vec<Chapter>>;
    async fn list_novel_images(&self, novel_id: Id) -> RepoResult<Vec<Image>>;
}

#[async_trait]
pub trait ChapterRepo: Send + Sync {
    async fn create_chapter(&self, new: NewChapter) -> RepoResult<Chapter>;
    async fn get_chapter(&self, id: Id) -> RepoResult<Chapter>;
    async fn update_chapter(&self, id: Id, upd: UpdateChapter) -> RepoResult<Chapter>;
    async fn delete_chapter(&self, id: Id) -> RepoResult<()>;
    async fn list_chapter_images(&self, chapter_id: Id) -> RepoResult<Vec<Image>>;
}

#[async_trait]
pub trait ImageRepo: Send + Sync {
    async fn create_image(&self, new: NewImage) -> RepoResult<Image>;
    async fn get_image(&self, id: Id) -> RepoResult<Image>;
    async fn update_image(&self, id: Id, upd: UpdateImage) -> RepoResult<Image>;
    async fn delete_image(&self, id: Id) -> RepoResult<()>;
    async fn list_author_images(&self, author_id: Id) -> RepoResult<Vec<Image>>;
}

#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn create_tag(&self, new: NewTag) -> RepoResult<Tag>;
    async fn get_tag(&self, id: Id) -> RepoResult<Tag>;
    async fn find_tag(&self, name: &str) -> RepoResult<Tag>;
    async fn rename_tag(&self, id: Id, name: String) -> RepoResult<Tag>;
    async fn delete_tag(&self, id: Id) -> RepoResult<()>;
    async fn tag_novel(&self, novel_id: Id, tag_id: Id) -> RepoResult<NovelTag>;
    async fn untag_novel(&self, novel_id: Id, tag_id: Id) -> RepoResult<()>;
    async fn list_novel_tags(&self, novel_id: Id) -> RepoResult<Vec<Tag>>;
    async fn list_tagged_novels(&self, tag_id: Id) -> RepoResult<Vec<Novel>>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment>;
    async fn delete_comment(&self, id: Id) -> RepoResult<()>;
    async fn list_chapter_comments(&self, chapter_id: Id) -> RepoResult<Vec<Comment>>;
    async fn list_user_comments(&self, user_id: Id) -> RepoResult<Vec<Comment>>;
}

#[async_trait]
pub trait ReviewRepo: Send + Sync {
    async fn create_review(&self, new: NewReview) -> RepoResult<Review>;
    async fn get_review(&self, id: Id) -> RepoResult<Review>;
    async fn update_review(&self, id: Id, content: Option<String>) -> RepoResult<Review>;
    async fn delete_review(&self, id: Id) -> RepoResult<()>;
    async fn list_novel_reviews(&self, novel_id: Id) -> RepoResult<Vec<Review>>;
    async fn list_user_reviews(&self, user_id: Id) -> RepoResult<Vec<Review>>;
}

#[async_trait]
pub trait RatingRepo: Send + Sync {
    async fn create_rating(&self, new: NewRating) -> RepoResult<Rating>;
    async fn get_rating(&self, id: Id) -> RepoResult<Rating>;
    async fn update_rating(&self, id: Id, score: i32) -> RepoResult<Rating>;
    async fn delete_rating(&self, id: Id) -> RepoResult<()>;
    async fn list_novel_ratings(&self, novel_id: Id) -> RepoResult<Vec<Rating>>;
    async fn list_user_ratings(&self, user_id: Id) -> RepoResult<Vec<Rating>>;
    /// Mean score of a novel, `None` when nobody has rated it.
    async fn average_score(&self, novel_id: Id) -> RepoResult<Option<f64>>;
}

#[async_trait]
pub trait BookmarkRepo: Send + Sync {
    async fn create_bookmark(&self, new: NewBookmark) -> RepoResult<Bookmark>;
    async fn get_bookmark(&self, id: Id) -> RepoResult<Bookmark>;
    async fn update_bookmark(&self, id: Id, upd: UpdateBookmark) -> RepoResult<Bookmark>;
    async fn delete_bookmark(&self, id: Id) -> RepoResult<()>;
    async fn list_user_bookmarks(&self, user_id: Id) -> RepoResult<Vec<Bookmark>>;
}

/// Append-only; entries are never updated.
#[async_trait]
pub trait HistoryRepo: Send + Sync {
    async fn record_read(&self, new: NewReadingHistory) -> RepoResult<ReadingHistory>;
    async fn get_history_entry(&self, id: Id) -> RepoResult<ReadingHistory>;
    async fn delete_history_entry(&self, id: Id) -> RepoResult<()>;
    /// Newest first.
    async fn list_user_history(&self, user_id: Id) -> RepoResult<Vec<ReadingHistory>>;
}

pub trait Repo:
    AdminRepo + UserRepo + AuthorRepo + NovelRepo + ChapterRepo + ImageRepo
    + TagRepo + CommentRepo + ReviewRepo + RatingRepo + BookmarkRepo + HistoryRepo
{}

impl<T> Repo for T where
    T: AdminRepo + UserRepo + AuthorRepo + NovelRepo + ChapterRepo + ImageRepo
        + TagRepo + CommentRepo + ReviewRepo + RatingRepo + BookmarkRepo + HistoryRepo
{}

// ---------------- shared write-path checks ----------------

pub(crate) mod limits {
    pub const USERNAME: usize = 100;
    pub const EMAIL: usize = 100;
    pub const PASSWORD: usize = 100;
    pub const GENDER: usize = 20;
    pub const TITLE: usize = 100;
    pub const FILE_PATH: usize = 255;
    pub const TAG_NAME: usize = 50;
    pub const BAN_REASON: usize = 255;
}

pub(crate) fn check_len(field: &str, value: &str, max: usize) -> RepoResult<()> {
    if value.chars().count() > max {
        return Err(RepoError::Validation(format!("{field} exceeds {max} characters")));
    }
    Ok(())
}

fn check_opt_len(field: &str, value: Option<&str>, max: usize) -> RepoResult<()> {
    value.map_or(Ok(()), |v| check_len(field, v, max))
}

pub(crate) fn check_account(username: Option<&str>, email: Option<&str>, password: Option<&str>, gender: Option<&str>) -> RepoResult<()> {
    check_opt_len("username", username, limits::USERNAME)?;
    check_opt_len("email", email, limits::EMAIL)?;
    check_opt_len("password", password, limits::PASSWORD)?;
    check_opt_len("gender", gender, limits::GENDER)
}

pub(crate) fn check_title(title: Option<&str>) -> RepoResult<()> {
    check_opt_len("title", title, limits::TITLE)
}

pub(crate) fn check_file_path(path: &str) -> RepoResult<()> {
    check_len("file_path", path, limits::FILE_PATH)
}

pub(crate) fn check_ban(order: &BanOrder) -> RepoResult<()> {
    check_opt_len("ban_reason", order.reason.as_deref(), limits::BAN_REASON)
}

/// Returns the trimmed tag name.
pub(crate) fn check_tag_name(name: &str) -> RepoResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RepoError::Validation("tag name must not be empty".into()));
    }
    check_len("tag name", name, limits::TAG_NAME)?;
    Ok(name.to_string())
}

pub(crate) fn check_score(score: i32) -> RepoResult<()> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(RepoError::Validation(format!("score must be between {MIN_SCORE} and {MAX_SCORE}, got {score}")));
    }
    Ok(())
}

pub(crate) fn check_progress(progress: f64) -> RepoResult<()> {
    if !progress.is_finite() {
        return Err(RepoError::Validation("progress must be a finite number".into()));
    }
    Ok(())
}

/// Next `updated_at` for a row: now, but always strictly after `prev`.
pub(crate) fn touch(prev: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > prev { now } else { prev + Duration::microseconds(1) }
}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds_are_inclusive() {
        assert!(check_score(1).is_ok());
        assert!(check_score(5).is_ok());
        assert!(matches!(check_score(0), Err(RepoError::Validation(_))));
        assert!(matches!(check_score(6), Err(RepoError::Validation(_))));
    }

    #[test]
    fn touch_is_strictly_increasing() {
        let future = Utc::now() + Duration::seconds(5);
        assert!(touch(future) > future);
        let past = Utc::now() - Duration::seconds(5);
        assert!(touch(past) > past);
    }

    #[test]
    fn tag_names_are_trimmed_and_bounded() {
        assert_eq!(check_tag_name("  fantasy ").unwrap(), "fantasy");
        assert!(check_tag_name("   ").is_err());
        assert!(check_tag_name(&"x".repeat(51)).is_err());
        assert!(check_tag_name(&"x".repeat(50)).is_ok());
    }

    #[test]
    fn progress_accepts_any_finite_value() {
        assert!(check_progress(-3.5).is_ok());
        assert!(check_progress(1234.0).is_ok());
        assert!(check_progress(f64::NAN).is_err());
    }
}
