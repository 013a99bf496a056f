//! Postgres repository. Cascades and nulling live in the schema's
//! `ON DELETE` rules (`migrations/0001_schema.sql`); multi-statement writes
//! run in a transaction that rolls back when dropped on an error path.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, Pool, Postgres};
use tracing::{debug, info};

use super::*;

const ADMIN_COLS: &str = "admin_id, username, password, email, start_date";
const USER_COLS: &str = "user_id, username, password, email, gender, birthdate, bio, is_banned, ban_until, ban_admin_id, ban_reason";
const AUTHOR_COLS: &str = "author_id, username, email, password, gender, bio, is_banned, ban_until, ban_admin_id, ban_reason";
const NOVEL_COLS: &str = "novel_id, author_id, title, description, summary, status";
const CHAPTER_COLS: &str = "chapter_id, novel_id, chapter_number, title, content, created_at, updated_at, status";
const IMAGE_COLS: &str = "image_id, novel_id, chapter_id, author_id, file_path, image_type, uploaded_at";
const COMMENT_COLS: &str = "comment_id, user_id, chapter_id, content, created_at, updated_at";
const REVIEW_COLS: &str = "review_id, user_id, novel_id, content, created_at, updated_at";
const RATING_COLS: &str = "rating_id, user_id, novel_id, score, created_at, updated_at";
const BOOKMARK_COLS: &str = "bookmark_id, user_id, novel_id, chapter_id, progress, updated_at";
const HISTORY_COLS: &str = "history_id, user_id, novel_id, chapter_id, read_at";

// Strictly increasing auto-refresh timestamp.
const TOUCH: &str = "updated_at = GREATEST(now(), updated_at + interval '1 microsecond')";

/// Maps Postgres SQLSTATE classes onto repository error kinds.
fn db_err(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(ref db) => {
            let msg = db.message().to_string();
            match db.code().as_deref() {
                Some("23503") | Some("23001") => RepoError::ReferentialIntegrity(msg),
                Some("23505") => RepoError::Uniqueness(msg),
                Some("23514") | Some("23502") | Some("22P02") | Some("22001") => RepoError::Validation(msg),
                _ => RepoError::Internal(e.to_string()),
            }
        }
        other => RepoError::Internal(other.to_string()),
    }
}

fn affected(done: sqlx::postgres::PgQueryResult) -> RepoResult<()> {
    if done.rows_affected() == 0 { Err(RepoError::NotFound) } else { Ok(()) }
}

/// `sql` selects a constant for the row with key `$1`.
async fn require(conn: &mut PgConnection, sql: &str, what: &str, id: Id) -> RepoResult<()> {
    let found: Option<i32> = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_optional(&mut *conn).await.map_err(db_err)?;
    found.map(drop).ok_or_else(|| RepoError::ReferentialIntegrity(format!("{what} {id} does not exist")))
}

const USER_EXISTS: &str = r#"SELECT 1 FROM "user" WHERE user_id = $1"#;
const NOVEL_EXISTS: &str = "SELECT 1 FROM novel WHERE novel_id = $1";

async fn chapter_in_novel(conn: &mut PgConnection, chapter_id: Id, novel_id: Id) -> RepoResult<()> {
    let owner: Option<Id> = sqlx::query_scalar("SELECT novel_id FROM chapter WHERE chapter_id = $1")
        .bind(chapter_id)
        .fetch_optional(&mut *conn).await.map_err(db_err)?;
    match owner {
        None => Err(RepoError::ReferentialIntegrity(format!("chapter {chapter_id} does not exist"))),
        Some(owner) if owner != novel_id => Err(RepoError::Validation(format!(
            "chapter {chapter_id} belongs to novel {owner}, not {novel_id}"
        ))),
        Some(_) => Ok(()),
    }
}

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> RepoResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool).await
            .map_err(|e| RepoError::Internal(e.to_string()))?;
        info!("schema migrations applied");
        Ok(())
    }

    async fn one<T>(&self, sql: &str, id: Id) -> RepoResult<T>
    where T: for<'r> FromRow<'r, PgRow> + Send + Unpin {
        sqlx::query_as::<_, T>(sql).bind(id)
            .fetch_optional(&self.pool).await.map_err(db_err)?
            .ok_or(RepoError::NotFound)
    }

    async fn many<T>(&self, sql: &str, id: Id) -> RepoResult<Vec<T>>
    where T: for<'r> FromRow<'r, PgRow> + Send + Unpin {
        sqlx::query_as::<_, T>(sql).bind(id)
            .fetch_all(&self.pool).await.map_err(db_err)
    }

    async fn delete(&self, sql: &str, id: Id) -> RepoResult<()> {
        let done = sqlx::query(sql).bind(id).execute(&self.pool).await.map_err(db_err)?;
        affected(done)
    }
}

#[async_trait]
impl AdminRepo for PgRepo {
    async fn create_admin(&self, new: NewAdmin) -> RepoResult<Admin> {
        check_account(Some(&new.username), Some(&new.email), Some(&new.password), None)?;
        sqlx::query_as::<_, Admin>(&format!(
            "INSERT INTO admin (username, password, email) VALUES ($1,$2,$3) RETURNING {ADMIN_COLS}"
        ))
        .bind(&new.username).bind(&new.password).bind(&new.email)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_admin(&self, id: Id) -> RepoResult<Admin> {
        self.one(&format!("SELECT {ADMIN_COLS} FROM admin WHERE admin_id = $1"), id).await
    }
    async fn update_admin(&self, id: Id, upd: UpdateAdmin) -> RepoResult<Admin> {
        check_account(upd.username.as_deref(), upd.email.as_deref(), upd.password.as_deref(), None)?;
        sqlx::query_as::<_, Admin>(&format!(
            "UPDATE admin SET username = COALESCE($2, username), password = COALESCE($3, password), \
             email = COALESCE($4, email) WHERE admin_id = $1 RETURNING {ADMIN_COLS}"
        ))
        .bind(id).bind(upd.username).bind(upd.password).bind(upd.email)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_admin(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM admin WHERE admin_id = $1", id).await
    }
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        check_account(Some(&new.username), Some(&new.email), Some(&new.password), new.gender.as_deref())?;
        sqlx::query_as::<_, User>(&format!(
            r#"INSERT INTO "user" (username, password, email, gender, birthdate, bio)
               VALUES ($1,$2,$3,$4,$5,$6) RETURNING {USER_COLS}"#
        ))
        .bind(&new.username).bind(&new.password).bind(&new.email)
        .bind(&new.gender).bind(new.birthdate).bind(&new.bio)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_user(&self, id: Id) -> RepoResult<User> {
        self.one(&format!(r#"SELECT {USER_COLS} FROM "user" WHERE user_id = $1"#), id).await
    }
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
        check_account(upd.username.as_deref(), upd.email.as_deref(), upd.password.as_deref(), upd.gender.as_deref())?;
        sqlx::query_as::<_, User>(&format!(
            r#"UPDATE "user" SET username = COALESCE($2, username), password = COALESCE($3, password),
                   email = COALESCE($4, email), gender = COALESCE($5, gender),
                   birthdate = COALESCE($6, birthdate), bio = COALESCE($7, bio)
               WHERE user_id = $1 RETURNING {USER_COLS}"#
        ))
        .bind(id).bind(upd.username).bind(upd.password).bind(upd.email)
        .bind(upd.gender).bind(upd.birthdate).bind(upd.bio)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_user(&self, id: Id) -> RepoResult<()> {
        self.delete(r#"DELETE FROM "user" WHERE user_id = $1"#, id).await?;
        info!(user_id = id, "user deleted with reader activity");
        Ok(())
    }
    async fn ban_user(&self, id: Id, order: BanOrder) -> RepoResult<User> {
        check_ban(&order)?;
        let user = sqlx::query_as::<_, User>(&format!(
            r#"UPDATE "user" SET is_banned = TRUE, ban_until = $2, ban_admin_id = $3, ban_reason = $4
               WHERE user_id = $1 RETURNING {USER_COLS}"#
        ))
        .bind(id).bind(order.until).bind(order.admin_id).bind(&order.reason)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)?;
        info!(user_id = id, admin_id = order.admin_id, "user banned");
        Ok(user)
    }
    async fn unban_user(&self, id: Id) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"UPDATE "user" SET is_banned = FALSE, ban_until = NULL, ban_admin_id = NULL, ban_reason = NULL
               WHERE user_id = $1 RETURNING {USER_COLS}"#
        ))
        .bind(id)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl AuthorRepo for PgRepo {
    async fn create_author(&self, new: NewAuthor) -> RepoResult<Author> {
        check_account(Some(&new.username), Some(&new.email), Some(&new.password), new.gender.as_deref())?;
        sqlx::query_as::<_, Author>(&format!(
            "INSERT INTO author (username, email, password, gender, bio) VALUES ($1,$2,$3,$4,$5) RETURNING {AUTHOR_COLS}"
        ))
        .bind(&new.username).bind(&new.email).bind(&new.password).bind(&new.gender).bind(&new.bio)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_author(&self, id: Id) -> RepoResult<Author> {
        self.one(&format!("SELECT {AUTHOR_COLS} FROM author WHERE author_id = $1"), id).await
    }
    async fn update_author(&self, id: Id, upd: UpdateAuthor) -> RepoResult<Author> {
        check_account(upd.username.as_deref(), upd.email.as_deref(), upd.password.as_deref(), upd.gender.as_deref())?;
        sqlx::query_as::<_, Author>(&format!(
            "UPDATE author SET username = COALESCE($2, username), email = COALESCE($3, email), \
             password = COALESCE($4, password), gender = COALESCE($5, gender), bio = COALESCE($6, bio) \
             WHERE author_id = $1 RETURNING {AUTHOR_COLS}"
        ))
        .bind(id).bind(upd.username).bind(upd.email).bind(upd.password).bind(upd.gender).bind(upd.bio)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_author(&self, id: Id) -> RepoResult<()> {
        // novel.author_id is ON DELETE RESTRICT
        self.delete("DELETE FROM author WHERE author_id = $1", id).await?;
        info!(author_id = id, "author deleted");
        Ok(())
    }
    async fn ban_author(&self, id: Id, order: BanOrder) -> RepoResult<Author> {
        check_ban(&order)?;
        let author = sqlx::query_as::<_, Author>(&format!(
            "UPDATE author SET is_banned = TRUE, ban_until = $2, ban_admin_id = $3, ban_reason = $4 \
             WHERE author_id = $1 RETURNING {AUTHOR_COLS}"
        ))
        .bind(id).bind(order.until).bind(order.admin_id).bind(&order.reason)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)?;
        info!(author_id = id, admin_id = order.admin_id, "author banned");
        Ok(author)
    }
    async fn unban_author(&self, id: Id) -> RepoResult<Author> {
        sqlx::query_as::<_, Author>(&format!(
            "UPDATE author SET is_banned = FALSE, ban_until = NULL, ban_admin_id = NULL, ban_reason = NULL \
             WHERE author_id = $1 RETURNING {AUTHOR_COLS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn list_author_novels(&self, author_id: Id) -> RepoResult<Vec<Novel>> {
        self.many(&format!("SELECT {NOVEL_COLS} FROM novel WHERE author_id = $1 ORDER BY novel_id"), author_id).await
    }
}

#[async_trait]
impl NovelRepo for PgRepo {
    async fn create_novel(&self, new: NewNovel) -> RepoResult<Novel> {
        check_title(Some(&new.title))?;
        let novel = sqlx::query_as::<_, Novel>(&format!(
            "INSERT INTO novel (author_id, title, description, summary, status) VALUES ($1,$2,$3,$4,$5) RETURNING {NOVEL_COLS}"
        ))
        .bind(new.author_id).bind(&new.title).bind(&new.description).bind(&new.summary).bind(new.status)
        .fetch_one(&self.pool).await.map_err(db_err)?;
        debug!(novel_id = novel.novel_id, author_id = novel.author_id, "novel created");
        Ok(novel)
    }
    async fn get_novel(&self, id: Id) -> RepoResult<Novel> {
        self.one(&format!("SELECT {NOVEL_COLS} FROM novel WHERE novel_id = $1"), id).await
    }
    async fn list_novels(&self) -> RepoResult<Vec<Novel>> {
        sqlx::query_as::<_, Novel>(&format!("SELECT {NOVEL_COLS} FROM novel ORDER BY novel_id"))
            .fetch_all(&self.pool).await.map_err(db_err)
    }
    async fn update_novel(&self, id: Id, upd: UpdateNovel) -> RepoResult<Novel> {
        check_title(upd.title.as_deref())?;
        sqlx::query_as::<_, Novel>(&format!(
            "UPDATE novel SET title = COALESCE($2, title), description = COALESCE($3, description), \
             summary = COALESCE($4, summary), status = COALESCE($5, status) \
             WHERE novel_id = $1 RETURNING {NOVEL_COLS}"
        ))
        .bind(id).bind(upd.title).bind(upd.description).bind(upd.summary).bind(upd.status)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_novel(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM novel WHERE novel_id = $1", id).await?;
        info!(novel_id = id, "novel deleted");
        Ok(())
    }
    async fn list_chapters(&self, novel_id: Id) -> RepoResult<Vec<Chapter>> {
        self.many(&format!(
            "SELECT {CHAPTER_COLS} FROM chapter WHERE novel_id = $1 ORDER BY chapter_number, chapter_id"
        ), novel_id).await
    }
    async fn list_novel_images(&self, novel_id: Id) -> RepoResult<Vec<Image>> {
        self.many(&format!("SELECT {IMAGE_COLS} FROM image WHERE novel_id = $1 ORDER BY image_id"), novel_id).await
    }
}

#[async_trait]
impl ChapterRepo for PgRepo {
    async fn create_chapter(&self, new: NewChapter) -> RepoResult<Chapter> {
        check_title(new.title.as_deref())?;
        sqlx::query_as::<_, Chapter>(&format!(
            "INSERT INTO chapter (novel_id, chapter_number, title, content, status) VALUES ($1,$2,$3,$4,$5) RETURNING {CHAPTER_COLS}"
        ))
        .bind(new.novel_id).bind(new.chapter_number).bind(&new.title).bind(&new.content).bind(new.status)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_chapter(&self, id: Id) -> RepoResult<Chapter> {
        self.one(&format!("SELECT {CHAPTER_COLS} FROM chapter WHERE chapter_id = $1"), id).await
    }
    async fn update_chapter(&self, id: Id, upd: UpdateChapter) -> RepoResult<Chapter> {
        check_title(upd.title.as_deref())?;
        sqlx::query_as::<_, Chapter>(&format!(
            "UPDATE chapter SET chapter_number = COALESCE($2, chapter_number), title = COALESCE($3, title), \
             content = COALESCE($4, content), status = COALESCE($5, status), {TOUCH} \
             WHERE chapter_id = $1 RETURNING {CHAPTER_COLS}"
        ))
        .bind(id).bind(upd.chapter_number).bind(upd.title).bind(upd.content).bind(upd.status)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_chapter(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM chapter WHERE chapter_id = $1", id).await?;
        info!(chapter_id = id, "chapter deleted");
        Ok(())
    }
    async fn list_chapter_images(&self, chapter_id: Id) -> RepoResult<Vec<Image>> {
        self.many(&format!("SELECT {IMAGE_COLS} FROM image WHERE chapter_id = $1 ORDER BY image_id"), chapter_id).await
    }
}

#[async_trait]
impl ImageRepo for PgRepo {
    async fn create_image(&self, new: NewImage) -> RepoResult<Image> {
        check_file_path(&new.file_path)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        if let (Some(novel_id), Some(chapter_id)) = (new.novel_id, new.chapter_id) {
            require(&mut *tx, NOVEL_EXISTS, "novel", novel_id).await?;
            chapter_in_novel(&mut *tx, chapter_id, novel_id).await?;
        }
        let image = sqlx::query_as::<_, Image>(&format!(
            "INSERT INTO image (novel_id, chapter_id, author_id, file_path, image_type) VALUES ($1,$2,$3,$4,$5) RETURNING {IMAGE_COLS}"
        ))
        .bind(new.novel_id).bind(new.chapter_id).bind(new.author_id).bind(&new.file_path).bind(new.image_type)
        .fetch_one(&mut *tx).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(image)
    }
    async fn get_image(&self, id: Id) -> RepoResult<Image> {
        self.one(&format!("SELECT {IMAGE_COLS} FROM image WHERE image_id = $1"), id).await
    }
    async fn update_image(&self, id: Id, upd: UpdateImage) -> RepoResult<Image> {
        if let Some(ref p) = upd.file_path { check_file_path(p)?; }
        sqlx::query_as::<_, Image>(&format!(
            "UPDATE image SET file_path = COALESCE($2, file_path), image_type = COALESCE($3, image_type) \
             WHERE image_id = $1 RETURNING {IMAGE_COLS}"
        ))
        .bind(id).bind(upd.file_path).bind(upd.image_type)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_image(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM image WHERE image_id = $1", id).await
    }
    async fn list_author_images(&self, author_id: Id) -> RepoResult<Vec<Image>> {
        self.many(&format!("SELECT {IMAGE_COLS} FROM image WHERE author_id = $1 ORDER BY image_id"), author_id).await
    }
}

#[async_trait]
impl TagRepo for PgRepo {
    async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
        let name = check_tag_name(&new.name)?;
        sqlx::query_as::<_, Tag>("INSERT INTO tag (name) VALUES ($1) RETURNING tag_id, name")
            .bind(name)
            .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_tag(&self, id: Id) -> RepoResult<Tag> {
        self.one("SELECT tag_id, name FROM tag WHERE tag_id = $1", id).await
    }
    async fn find_tag(&self, name: &str) -> RepoResult<Tag> {
        sqlx::query_as::<_, Tag>("SELECT tag_id, name FROM tag WHERE name = $1")
            .bind(name.trim())
            .fetch_optional(&self.pool).await.map_err(db_err)?
            .ok_or(RepoError::NotFound)
    }
    async fn rename_tag(&self, id: Id, name: String) -> RepoResult<Tag> {
        let name = check_tag_name(&name)?;
        sqlx::query_as::<_, Tag>("UPDATE tag SET name = $2 WHERE tag_id = $1 RETURNING tag_id, name")
            .bind(id).bind(name)
            .fetch_optional(&self.pool).await.map_err(db_err)?
            .ok_or(RepoError::NotFound)
    }
    async fn delete_tag(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM tag WHERE tag_id = $1", id).await
    }
    async fn tag_novel(&self, novel_id: Id, tag_id: Id) -> RepoResult<NovelTag> {
        sqlx::query_as::<_, NovelTag>(
            "INSERT INTO novel_tag (novel_id, tag_id) VALUES ($1,$2) RETURNING novel_tag_id, novel_id, tag_id"
        )
        .bind(novel_id).bind(tag_id)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn untag_novel(&self, novel_id: Id, tag_id: Id) -> RepoResult<()> {
        let done = sqlx::query("DELETE FROM novel_tag WHERE novel_id = $1 AND tag_id = $2")
            .bind(novel_id).bind(tag_id)
            .execute(&self.pool).await.map_err(db_err)?;
        affected(done)
    }
    async fn list_novel_tags(&self, novel_id: Id) -> RepoResult<Vec<Tag>> {
        self.many(
            "SELECT t.tag_id, t.name FROM tag t JOIN novel_tag nt ON nt.tag_id = t.tag_id \
             WHERE nt.novel_id = $1 ORDER BY t.tag_id",
            novel_id,
        ).await
    }
    async fn list_tagged_novels(&self, tag_id: Id) -> RepoResult<Vec<Novel>> {
        self.many(
            "SELECT n.novel_id, n.author_id, n.title, n.description, n.summary, n.status \
             FROM novel n JOIN novel_tag nt ON nt.novel_id = n.novel_id \
             WHERE nt.tag_id = $1 ORDER BY n.novel_id",
            tag_id,
        ).await
    }
}

#[async_trait]
impl CommentRepo for PgRepo {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!(
            "INSERT INTO comment (user_id, chapter_id, content) VALUES ($1,$2,$3) RETURNING {COMMENT_COLS}"
        ))
        .bind(new.user_id).bind(new.chapter_id).bind(&new.content)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        self.one(&format!("SELECT {COMMENT_COLS} FROM comment WHERE comment_id = $1"), id).await
    }
    async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(&format!(
            "UPDATE comment SET content = $2, {TOUCH} WHERE comment_id = $1 RETURNING {COMMENT_COLS}"
        ))
        .bind(id).bind(content)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_comment(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM comment WHERE comment_id = $1", id).await
    }
    async fn list_chapter_comments(&self, chapter_id: Id) -> RepoResult<Vec<Comment>> {
        self.many(&format!("SELECT {COMMENT_COLS} FROM comment WHERE chapter_id = $1 ORDER BY comment_id"), chapter_id).await
    }
    async fn list_user_comments(&self, user_id: Id) -> RepoResult<Vec<Comment>> {
        self.many(&format!("SELECT {COMMENT_COLS} FROM comment WHERE user_id = $1 ORDER BY comment_id"), user_id).await
    }
}

#[async_trait]
impl ReviewRepo for PgRepo {
    async fn create_review(&self, new: NewReview) -> RepoResult<Review> {
        sqlx::query_as::<_, Review>(&format!(
            "INSERT INTO review (user_id, novel_id, content) VALUES ($1,$2,$3) RETURNING {REVIEW_COLS}"
        ))
        .bind(new.user_id).bind(new.novel_id).bind(&new.content)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_review(&self, id: Id) -> RepoResult<Review> {
        self.one(&format!("SELECT {REVIEW_COLS} FROM review WHERE review_id = $1"), id).await
    }
    async fn update_review(&self, id: Id, content: Option<String>) -> RepoResult<Review> {
        sqlx::query_as::<_, Review>(&format!(
            "UPDATE review SET content = $2, {TOUCH} WHERE review_id = $1 RETURNING {REVIEW_COLS}"
        ))
        .bind(id).bind(content)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_review(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM review WHERE review_id = $1", id).await
    }
    async fn list_novel_reviews(&self, novel_id: Id) -> RepoResult<Vec<Review>> {
        self.many(&format!("SELECT {REVIEW_COLS} FROM review WHERE novel_id = $1 ORDER BY review_id"), novel_id).await
    }
    async fn list_user_reviews(&self, user_id: Id) -> RepoResult<Vec<Review>> {
        self.many(&format!("SELECT {REVIEW_COLS} FROM review WHERE user_id = $1 ORDER BY review_id"), user_id).await
    }
}

#[async_trait]
impl RatingRepo for PgRepo {
    async fn create_rating(&self, new: NewRating) -> RepoResult<Rating> {
        check_score(new.score)?;
        sqlx::query_as::<_, Rating>(&format!(
            "INSERT INTO rating (user_id, novel_id, score) VALUES ($1,$2,$3) RETURNING {RATING_COLS}"
        ))
        .bind(new.user_id).bind(new.novel_id).bind(new.score)
        .fetch_one(&self.pool).await.map_err(db_err)
    }
    async fn get_rating(&self, id: Id) -> RepoResult<Rating> {
        self.one(&format!("SELECT {RATING_COLS} FROM rating WHERE rating_id = $1"), id).await
    }
    async fn update_rating(&self, id: Id, score: i32) -> RepoResult<Rating> {
        check_score(score)?;
        sqlx::query_as::<_, Rating>(&format!(
            "UPDATE rating SET score = $2, {TOUCH} WHERE rating_id = $1 RETURNING {RATING_COLS}"
        ))
        .bind(id).bind(score)
        .fetch_optional(&self.pool).await.map_err(db_err)?
        .ok_or(RepoError::NotFound)
    }
    async fn delete_rating(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM rating WHERE rating_id = $1", id).await
    }
    async fn list_novel_ratings(&self, novel_id: Id) -> RepoResult<Vec<Rating>> {
        self.many(&format!("SELECT {RATING_COLS} FROM rating WHERE novel_id = $1 ORDER BY rating_id"), novel_id).await
    }
    async fn list_user_ratings(&self, user_id: Id) -> RepoResult<Vec<Rating>> {
        self.many(&format!("SELECT {RATING_COLS} FROM rating WHERE user_id = $1 ORDER BY rating_id"), user_id).await
    }
    async fn average_score(&self, novel_id: Id) -> RepoResult<Option<f64>> {
        sqlx::query_scalar::<_, Option<f64>>("SELECT AVG(score)::float8 FROM rating WHERE novel_id = $1")
            .bind(novel_id)
            .fetch_one(&self.pool).await.map_err(db_err)
    }
}

#[async_trait]
impl BookmarkRepo for PgRepo {
    async fn create_bookmark(&self, new: NewBookmark) -> RepoResult<Bookmark> {
        check_progress(new.progress)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        require(&mut *tx, USER_EXISTS, "user", new.user_id).await?;
        require(&mut *tx, NOVEL_EXISTS, "novel", new.novel_id).await?;
        if let Some(chapter_id) = new.chapter_id {
            chapter_in_novel(&mut *tx, chapter_id, new.novel_id).await?;
        }
        let bookmark = sqlx::query_as::<_, Bookmark>(&format!(
            "INSERT INTO bookmark (user_id, novel_id, chapter_id, progress) VALUES ($1,$2,$3,$4) RETURNING {BOOKMARK_COLS}"
        ))
        .bind(new.user_id).bind(new.novel_id).bind(new.chapter_id).bind(new.progress)
        .fetch_one(&mut *tx).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(bookmark)
    }
    async fn get_bookmark(&self, id: Id) -> RepoResult<Bookmark> {
        self.one(&format!("SELECT {BOOKMARK_COLS} FROM bookmark WHERE bookmark_id = $1"), id).await
    }
    async fn update_bookmark(&self, id: Id, upd: UpdateBookmark) -> RepoResult<Bookmark> {
        if let Some(p) = upd.progress { check_progress(p)?; }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let novel_id: Id = sqlx::query_scalar("SELECT novel_id FROM bookmark WHERE bookmark_id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx).await.map_err(db_err)?
            .ok_or(RepoError::NotFound)?;
        if let Some(chapter_id) = upd.chapter_id {
            chapter_in_novel(&mut *tx, chapter_id, novel_id).await?;
        }
        let bookmark = sqlx::query_as::<_, Bookmark>(&format!(
            "UPDATE bookmark SET chapter_id = COALESCE($2, chapter_id), progress = COALESCE($3, progress), {TOUCH} \
             WHERE bookmark_id = $1 RETURNING {BOOKMARK_COLS}"
        ))
        .bind(id).bind(upd.chapter_id).bind(upd.progress)
        .fetch_one(&mut *tx).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(bookmark)
    }
    async fn delete_bookmark(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM bookmark WHERE bookmark_id = $1", id).await
    }
    async fn list_user_bookmarks(&self, user_id: Id) -> RepoResult<Vec<Bookmark>> {
        self.many(&format!("SELECT {BOOKMARK_COLS} FROM bookmark WHERE user_id = $1 ORDER BY bookmark_id"), user_id).await
    }
}

#[async_trait]
impl HistoryRepo for PgRepo {
    async fn record_read(&self, new: NewReadingHistory) -> RepoResult<ReadingHistory> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        require(&mut *tx, USER_EXISTS, "user", new.user_id).await?;
        require(&mut *tx, NOVEL_EXISTS, "novel", new.novel_id).await?;
        chapter_in_novel(&mut *tx, new.chapter_id, new.novel_id).await?;
        let entry = sqlx::query_as::<_, ReadingHistory>(&format!(
            "INSERT INTO reading_history (user_id, novel_id, chapter_id) VALUES ($1,$2,$3) RETURNING {HISTORY_COLS}"
        ))
        .bind(new.user_id).bind(new.novel_id).bind(new.chapter_id)
        .fetch_one(&mut *tx).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(entry)
    }
    async fn get_history_entry(&self, id: Id) -> RepoResult<ReadingHistory> {
        self.one(&format!("SELECT {HISTORY_COLS} FROM reading_history WHERE history_id = $1"), id).await
    }
    async fn delete_history_entry(&self, id: Id) -> RepoResult<()> {
        self.delete("DELETE FROM reading_history WHERE history_id = $1", id).await
    }
    async fn list_user_history(&self, user_id: Id) -> RepoResult<Vec<ReadingHistory>> {
        self.many(&format!(
            "SELECT {HISTORY_COLS} FROM reading_history WHERE user_id = $1 ORDER BY read_at DESC, history_id DESC"
        ), user_id).await
    }
}
