use crate::models::*;
use utoipa::OpenApi;

/// Schema document for the persisted entities and their write payloads.
#[derive(OpenApi)]
#[openapi(
    components(schemas(
        NovelStatus, ChapterStatus, ImageType,
        Admin, NewAdmin, UpdateAdmin,
        BanState, BanOrder,
        User, NewUser, UpdateUser,
        Author, NewAuthor, UpdateAuthor,
        Novel, NewNovel, UpdateNovel,
        Chapter, NewChapter, UpdateChapter,
        Image, NewImage, UpdateImage,
        Tag, NewTag, NovelTag,
        Comment, NewComment,
        Review, NewReview,
        Rating, NewRating,
        Bookmark, NewBookmark, UpdateBookmark,
        ReadingHistory, NewReadingHistory,
    )),
    tags(
        (name = "accounts", description = "Admins, users and authors"),
        (name = "content", description = "Novels, chapters, images and tags"),
        (name = "activity", description = "Comments, reviews, ratings, bookmarks and reading history"),
    )
)]
pub struct ApiDoc;
