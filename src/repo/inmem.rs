//! In-process repository backed by ordered maps, with an optional JSON
//! snapshot rewritten after every successful write.
//!
//! Every write runs under a single write-lock scope and performs all of its
//! checks before touching the maps, so a failed write leaves the state as it
//! was.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::*;

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Default, Serialize, Deserialize)]
struct State {
    admins: BTreeMap<Id, Admin>,
    users: BTreeMap<Id, User>,
    authors: BTreeMap<Id, Author>,
    novels: BTreeMap<Id, Novel>,
    chapters: BTreeMap<Id, Chapter>,
    images: BTreeMap<Id, Image>,
    tags: BTreeMap<Id, Tag>,
    novel_tags: BTreeMap<Id, NovelTag>,
    comments: BTreeMap<Id, Comment>,
    reviews: BTreeMap<Id, Review>,
    ratings: BTreeMap<Id, Rating>,
    bookmarks: BTreeMap<Id, Bookmark>,
    history: BTreeMap<Id, ReadingHistory>,
    next_id: Id,
}

// Passwords are never serialized with their rows, so the snapshot carries them separately.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    state: &'a State,
    passwords: BTreeMap<String, &'a str>,
}

#[derive(Deserialize)]
struct Snapshot {
    state: State,
    #[serde(default)]
    passwords: BTreeMap<String, String>,
}

fn missing(what: &str, id: Id) -> RepoError {
    RepoError::ReferentialIntegrity(format!("{what} {id} does not exist"))
}

fn require<T>(map: &BTreeMap<Id, T>, what: &str, id: Id) -> RepoResult<()> {
    if map.contains_key(&id) { Ok(()) } else { Err(missing(what, id)) }
}

fn fetch<T: Clone>(map: &BTreeMap<Id, T>, id: Id) -> RepoResult<T> {
    map.get(&id).cloned().ok_or(RepoError::NotFound)
}

fn remove<T>(map: &mut BTreeMap<Id, T>, id: Id) -> RepoResult<T> {
    map.remove(&id).ok_or(RepoError::NotFound)
}

fn collect<T: Clone>(map: &BTreeMap<Id, T>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    map.values().filter(|v| keep(v)).cloned().collect()
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn chapter_in_novel(&self, chapter_id: Id, novel_id: Id) -> RepoResult<()> {
        let chapter = self.chapters.get(&chapter_id).ok_or_else(|| missing("chapter", chapter_id))?;
        if chapter.novel_id != novel_id {
            return Err(RepoError::Validation(format!(
                "chapter {chapter_id} belongs to novel {}, not {novel_id}", chapter.novel_id
            )));
        }
        Ok(())
    }

    fn ban(&self, order: &BanOrder) -> RepoResult<BanState> {
        check_ban(order)?;
        require(&self.admins, "admin", order.admin_id)?;
        Ok(BanState {
            is_banned: true,
            ban_until: order.until,
            ban_admin_id: Some(order.admin_id),
            ban_reason: order.reason.clone(),
        })
    }

    /// Drops chapters and everything that hangs off them.
    fn purge_chapters(&mut self, ids: &BTreeSet<Id>) {
        self.images.retain(|_, i| !i.chapter_id.is_some_and(|c| ids.contains(&c)));
        self.comments.retain(|_, c| !ids.contains(&c.chapter_id));
        self.history.retain(|_, h| !ids.contains(&h.chapter_id));
        for bm in self.bookmarks.values_mut() {
            if bm.chapter_id.is_some_and(|c| ids.contains(&c)) {
                bm.chapter_id = None;
            }
        }
        self.chapters.retain(|id, _| !ids.contains(id));
    }

    fn passwords(&self) -> BTreeMap<String, &str> {
        let mut out = BTreeMap::new();
        for (id, a) in &self.admins { out.insert(format!("admin:{id}"), a.password.as_str()); }
        for (id, u) in &self.users { out.insert(format!("user:{id}"), u.password.as_str()); }
        for (id, a) in &self.authors { out.insert(format!("author:{id}"), a.password.as_str()); }
        out
    }

    fn restore_passwords(&mut self, mut passwords: BTreeMap<String, String>) {
        let mut take = |key: String| passwords.remove(&key).unwrap_or_default();
        for (id, a) in self.admins.iter_mut() { a.password = take(format!("admin:{id}")); }
        for (id, u) in self.users.iter_mut() { u.password = take(format!("user:{id}")); }
        for (id, a) in self.authors.iter_mut() { a.password = take(format!("author:{id}")); }
    }
}

#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    /// Repository persisted to `<dir>/state.json`, loading any previous snapshot.
    ///
    /// A snapshot that exists but cannot be read or parsed is an error; the
    /// file is left untouched.
    pub fn open(dir: impl Into<PathBuf>) -> RepoResult<Self> {
        let mut path = dir.into();
        path.push(SNAPSHOT_FILE);
        let state = Self::load_state_from(&path)?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(Arc::new(path)),
        })
    }

    /// Repository that lives only as long as the process.
    pub fn ephemeral() -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
    }

    fn load_state_from(path: &Path) -> RepoResult<State> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no snapshot, starting empty");
                return Ok(State::default());
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read snapshot");
                return Err(RepoError::Internal(format!("reading {}: {e}", path.display())));
            }
        };
        let snap: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
            error!(path = %path.display(), error = %e, "snapshot is corrupt, refusing to start");
            RepoError::Internal(format!("parsing {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), "loaded snapshot");
        let mut state = snap.state;
        state.restore_passwords(snap.passwords);
        Ok(state)
    }

    /// Writes the snapshot to a sibling temp file and renames it into place.
    /// Callers hold the write lock, so snapshots never interleave.
    fn persist(&self, state: &State) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        let bytes = match serde_json::to_vec_pretty(&SnapshotRef { state, passwords: state.passwords() }) {
            Ok(bytes) => bytes,
            Err(e) => { warn!(error = %e, "failed to serialize snapshot"); return; }
        };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let tmp = path.with_extension("json.tmp");
        let written = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path));
        if let Err(e) = written {
            warn!(path = %path.display(), error = %e, "failed to write snapshot");
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    /// Runs one write under the lock and snapshots before releasing it, only when it succeeds.
    fn commit<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let mut s = self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))?;
        let out = f(&mut *s)?;
        self.persist(&s);
        Ok(out)
    }
}

impl Default for InMemRepo {
    fn default() -> Self { Self::ephemeral() }
}

#[async_trait]
impl AdminRepo for InMemRepo {
    async fn create_admin(&self, new: NewAdmin) -> RepoResult<Admin> {
        check_account(Some(&new.username), Some(&new.email), Some(&new.password), None)?;
        self.commit(|s| {
            let admin_id = s.next_id();
            let admin = Admin {
                admin_id,
                username: new.username,
                password: new.password,
                email: new.email,
                start_date: Utc::now(),
            };
            s.admins.insert(admin_id, admin.clone());
            Ok(admin)
        })
    }
    async fn get_admin(&self, id: Id) -> RepoResult<Admin> {
        fetch(&self.read()?.admins, id)
    }
    async fn update_admin(&self, id: Id, upd: UpdateAdmin) -> RepoResult<Admin> {
        check_account(upd.username.as_deref(), upd.email.as_deref(), upd.password.as_deref(), None)?;
        self.commit(|s| {
            let admin = s.admins.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.username { admin.username = v; }
            if let Some(v) = upd.password { admin.password = v; }
            if let Some(v) = upd.email { admin.email = v; }
            Ok(admin.clone())
        })
    }
    async fn delete_admin(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| {
            remove(&mut s.admins, id)?;
            let bans = s.users.values_mut().map(|u| &mut u.ban)
                .chain(s.authors.values_mut().map(|a| &mut a.ban));
            for ban in bans.filter(|b| b.ban_admin_id == Some(id)) {
                ban.ban_admin_id = None;
            }
            info!(admin_id = id, "admin deleted");
            Ok(())
        })
    }
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn create_user(&self, new: NewUser) -> RepoResult<User> {
        check_account(Some(&new.username), Some(&new.email), Some(&new.password), new.gender.as_deref())?;
        self.commit(|s| {
            let user_id = s.next_id();
            let user = User {
                user_id,
                username: new.username,
                password: new.password,
                email: new.email,
                gender: new.gender,
                birthdate: new.birthdate,
                bio: new.bio,
                ban: BanState::default(),
            };
            s.users.insert(user_id, user.clone());
            Ok(user)
        })
    }
    async fn get_user(&self, id: Id) -> RepoResult<User> {
        fetch(&self.read()?.users, id)
    }
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
        check_account(upd.username.as_deref(), upd.email.as_deref(), upd.password.as_deref(), upd.gender.as_deref())?;
        self.commit(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.username { user.username = v; }
            if let Some(v) = upd.password { user.password = v; }
            if let Some(v) = upd.email { user.email = v; }
            if let Some(v) = upd.gender { user.gender = Some(v); }
            if let Some(v) = upd.birthdate { user.birthdate = Some(v); }
            if let Some(v) = upd.bio { user.bio = Some(v); }
            Ok(user.clone())
        })
    }
    async fn delete_user(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| {
            remove(&mut s.users, id)?;
            s.comments.retain(|_, c| c.user_id != id);
            s.reviews.retain(|_, r| r.user_id != id);
            s.ratings.retain(|_, r| r.user_id != id);
            s.bookmarks.retain(|_, b| b.user_id != id);
            s.history.retain(|_, h| h.user_id != id);
            info!(user_id = id, "user deleted with reader activity");
            Ok(())
        })
    }
    async fn ban_user(&self, id: Id, order: BanOrder) -> RepoResult<User> {
        self.commit(|s| {
            if !s.users.contains_key(&id) { return Err(RepoError::NotFound); }
            let ban = s.ban(&order)?;
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.ban = ban;
            info!(user_id = id, admin_id = order.admin_id, "user banned");
            Ok(user.clone())
        })
    }
    async fn unban_user(&self, id: Id) -> RepoResult<User> {
        self.commit(|s| {
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.ban = BanState::default();
            Ok(user.clone())
        })
    }
}

#[async_trait]
impl AuthorRepo for InMemRepo {
    async fn create_author(&self, new: NewAuthor) -> RepoResult<Author> {
        check_account(Some(&new.username), Some(&new.email), Some(&new.password), new.gender.as_deref())?;
        self.commit(|s| {
            let author_id = s.next_id();
            let author = Author {
                author_id,
                username: new.username,
                email: new.email,
                password: new.password,
                gender: new.gender,
                bio: new.bio,
                ban: BanState::default(),
            };
            s.authors.insert(author_id, author.clone());
            Ok(author)
        })
    }
    async fn get_author(&self, id: Id) -> RepoResult<Author> {
        fetch(&self.read()?.authors, id)
    }
    async fn update_author(&self, id: Id, upd: UpdateAuthor) -> RepoResult<Author> {
        check_account(upd.username.as_deref(), upd.email.as_deref(), upd.password.as_deref(), upd.gender.as_deref())?;
        self.commit(|s| {
            let author = s.authors.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.username { author.username = v; }
            if let Some(v) = upd.email { author.email = v; }
            if let Some(v) = upd.password { author.password = v; }
            if let Some(v) = upd.gender { author.gender = Some(v); }
            if let Some(v) = upd.bio { author.bio = Some(v); }
            Ok(author.clone())
        })
    }
    async fn delete_author(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| {
            if !s.authors.contains_key(&id) { return Err(RepoError::NotFound); }
            if s.novels.values().any(|n| n.author_id == id) {
                return Err(RepoError::ReferentialIntegrity(format!("author {id} still owns novels")));
            }
            s.authors.remove(&id);
            for img in s.images.values_mut().filter(|i| i.author_id == Some(id)) {
                img.author_id = None;
            }
            info!(author_id = id, "author deleted");
            Ok(())
        })
    }
    async fn ban_author(&self, id: Id, order: BanOrder) -> RepoResult<Author> {
        self.commit(|s| {
            if !s.authors.contains_key(&id) { return Err(RepoError::NotFound); }
            let ban = s.ban(&order)?;
            let author = s.authors.get_mut(&id).ok_or(RepoError::NotFound)?;
            author.ban = ban;
            info!(author_id = id, admin_id = order.admin_id, "author banned");
            Ok(author.clone())
        })
    }
    async fn unban_author(&self, id: Id) -> RepoResult<Author> {
        self.commit(|s| {
            let author = s.authors.get_mut(&id).ok_or(RepoError::NotFound)?;
            author.ban = BanState::default();
            Ok(author.clone())
        })
    }
    async fn list_author_novels(&self, author_id: Id) -> RepoResult<Vec<Novel>> {
        let s = self.read()?;
        Ok(collect(&s.novels, |n| n.author_id == author_id))
    }
}

#[async_trait]
impl NovelRepo for InMemRepo {
    async fn create_novel(&self, new: NewNovel) -> RepoResult<Novel> {
        check_title(Some(&new.title))?;
        self.commit(|s| {
            require(&s.authors, "author", new.author_id)?;
            let novel_id = s.next_id();
            let novel = Novel {
                novel_id,
                author_id: new.author_id,
                title: new.title,
                description: new.description,
                summary: new.summary,
                status: new.status,
            };
            s.novels.insert(novel_id, novel.clone());
            debug!(novel_id, author_id = novel.author_id, "novel created");
            Ok(novel)
        })
    }
    async fn get_novel(&self, id: Id) -> RepoResult<Novel> {
        fetch(&self.read()?.novels, id)
    }
    async fn list_novels(&self) -> RepoResult<Vec<Novel>> {
        Ok(self.read()?.novels.values().cloned().collect())
    }
    async fn update_novel(&self, id: Id, upd: UpdateNovel) -> RepoResult<Novel> {
        check_title(upd.title.as_deref())?;
        self.commit(|s| {
            let novel = s.novels.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.title { novel.title = v; }
            if let Some(v) = upd.description { novel.description = Some(v); }
            if let Some(v) = upd.summary { novel.summary = Some(v); }
            if let Some(v) = upd.status { novel.status = v; }
            Ok(novel.clone())
        })
    }
    async fn delete_novel(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| {
            remove(&mut s.novels, id)?;
            let chapters: BTreeSet<Id> = s.chapters.values()
                .filter(|c| c.novel_id == id)
                .map(|c| c.chapter_id)
                .collect();
            s.purge_chapters(&chapters);
            s.images.retain(|_, i| i.novel_id != Some(id));
            s.novel_tags.retain(|_, t| t.novel_id != id);
            s.reviews.retain(|_, r| r.novel_id != id);
            s.ratings.retain(|_, r| r.novel_id != id);
            s.bookmarks.retain(|_, b| b.novel_id != id);
            s.history.retain(|_, h| h.novel_id != id);
            info!(novel_id = id, chapters = chapters.len(), "novel deleted");
            Ok(())
        })
    }
    async fn list_chapters(&self, novel_id: Id) -> RepoResult<Vec<Chapter>> {
        let s = self.read()?;
        let mut v = collect(&s.chapters, |c| c.novel_id == novel_id);
        v.sort_by_key(|c| (c.chapter_number, c.chapter_id));
        Ok(v)
    }
    async fn list_novel_images(&self, novel_id: Id) -> RepoResult<Vec<Image>> {
        let s = self.read()?;
        Ok(collect(&s.images, |i| i.novel_id == Some(novel_id)))
    }
}

#[async_trait]
impl ChapterRepo for InMemRepo {
    async fn create_chapter(&self, new: NewChapter) -> RepoResult<Chapter> {
        check_title(new.title.as_deref())?;
        self.commit(|s| {
            require(&s.novels, "novel", new.novel_id)?;
            let chapter_id = s.next_id();
            let now = Utc::now();
            let chapter = Chapter {
                chapter_id,
                novel_id: new.novel_id,
                chapter_number: new.chapter_number,
                title: new.title,
                content: new.content,
                created_at: now,
                updated_at: now,
                status: new.status,
            };
            s.chapters.insert(chapter_id, chapter.clone());
            Ok(chapter)
        })
    }
    async fn get_chapter(&self, id: Id) -> RepoResult<Chapter> {
        fetch(&self.read()?.chapters, id)
    }
    async fn update_chapter(&self, id: Id, upd: UpdateChapter) -> RepoResult<Chapter> {
        check_title(upd.title.as_deref())?;
        self.commit(|s| {
            let chapter = s.chapters.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.chapter_number { chapter.chapter_number = v; }
            if let Some(v) = upd.title { chapter.title = Some(v); }
            if let Some(v) = upd.content { chapter.content = v; }
            if let Some(v) = upd.status { chapter.status = v; }
            chapter.updated_at = touch(chapter.updated_at);
            Ok(chapter.clone())
        })
    }
    async fn delete_chapter(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| {
            if !s.chapters.contains_key(&id) { return Err(RepoError::NotFound); }
            s.purge_chapters(&BTreeSet::from([id]));
            info!(chapter_id = id, "chapter deleted");
            Ok(())
        })
    }
    async fn list_chapter_images(&self, chapter_id: Id) -> RepoResult<Vec<Image>> {
        let s = self.read()?;
        Ok(collect(&s.images, |i| i.chapter_id == Some(chapter_id)))
    }
}

#[async_trait]
impl ImageRepo for InMemRepo {
    async fn create_image(&self, new: NewImage) -> RepoResult<Image> {
        check_file_path(&new.file_path)?;
        self.commit(|s| {
            if let Some(id) = new.novel_id { require(&s.novels, "novel", id)?; }
            match (new.novel_id, new.chapter_id) {
                (Some(novel_id), Some(chapter_id)) => s.chapter_in_novel(chapter_id, novel_id)?,
                (None, Some(chapter_id)) => require(&s.chapters, "chapter", chapter_id)?,
                _ => {}
            }
            if let Some(id) = new.author_id { require(&s.authors, "author", id)?; }
            let image_id = s.next_id();
            let image = Image {
                image_id,
                novel_id: new.novel_id,
                chapter_id: new.chapter_id,
                author_id: new.author_id,
                file_path: new.file_path,
                image_type: new.image_type,
                uploaded_at: Utc::now(),
            };
            s.images.insert(image_id, image.clone());
            Ok(image)
        })
    }
    async fn get_image(&self, id: Id) -> RepoResult<Image> {
        fetch(&self.read()?.images, id)
    }
    async fn update_image(&self, id: Id, upd: UpdateImage) -> RepoResult<Image> {
        if let Some(ref p) = upd.file_path { check_file_path(p)?; }
        self.commit(|s| {
            let image = s.images.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.file_path { image.file_path = v; }
            if let Some(v) = upd.image_type { image.image_type = v; }
            Ok(image.clone())
        })
    }
    async fn delete_image(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| remove(&mut s.images, id).map(drop))
    }
    async fn list_author_images(&self, author_id: Id) -> RepoResult<Vec<Image>> {
        let s = self.read()?;
        Ok(collect(&s.images, |i| i.author_id == Some(author_id)))
    }
}

#[async_trait]
impl TagRepo for InMemRepo {
    async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
        let name = check_tag_name(&new.name)?;
        self.commit(|s| {
            if s.tags.values().any(|t| t.name == name) {
                return Err(RepoError::Uniqueness(format!("tag '{name}' already exists")));
            }
            let tag_id = s.next_id();
            let tag = Tag { tag_id, name };
            s.tags.insert(tag_id, tag.clone());
            Ok(tag)
        })
    }
    async fn get_tag(&self, id: Id) -> RepoResult<Tag> {
        fetch(&self.read()?.tags, id)
    }
    async fn find_tag(&self, name: &str) -> RepoResult<Tag> {
        let s = self.read()?;
        let name = name.trim();
        s.tags.values().find(|t| t.name == name).cloned().ok_or(RepoError::NotFound)
    }
    async fn rename_tag(&self, id: Id, name: String) -> RepoResult<Tag> {
        let name = check_tag_name(&name)?;
        self.commit(|s| {
            // uniqueness check before the mutable borrow
            if s.tags.values().any(|t| t.name == name && t.tag_id != id) {
                return Err(RepoError::Uniqueness(format!("tag '{name}' already exists")));
            }
            let tag = s.tags.get_mut(&id).ok_or(RepoError::NotFound)?;
            tag.name = name;
            Ok(tag.clone())
        })
    }
    async fn delete_tag(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| {
            remove(&mut s.tags, id)?;
            s.novel_tags.retain(|_, t| t.tag_id != id);
            Ok(())
        })
    }
    async fn tag_novel(&self, novel_id: Id, tag_id: Id) -> RepoResult<NovelTag> {
        self.commit(|s| {
            require(&s.novels, "novel", novel_id)?;
            require(&s.tags, "tag", tag_id)?;
            if s.novel_tags.values().any(|t| t.novel_id == novel_id && t.tag_id == tag_id) {
                return Err(RepoError::Uniqueness(format!("novel {novel_id} already tagged with {tag_id}")));
            }
            let novel_tag_id = s.next_id();
            let link = NovelTag { novel_tag_id, novel_id, tag_id };
            s.novel_tags.insert(novel_tag_id, link.clone());
            Ok(link)
        })
    }
    async fn untag_novel(&self, novel_id: Id, tag_id: Id) -> RepoResult<()> {
        self.commit(|s| {
            let before = s.novel_tags.len();
            s.novel_tags.retain(|_, t| !(t.novel_id == novel_id && t.tag_id == tag_id));
            if s.novel_tags.len() == before { Err(RepoError::NotFound) } else { Ok(()) }
        })
    }
    async fn list_novel_tags(&self, novel_id: Id) -> RepoResult<Vec<Tag>> {
        let s = self.read()?;
        let ids: BTreeSet<Id> = s.novel_tags.values().filter(|t| t.novel_id == novel_id).map(|t| t.tag_id).collect();
        Ok(ids.iter().filter_map(|id| s.tags.get(id).cloned()).collect())
    }
    async fn list_tagged_novels(&self, tag_id: Id) -> RepoResult<Vec<Novel>> {
        let s = self.read()?;
        let ids: BTreeSet<Id> = s.novel_tags.values().filter(|t| t.tag_id == tag_id).map(|t| t.novel_id).collect();
        Ok(ids.iter().filter_map(|id| s.novels.get(id).cloned()).collect())
    }
}

#[async_trait]
impl CommentRepo for InMemRepo {
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
        self.commit(|s| {
            require(&s.users, "user", new.user_id)?;
            require(&s.chapters, "chapter", new.chapter_id)?;
            let comment_id = s.next_id();
            let now = Utc::now();
            let comment = Comment {
                comment_id,
                user_id: new.user_id,
                chapter_id: new.chapter_id,
                content: new.content,
                created_at: now,
                updated_at: now,
            };
            s.comments.insert(comment_id, comment.clone());
            Ok(comment)
        })
    }
    async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
        fetch(&self.read()?.comments, id)
    }
    async fn update_comment(&self, id: Id, content: String) -> RepoResult<Comment> {
        self.commit(|s| {
            let comment = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            comment.content = content;
            comment.updated_at = touch(comment.updated_at);
            Ok(comment.clone())
        })
    }
    async fn delete_comment(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| remove(&mut s.comments, id).map(drop))
    }
    async fn list_chapter_comments(&self, chapter_id: Id) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        Ok(collect(&s.comments, |c| c.chapter_id == chapter_id))
    }
    async fn list_user_comments(&self, user_id: Id) -> RepoResult<Vec<Comment>> {
        let s = self.read()?;
        Ok(collect(&s.comments, |c| c.user_id == user_id))
    }
}

#[async_trait]
impl ReviewRepo for InMemRepo {
    async fn create_review(&self, new: NewReview) -> RepoResult<Review> {
        self.commit(|s| {
            require(&s.users, "user", new.user_id)?;
            require(&s.novels, "novel", new.novel_id)?;
            let review_id = s.next_id();
            let now = Utc::now();
            let review = Review {
                review_id,
                user_id: new.user_id,
                novel_id: new.novel_id,
                content: new.content,
                created_at: now,
                updated_at: now,
            };
            s.reviews.insert(review_id, review.clone());
            Ok(review)
        })
    }
    async fn get_review(&self, id: Id) -> RepoResult<Review> {
        fetch(&self.read()?.reviews, id)
    }
    async fn update_review(&self, id: Id, content: Option<String>) -> RepoResult<Review> {
        self.commit(|s| {
            let review = s.reviews.get_mut(&id).ok_or(RepoError::NotFound)?;
            review.content = content;
            review.updated_at = touch(review.updated_at);
            Ok(review.clone())
        })
    }
    async fn delete_review(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| remove(&mut s.reviews, id).map(drop))
    }
    async fn list_novel_reviews(&self, novel_id: Id) -> RepoResult<Vec<Review>> {
        let s = self.read()?;
        Ok(collect(&s.reviews, |r| r.novel_id == novel_id))
    }
    async fn list_user_reviews(&self, user_id: Id) -> RepoResult<Vec<Review>> {
        let s = self.read()?;
        Ok(collect(&s.reviews, |r| r.user_id == user_id))
    }
}

#[async_trait]
impl RatingRepo for InMemRepo {
    async fn create_rating(&self, new: NewRating) -> RepoResult<Rating> {
        check_score(new.score)?;
        self.commit(|s| {
            require(&s.users, "user", new.user_id)?;
            require(&s.novels, "novel", new.novel_id)?;
            let rating_id = s.next_id();
            let now = Utc::now();
            let rating = Rating {
                rating_id,
                user_id: new.user_id,
                novel_id: new.novel_id,
                score: new.score,
                created_at: now,
                updated_at: now,
            };
            s.ratings.insert(rating_id, rating.clone());
            Ok(rating)
        })
    }
    async fn get_rating(&self, id: Id) -> RepoResult<Rating> {
        fetch(&self.read()?.ratings, id)
    }
    async fn update_rating(&self, id: Id, score: i32) -> RepoResult<Rating> {
        check_score(score)?;
        self.commit(|s| {
            let rating = s.ratings.get_mut(&id).ok_or(RepoError::NotFound)?;
            rating.score = score;
            rating.updated_at = touch(rating.updated_at);
            Ok(rating.clone())
        })
    }
    async fn delete_rating(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| remove(&mut s.ratings, id).map(drop))
    }
    async fn list_novel_ratings(&self, novel_id: Id) -> RepoResult<Vec<Rating>> {
        let s = self.read()?;
        Ok(collect(&s.ratings, |r| r.novel_id == novel_id))
    }
    async fn list_user_ratings(&self, user_id: Id) -> RepoResult<Vec<Rating>> {
        let s = self.read()?;
        Ok(collect(&s.ratings, |r| r.user_id == user_id))
    }
    async fn average_score(&self, novel_id: Id) -> RepoResult<Option<f64>> {
        let s = self.read()?;
        let scores: Vec<i32> = s.ratings.values().filter(|r| r.novel_id == novel_id).map(|r| r.score).collect();
        if scores.is_empty() {
            return Ok(None);
        }
        let total: i64 = scores.iter().map(|&v| i64::from(v)).sum();
        Ok(Some(total as f64 / scores.len() as f64))
    }
}

#[async_trait]
impl BookmarkRepo for InMemRepo {
    async fn create_bookmark(&self, new: NewBookmark) -> RepoResult<Bookmark> {
        check_progress(new.progress)?;
        self.commit(|s| {
            require(&s.users, "user", new.user_id)?;
            require(&s.novels, "novel", new.novel_id)?;
            if let Some(chapter_id) = new.chapter_id {
                s.chapter_in_novel(chapter_id, new.novel_id)?;
            }
            let bookmark_id = s.next_id();
            let bookmark = Bookmark {
                bookmark_id,
                user_id: new.user_id,
                novel_id: new.novel_id,
                chapter_id: new.chapter_id,
                progress: new.progress,
                updated_at: Utc::now(),
            };
            s.bookmarks.insert(bookmark_id, bookmark.clone());
            Ok(bookmark)
        })
    }
    async fn get_bookmark(&self, id: Id) -> RepoResult<Bookmark> {
        fetch(&self.read()?.bookmarks, id)
    }
    async fn update_bookmark(&self, id: Id, upd: UpdateBookmark) -> RepoResult<Bookmark> {
        if let Some(p) = upd.progress { check_progress(p)?; }
        self.commit(|s| {
            let novel_id = s.bookmarks.get(&id).ok_or(RepoError::NotFound)?.novel_id;
            if let Some(chapter_id) = upd.chapter_id {
                s.chapter_in_novel(chapter_id, novel_id)?;
            }
            let bookmark = s.bookmarks.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(v) = upd.chapter_id { bookmark.chapter_id = Some(v); }
            if let Some(v) = upd.progress { bookmark.progress = v; }
            bookmark.updated_at = touch(bookmark.updated_at);
            Ok(bookmark.clone())
        })
    }
    async fn delete_bookmark(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| remove(&mut s.bookmarks, id).map(drop))
    }
    async fn list_user_bookmarks(&self, user_id: Id) -> RepoResult<Vec<Bookmark>> {
        let s = self.read()?;
        Ok(collect(&s.bookmarks, |b| b.user_id == user_id))
    }
}

#[async_trait]
impl HistoryRepo for InMemRepo {
    async fn record_read(&self, new: NewReadingHistory) -> RepoResult<ReadingHistory> {
        self.commit(|s| {
            require(&s.users, "user", new.user_id)?;
            require(&s.novels, "novel", new.novel_id)?;
            s.chapter_in_novel(new.chapter_id, new.novel_id)?;
            let history_id = s.next_id();
            let entry = ReadingHistory {
                history_id,
                user_id: new.user_id,
                novel_id: new.novel_id,
                chapter_id: new.chapter_id,
                read_at: Utc::now(),
            };
            s.history.insert(history_id, entry.clone());
            Ok(entry)
        })
    }
    async fn get_history_entry(&self, id: Id) -> RepoResult<ReadingHistory> {
        fetch(&self.read()?.history, id)
    }
    async fn delete_history_entry(&self, id: Id) -> RepoResult<()> {
        self.commit(|s| remove(&mut s.history, id).map(drop))
    }
    async fn list_user_history(&self, user_id: Id) -> RepoResult<Vec<ReadingHistory>> {
        let s = self.read()?;
        let mut v = collect(&s.history, |h| h.user_id == user_id);
        v.sort_by(|a, b| b.read_at.cmp(&a.read_at).then(b.history_id.cmp(&a.history_id)));
        Ok(v)
    }
}
