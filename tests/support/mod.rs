#![allow(dead_code)]

use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use quill::application::feed::FeedService;
use quill::application::follow::FollowService;
use quill::application::pagination::PageWindow;
use quill::application::posts::PostService;
use quill::application::repos::{
    CommentsRepo, CreateCommentParams, CreateGroupParams, CreatePostParams, FollowsRepo,
    GroupsRepo, HealthProbe, PostFilter, PostsRepo, PostsWriteRepo, RepoError, UpdatePostParams,
    UsersRepo,
};
use quill::cache::{OutputCacheConfig, OutputCacheState};
use quill::config::AuthSettings;
use quill::domain::entities::{
    CommentListing, CommentRecord, FollowEdge, GroupRecord, GroupSummary, PostListing, PostRecord,
    UserRecord,
};
use quill::infra::http::{AdminState, HttpState, build_admin_router, build_router};
use quill::infra::uploads::UploadStorage;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;
use tower::ServiceExt;
use uuid::Uuid;

pub const USER_HEADER: &str = "x-forwarded-user";

#[derive(Default)]
struct Tables {
    users: Vec<UserRecord>,
    groups: Vec<GroupRecord>,
    posts: Vec<PostRecord>,
    comments: Vec<CommentRecord>,
    follows: Vec<(Uuid, Uuid)>,
}

/// In-memory stand-in for every repository trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    clock: AtomicI64,
    unhealthy: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("store lock poisoned")
    }

    /// Strictly increasing timestamps keep listing order deterministic.
    fn tick(&self) -> OffsetDateTime {
        let step = self.clock.fetch_add(1, Ordering::SeqCst);
        datetime!(2025-03-01 09:00 UTC) + time::Duration::seconds(step)
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    pub fn user(&self, username: &str) -> UserRecord {
        let mut tables = self.tables();
        if let Some(user) = tables.users.iter().find(|user| user.username == username) {
            return user.clone();
        }
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: self.tick(),
        };
        tables.users.push(user.clone());
        user
    }

    pub fn group(&self, title: &str, slug: &str) -> GroupRecord {
        let group = GroupRecord {
            id: Uuid::new_v4(),
            title: title.to_string(),
            slug: slug.to_string(),
            description: format!("All about {title}"),
            created_at: self.tick(),
        };
        self.tables().groups.push(group.clone());
        group
    }

    pub fn post(&self, author: &UserRecord, text: &str, group: Option<&GroupRecord>) -> PostRecord {
        let now = self.tick();
        let post = PostRecord {
            id: Uuid::new_v4(),
            author_id: author.id,
            text: text.to_string(),
            group_id: group.map(|group| group.id),
            image: None,
            created_at: now,
            updated_at: now,
        };
        self.tables().posts.push(post.clone());
        post
    }

    pub fn delete_post(&self, id: Uuid) {
        let mut tables = self.tables();
        tables.posts.retain(|post| post.id != id);
        tables.comments.retain(|comment| comment.post_id != id);
    }

    pub fn posts(&self) -> Vec<PostRecord> {
        self.tables().posts.clone()
    }

    pub fn post_by_id(&self, id: Uuid) -> Option<PostRecord> {
        self.tables().posts.iter().find(|post| post.id == id).cloned()
    }

    pub fn comments(&self) -> Vec<CommentRecord> {
        self.tables().comments.clone()
    }

    pub fn follow_edges(&self) -> Vec<(Uuid, Uuid)> {
        self.tables().follows.clone()
    }

    fn matches(tables: &Tables, post: &PostRecord, filter: PostFilter) -> bool {
        match filter {
            PostFilter::All => true,
            PostFilter::Group(group_id) => post.group_id == Some(group_id),
            PostFilter::Author(author_id) => post.author_id == author_id,
            PostFilter::FollowedBy(follower_id) => tables
                .follows
                .iter()
                .any(|(follower, author)| *follower == follower_id && *author == post.author_id),
        }
    }

    fn listing(tables: &Tables, post: &PostRecord) -> PostListing {
        let author_username = tables
            .users
            .iter()
            .find(|user| user.id == post.author_id)
            .map(|user| user.username.clone())
            .unwrap_or_default();
        let group = post.group_id.and_then(|group_id| {
            tables
                .groups
                .iter()
                .find(|group| group.id == group_id)
                .map(|group| GroupSummary {
                    id: group.id,
                    title: group.title.clone(),
                    slug: group.slug.clone(),
                })
        });
        PostListing {
            id: post.id,
            text: post.text.clone(),
            image: post.image.clone(),
            author_id: post.author_id,
            author_username,
            group,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }

    fn sorted_matches(tables: &Tables, filter: PostFilter) -> Vec<PostListing> {
        let mut posts: Vec<&PostRecord> = tables
            .posts
            .iter()
            .filter(|post| Self::matches(tables, post, filter))
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts
            .into_iter()
            .map(|post| Self::listing(tables, post))
            .collect()
    }
}

#[async_trait]
impl PostsRepo for MemoryStore {
    async fn count_posts(&self, filter: PostFilter) -> Result<u64, RepoError> {
        let tables = self.tables();
        Ok(Self::sorted_matches(&tables, filter).len() as u64)
    }

    async fn list_posts(
        &self,
        filter: PostFilter,
        window: PageWindow,
    ) -> Result<Vec<PostListing>, RepoError> {
        let tables = self.tables();
        Ok(Self::sorted_matches(&tables, filter)
            .into_iter()
            .skip(window.offset as usize)
            .take(window.limit as usize)
            .collect())
    }

    async fn find_post(&self, id: Uuid) -> Result<Option<PostListing>, RepoError> {
        let tables = self.tables();
        Ok(tables
            .posts
            .iter()
            .find(|post| post.id == id)
            .map(|post| Self::listing(&tables, post)))
    }
}

#[async_trait]
impl PostsWriteRepo for MemoryStore {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let now = self.tick();
        let post = PostRecord {
            id: Uuid::new_v4(),
            author_id: params.author_id,
            text: params.text,
            group_id: params.group_id,
            image: params.image,
            created_at: now,
            updated_at: now,
        };
        self.tables().posts.push(post.clone());
        Ok(post)
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let now = self.tick();
        let mut tables = self.tables();
        let post = tables
            .posts
            .iter_mut()
            .find(|post| post.id == params.id)
            .ok_or(RepoError::NotFound)?;
        post.text = params.text;
        post.group_id = params.group_id;
        post.image = params.image;
        post.updated_at = now;
        Ok(post.clone())
    }
}

#[async_trait]
impl GroupsRepo for MemoryStore {
    async fn find_group_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self.tables().groups.iter().find(|g| g.slug == slug).cloned())
    }

    async fn find_group_by_id(&self, id: Uuid) -> Result<Option<GroupRecord>, RepoError> {
        Ok(self.tables().groups.iter().find(|g| g.id == id).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
        let mut groups = self.tables().groups.clone();
        groups.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        Ok(groups)
    }

    async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError> {
        let created_at = self.tick();
        let mut tables = self.tables();
        if tables.groups.iter().any(|g| g.slug == params.slug) {
            return Err(RepoError::Duplicate {
                constraint: "post_groups_slug_key".to_string(),
            });
        }
        let group = GroupRecord {
            id: Uuid::new_v4(),
            title: params.title,
            slug: params.slug,
            description: params.description,
            created_at,
        };
        tables.groups.push(group.clone());
        Ok(group)
    }
}

#[async_trait]
impl UsersRepo for MemoryStore {
    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, RepoError> {
        Ok(self
            .tables()
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn ensure_user(&self, username: &str) -> Result<UserRecord, RepoError> {
        Ok(self.user(username))
    }
}

#[async_trait]
impl CommentsRepo for MemoryStore {
    async fn comments_by_post(&self, post_id: Uuid) -> Result<Vec<CommentListing>, RepoError> {
        let tables = self.tables();
        let mut comments: Vec<&CommentRecord> = tables
            .comments
            .iter()
            .filter(|comment| comment.post_id == post_id)
            .collect();
        comments.sort_by_key(|comment| comment.created_at);
        Ok(comments
            .into_iter()
            .map(|comment| CommentListing {
                id: comment.id,
                post_id: comment.post_id,
                author_username: tables
                    .users
                    .iter()
                    .find(|user| user.id == comment.author_id)
                    .map(|user| user.username.clone())
                    .unwrap_or_default(),
                text: comment.text.clone(),
                created_at: comment.created_at,
            })
            .collect())
    }

    async fn create_comment(
        &self,
        params: CreateCommentParams,
    ) -> Result<CommentRecord, RepoError> {
        let comment = CommentRecord {
            id: Uuid::new_v4(),
            post_id: params.post_id,
            author_id: params.author_id,
            text: params.text,
            created_at: self.tick(),
        };
        self.tables().comments.push(comment.clone());
        Ok(comment)
    }
}

#[async_trait]
impl FollowsRepo for MemoryStore {
    async fn create_follow(&self, edge: FollowEdge) -> Result<bool, RepoError> {
        let pair = (edge.follower_id(), edge.author_id());
        let mut tables = self.tables();
        if tables.follows.contains(&pair) {
            return Ok(false);
        }
        tables.follows.push(pair);
        Ok(true)
    }

    async fn delete_follow(&self, follower_id: Uuid, author_id: Uuid) -> Result<bool, RepoError> {
        let mut tables = self.tables();
        let before = tables.follows.len();
        tables
            .follows
            .retain(|pair| *pair != (follower_id, author_id));
        Ok(tables.follows.len() < before)
    }

    async fn is_following(&self, follower_id: Uuid, author_id: Uuid) -> Result<bool, RepoError> {
        Ok(self.tables().follows.contains(&(follower_id, author_id)))
    }

    async fn authors_followed_by(&self, follower_id: Uuid) -> Result<Vec<UserRecord>, RepoError> {
        let tables = self.tables();
        let mut authors: Vec<UserRecord> = tables
            .follows
            .iter()
            .filter(|(follower, _)| *follower == follower_id)
            .filter_map(|(_, author)| tables.users.iter().find(|user| user.id == *author))
            .cloned()
            .collect();
        authors.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(authors)
    }
}

#[async_trait]
impl HealthProbe for MemoryStore {
    async fn check(&self) -> Result<(), RepoError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(RepoError::Timeout)
        } else {
            Ok(())
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub admin: Router,
    pub store: Arc<MemoryStore>,
    pub cache: Option<OutputCacheState>,
    pub uploads: Arc<UploadStorage>,
    _upload_dir: TempDir,
}

pub struct TestAppBuilder {
    page_size: u32,
    cache_ttl: Option<Duration>,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            page_size: 10,
            cache_ttl: None,
        }
    }
}

impl TestAppBuilder {
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn build(self) -> TestApp {
        let store = MemoryStore::new();
        let upload_dir = TempDir::new().expect("temp upload dir");
        let uploads =
            Arc::new(UploadStorage::new(upload_dir.path().to_path_buf()).expect("upload storage"));

        let page_size = NonZeroU32::new(self.page_size).expect("non-zero page size");
        let follows = Arc::new(FollowService::new(store.clone(), store.clone()));
        let feed = Arc::new(FeedService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            follows.clone(),
            page_size,
        ));
        let posts = Arc::new(PostService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            uploads.clone(),
        ));

        let cache = self.cache_ttl.map(|ttl| {
            OutputCacheState::in_memory(OutputCacheConfig {
                enabled: true,
                index_ttl: ttl,
                max_entries: NonZeroUsize::new(16).expect("non-zero"),
            })
        });

        let state = HttpState {
            feed,
            posts,
            follows,
            users: store.clone(),
            health: store.clone(),
            upload_storage: uploads.clone(),
            auth: AuthSettings::default(),
            cache: cache.clone(),
            upload_limit_bytes: 1024 * 1024,
        };
        let admin = build_admin_router(AdminState {
            cache: cache.clone(),
            health: store.clone(),
        });

        TestApp {
            router: build_router(state),
            admin,
            store,
            cache,
            uploads,
            _upload_dir: upload_dir,
        }
    }
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> Response {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(user) = user {
            request = request.header(USER_HEADER, user);
        }
        self.send(request.body(Body::empty()).expect("request"))
            .await
    }

    pub async fn post_form(&self, uri: &str, user: Option<&str>, body: &str) -> Response {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(user) = user {
            request = request.header(USER_HEADER, user);
        }
        self.send(request.body(Body::from(body.to_string())).expect("request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn admin_post(&self, uri: &str) -> Response {
        self.admin
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router is infallible")
    }
}

pub async fn body_bytes(response: Response) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).expect("utf-8 body")
}

pub fn location(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub fn assert_redirect(response: &Response, expected: &str) {
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response).as_deref(), Some(expected));
}
