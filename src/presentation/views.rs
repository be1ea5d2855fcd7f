use crate::application::error::{ErrorReport, HttpError};
use crate::application::feed::{Feed, FeedSubject};
use crate::application::pagination::Page;
use crate::application::posts::{FormErrors, PostDetail, PostInput};
use crate::application::viewer::Viewer;
use crate::domain::entities::{CommentListing, GroupRecord, PostListing, UserRecord};
use crate::domain::posts::{self, DISPLAY_TIME_FORMAT};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

const SITE_TITLE: &str = "Quill";
const TITLE_EXCERPT_CHARS: usize = 30;

/// Unreserved characters stay literal inside a single path segment.
const SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Custom 404 page. Rendered without a viewer so it never depends on request state.
pub fn render_not_found_response() -> Response {
    let view = LayoutContext::new(&Viewer::Anonymous, "Page not found", ErrorPageView::not_found());
    let mut response = match (ErrorTemplate { view }).render() {
        Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Page not found").into_response(),
    };
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// Shared page frame: document title plus the navigation state for the viewer.
pub struct LayoutContext<T> {
    pub title: String,
    pub viewer: Option<AuthorLink>,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(viewer: &Viewer, title: impl Into<String>, content: T) -> Self {
        let title = title.into();
        let title = if title.is_empty() {
            SITE_TITLE.to_string()
        } else {
            format!("{title} | {SITE_TITLE}")
        };
        Self {
            title,
            viewer: viewer.username().map(|username| AuthorLink {
                username: username.to_string(),
                href: profile_path(username),
            }),
            content,
        }
    }
}

#[derive(Clone)]
pub struct GroupLink {
    pub title: String,
    pub href: String,
}

#[derive(Clone)]
pub struct PostCard {
    pub href: String,
    pub text: String,
    pub image_url: Option<String>,
    pub author: String,
    pub author_href: String,
    pub group: Option<GroupLink>,
    pub published: String,
    pub iso_date: String,
    pub edit_href: Option<String>,
}

impl PostCard {
    pub fn from_listing(post: &PostListing, viewer: &Viewer) -> Self {
        let edit_href = viewer
            .user()
            .filter(|user| post.is_authored_by(user))
            .map(|_| post_edit_path(post.id));
        Self {
            href: post_path(post.id),
            text: post.text.clone(),
            image_url: post.image.as_deref().map(media_path),
            author: post.author_username.clone(),
            author_href: profile_path(&post.author_username),
            group: post.group.as_ref().map(|group| GroupLink {
                title: group.title.clone(),
                href: group_path(&group.slug),
            }),
            published: format_display(post.created_at),
            iso_date: format_iso(post.created_at),
            edit_href,
        }
    }
}

/// Previous/next links for a paginated listing.
pub struct PaginationView {
    pub number: u64,
    pub num_pages: u64,
    pub first_href: Option<String>,
    pub previous_href: Option<String>,
    pub next_href: Option<String>,
    pub last_href: Option<String>,
    pub has_other_pages: bool,
}

impl PaginationView {
    pub fn from_page<T>(page: &Page<T>) -> Self {
        Self {
            number: page.number,
            num_pages: page.num_pages,
            first_href: page.has_previous().then(|| page_query(1)),
            previous_href: page.previous_page_number().map(page_query),
            next_href: page.next_page_number().map(page_query),
            last_href: page.has_next().then(|| page_query(page.num_pages)),
            has_other_pages: page.has_other_pages(),
        }
    }
}

pub struct ListingContext {
    pub posts: Vec<PostCard>,
    pub pagination: PaginationView,
}

impl ListingContext {
    pub fn from_page(page: &Page<PostListing>, viewer: &Viewer) -> Self {
        Self {
            posts: page
                .items
                .iter()
                .map(|post| PostCard::from_listing(post, viewer))
                .collect(),
            pagination: PaginationView::from_page(page),
        }
    }
}

pub struct IndexContext {
    pub listing: ListingContext,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub view: LayoutContext<IndexContext>,
}

pub struct GroupContext {
    pub title: String,
    pub description: String,
    pub listing: ListingContext,
}

#[derive(Template)]
#[template(path = "group_list.html")]
pub struct GroupTemplate {
    pub view: LayoutContext<GroupContext>,
}

pub struct ProfileContext {
    pub username: String,
    pub post_count: u64,
    pub following: bool,
    pub can_follow: bool,
    pub follow_href: String,
    pub unfollow_href: String,
    pub listing: ListingContext,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub view: LayoutContext<ProfileContext>,
}

#[derive(Clone)]
pub struct AuthorLink {
    pub username: String,
    pub href: String,
}

pub struct FollowContext {
    pub authors: Vec<AuthorLink>,
    pub listing: ListingContext,
}

#[derive(Template)]
#[template(path = "follow.html")]
pub struct FollowTemplate {
    pub view: LayoutContext<FollowContext>,
}

pub struct CommentView {
    pub author: String,
    pub author_href: String,
    pub text: String,
    pub published: String,
    pub iso_date: String,
}

impl From<&CommentListing> for CommentView {
    fn from(comment: &CommentListing) -> Self {
        Self {
            author: comment.author_username.clone(),
            author_href: profile_path(&comment.author_username),
            text: comment.text.clone(),
            published: format_display(comment.created_at),
            iso_date: format_iso(comment.created_at),
        }
    }
}

pub struct CommentFormView {
    pub action: String,
    pub text: String,
    pub error: Option<String>,
}

pub struct PostDetailContext {
    pub post: PostCard,
    pub author_posts: u64,
    pub comments: Vec<CommentView>,
    /// Absent for anonymous viewers, who get a login link instead.
    pub comment_form: Option<CommentFormView>,
    pub login_href: String,
}

#[derive(Template)]
#[template(path = "post_detail.html")]
pub struct PostDetailTemplate {
    pub view: LayoutContext<PostDetailContext>,
}

pub struct GroupOption {
    pub id: String,
    pub title: String,
    pub selected: bool,
}

pub struct PostFormContext {
    pub is_edit: bool,
    pub action: String,
    pub text: String,
    pub groups: Vec<GroupOption>,
    pub current_image: Option<String>,
    pub text_error: Option<String>,
    pub group_error: Option<String>,
    pub image_error: Option<String>,
}

impl PostFormContext {
    pub fn blank(groups: &[GroupRecord]) -> Self {
        Self::build(false, "/create/".to_string(), "", "", groups, None)
    }

    pub fn for_post(post: &PostListing, groups: &[GroupRecord]) -> Self {
        let group = post
            .group
            .as_ref()
            .map(|group| group.id.to_string())
            .unwrap_or_default();
        Self::build(
            true,
            post_edit_path(post.id),
            &post.text,
            &group,
            groups,
            post.image.as_deref().map(media_path),
        )
    }

    /// Redisplay submitted values with their validation messages.
    pub fn with_errors(
        action: String,
        is_edit: bool,
        input: &PostInput,
        errors: FormErrors,
        groups: &[GroupRecord],
    ) -> Self {
        let mut context = Self::build(is_edit, action, &input.text, &input.group, groups, None);
        context.text_error = errors.text;
        context.group_error = errors.group;
        context.image_error = errors.image;
        context
    }

    fn build(
        is_edit: bool,
        action: String,
        text: &str,
        selected: &str,
        groups: &[GroupRecord],
        current_image: Option<String>,
    ) -> Self {
        let selected = selected.trim();
        Self {
            is_edit,
            action,
            text: text.to_string(),
            groups: groups
                .iter()
                .map(|group| {
                    let id = group.id.to_string();
                    GroupOption {
                        selected: id == selected,
                        id,
                        title: group.title.clone(),
                    }
                })
                .collect(),
            current_image,
            text_error: None,
            group_error: None,
            image_error: None,
        }
    }
}

#[derive(Template)]
#[template(path = "create_post.html")]
pub struct PostFormTemplate {
    pub view: LayoutContext<PostFormContext>,
}

pub struct ErrorPageView {
    pub title: String,
    pub message: String,
    pub primary_action: Option<ErrorAction>,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            title: "Page Not Found".to_string(),
            message: "The page you requested does not exist.".to_string(),
            primary_action: Some(ErrorAction::home()),
        }
    }
}

pub struct ErrorAction {
    pub href: String,
    pub label: String,
}

impl ErrorAction {
    pub fn home() -> Self {
        Self {
            href: "/".to_string(),
            label: "Back to home".to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "404.html")]
pub struct ErrorTemplate {
    pub view: LayoutContext<ErrorPageView>,
}

/// Build the template for a composed feed.
pub fn feed_page(feed: &Feed, viewer: &Viewer) -> Response {
    let listing = ListingContext::from_page(&feed.page, viewer);
    match &feed.subject {
        FeedSubject::All => {
            let view = LayoutContext::new(viewer, "Latest posts", IndexContext { listing });
            render_template_response(IndexTemplate { view }, StatusCode::OK)
        }
        FeedSubject::Group(group) => {
            let content = GroupContext {
                title: group.title.clone(),
                description: group.description.clone(),
                listing,
            };
            let view = LayoutContext::new(viewer, group.title.clone(), content);
            render_template_response(GroupTemplate { view }, StatusCode::OK)
        }
        FeedSubject::Author { author, following } => {
            let content = profile_context(author, *following, viewer, feed.page.total, listing);
            let title = format!("Posts by {}", author.username);
            let view = LayoutContext::new(viewer, title, content);
            render_template_response(ProfileTemplate { view }, StatusCode::OK)
        }
        FeedSubject::Following { authors } => {
            let content = FollowContext {
                authors: authors
                    .iter()
                    .map(|author| AuthorLink {
                        username: author.username.clone(),
                        href: profile_path(&author.username),
                    })
                    .collect(),
                listing,
            };
            let view = LayoutContext::new(viewer, "Following", content);
            render_template_response(FollowTemplate { view }, StatusCode::OK)
        }
    }
}

fn profile_context(
    author: &UserRecord,
    following: bool,
    viewer: &Viewer,
    post_count: u64,
    listing: ListingContext,
) -> ProfileContext {
    ProfileContext {
        username: author.username.clone(),
        post_count,
        following,
        can_follow: viewer.is_authenticated() && !viewer.is(author),
        follow_href: format!("{}follow/", profile_path(&author.username)),
        unfollow_href: format!("{}unfollow/", profile_path(&author.username)),
        listing,
    }
}

/// Post detail page, optionally carrying a rejected comment for redisplay.
pub fn post_detail_page(
    detail: &PostDetail,
    viewer: &Viewer,
    login_path: &str,
    rejected_comment: Option<(&str, String)>,
) -> Response {
    let post_href = post_path(detail.post.id);
    let comment_form = viewer.is_authenticated().then(|| {
        let (text, error) = match rejected_comment {
            Some((text, error)) => (text.to_string(), Some(error)),
            None => (String::new(), None),
        };
        CommentFormView {
            action: format!("{post_href}comment/"),
            text,
            error,
        }
    });
    let content = PostDetailContext {
        post: PostCard::from_listing(&detail.post, viewer),
        author_posts: detail.author_posts,
        comments: detail.comments.iter().map(CommentView::from).collect(),
        comment_form,
        login_href: login_href(login_path, &post_href),
    };
    let title = posts::excerpt(&detail.post.text, TITLE_EXCERPT_CHARS);
    let view = LayoutContext::new(viewer, title, content);
    render_template_response(PostDetailTemplate { view }, StatusCode::OK)
}

pub fn post_form_page(context: PostFormContext, viewer: &Viewer) -> Response {
    let title = if context.is_edit { "Edit post" } else { "New post" };
    let view = LayoutContext::new(viewer, title, context);
    render_template_response(PostFormTemplate { view }, StatusCode::OK)
}

pub fn post_path(id: Uuid) -> String {
    format!("/posts/{id}/")
}

pub fn post_edit_path(id: Uuid) -> String {
    format!("/posts/{id}/edit/")
}

pub fn profile_path(username: &str) -> String {
    format!("/profile/{}/", encode_segment(username))
}

pub fn group_path(slug: &str) -> String {
    format!("/group/{}/", encode_segment(slug))
}

pub fn media_path(stored_path: &str) -> String {
    format!("/media/{stored_path}")
}

/// Login location carrying the path to return to once authenticated.
pub fn login_href(login_path: &str, next: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    format!("{login_path}?{query}")
}

fn page_query(number: u64) -> String {
    format!("?page={number}")
}

fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT_SET).to_string()
}

fn format_display(timestamp: OffsetDateTime) -> String {
    timestamp.format(DISPLAY_TIME_FORMAT).unwrap_or_default()
}

fn format_iso(timestamp: OffsetDateTime) -> String {
    timestamp.format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use time::macros::datetime;

    use super::*;
    use crate::application::pagination::paginate;
    use crate::domain::entities::GroupSummary;

    fn user(name: &str) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            username: name.to_string(),
            created_at: datetime!(2025-03-01 12:00 UTC),
        }
    }

    fn listing(author: &UserRecord) -> PostListing {
        PostListing {
            id: Uuid::new_v4(),
            text: "Hello <world>".to_string(),
            image: Some("posts/abc-photo.png".to_string()),
            author_id: author.id,
            author_username: author.username.clone(),
            group: Some(GroupSummary {
                id: Uuid::new_v4(),
                title: "Cats".to_string(),
                slug: "cats".to_string(),
            }),
            created_at: datetime!(2025-03-01 12:30 UTC),
            updated_at: datetime!(2025-03-01 12:30 UTC),
        }
    }

    #[test]
    fn edit_link_is_only_offered_to_the_author() {
        let author = user("leo");
        let post = listing(&author);

        let own = PostCard::from_listing(&post, &Viewer::User(author.clone()));
        assert_eq!(own.edit_href, Some(post_edit_path(post.id)));

        let other = PostCard::from_listing(&post, &Viewer::User(user("tolstoy")));
        assert!(other.edit_href.is_none());

        let anonymous = PostCard::from_listing(&post, &Viewer::Anonymous);
        assert!(anonymous.edit_href.is_none());
        assert_eq!(anonymous.image_url.as_deref(), Some("/media/posts/abc-photo.png"));
        assert_eq!(anonymous.group.map(|group| group.href), Some("/group/cats/".to_string()));
    }

    #[test]
    fn pagination_links_follow_page_position() {
        let per_page = NonZeroU32::new(10).expect("non-zero");
        let page = paginate((0..25).collect::<Vec<_>>(), per_page, Some("2"));
        let view = PaginationView::from_page(&page);
        assert_eq!(view.previous_href.as_deref(), Some("?page=1"));
        assert_eq!(view.next_href.as_deref(), Some("?page=3"));
        assert_eq!(view.last_href.as_deref(), Some("?page=3"));

        let single = paginate(vec![1], per_page, None);
        let view = PaginationView::from_page(&single);
        assert!(!view.has_other_pages);
        assert!(view.next_href.is_none());
    }

    #[test]
    fn profile_path_percent_encodes_segment() {
        assert_eq!(profile_path("ann smith"), "/profile/ann%20smith/");
        assert_eq!(profile_path("a/b+c"), "/profile/a%2Fb%2Bc/");
        assert_eq!(group_path("cats-and_dogs"), "/group/cats-and_dogs/");
    }

    #[test]
    fn login_href_encodes_next_path() {
        assert_eq!(
            login_href("/auth/login/", "/create/?a=1"),
            "/auth/login/?next=%2Fcreate%2F%3Fa%3D1"
        );
    }

    #[test]
    fn not_found_page_renders_with_report() {
        let response = render_not_found_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn index_template_escapes_post_text() {
        let author = user("leo");
        let post = listing(&author);
        let per_page = NonZeroU32::new(10).expect("non-zero");
        let page = paginate(vec![post], per_page, None);
        let view = LayoutContext::new(
            &Viewer::Anonymous,
            "Latest posts",
            IndexContext {
                listing: ListingContext::from_page(&page, &Viewer::Anonymous),
            },
        );
        let html = IndexTemplate { view }.render().expect("render");
        assert!(html.contains("Hello &#60;world&#62;") || html.contains("Hello &lt;world&gt;"));
        assert!(html.contains("/profile/leo/"));
    }
}
