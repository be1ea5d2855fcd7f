mod support;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use support::{TestApp, USER_HEADER, assert_redirect, body_bytes, body_text, location};

const BOUNDARY: &str = "quill-test-boundary";

fn multipart_body(text: &str, group: &str, image: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in [("text", text), ("group", group)] {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, data)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, user: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(USER_HEADER, user)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

#[tokio::test]
async fn create_form_lists_groups_for_signed_in_user() {
    let app = TestApp::new();
    app.store.group("Cats", "cats");

    let response = app.get("/create/", Some("leo")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("New post"));
    assert!(body.contains(">Cats</option>"));
}

#[tokio::test]
async fn create_post_without_group_redirects_to_profile() {
    let app = TestApp::new();

    let response = app.post_form("/create/", Some("leo"), "text=Hello&group=").await;
    assert_redirect(&response, "/profile/leo/");

    let posts = app.store.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].text, "Hello");
    assert_eq!(posts[0].group_id, None);

    let body = body_text(app.get("/", None).await).await;
    assert!(body.contains("Hello"));
    assert!(!body.contains("class=\"group\""));
}

#[tokio::test]
async fn create_post_in_group_appears_in_group_listing() {
    let app = TestApp::new();
    let cats = app.store.group("Cats", "cats");

    let form = format!("text=Purring&group={}", cats.id);
    let response = app.post_form("/create/", Some("leo"), &form).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let body = body_text(app.get("/group/cats/", None).await).await;
    assert!(body.contains("Purring"));
}

#[tokio::test]
async fn blank_text_redisplays_form_with_error() {
    let app = TestApp::new();

    let response = app.post_form("/create/", Some("leo"), "text=%20%20&group=").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Post text must not be empty."));
    assert!(app.store.posts().is_empty());
}

#[tokio::test]
async fn unknown_group_redisplays_form_with_error() {
    let app = TestApp::new();

    let form = format!("text=Hi&group={}", uuid::Uuid::new_v4());
    let response = app.post_form("/create/", Some("leo"), &form).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Select a valid group."));
    assert!(app.store.posts().is_empty());
}

#[tokio::test]
async fn anonymous_create_redirects_to_login_and_writes_nothing() {
    let app = TestApp::new();

    let response = app.get("/create/", None).await;
    assert_redirect(&response, "/auth/login/?next=%2Fcreate%2F");

    let response = app.post_form("/create/", None, "text=Hello&group=").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(
        location(&response)
            .is_some_and(|target| target.starts_with("/auth/login/?next="))
    );
    assert!(app.store.posts().is_empty());
}

#[tokio::test]
async fn author_can_edit_post() {
    let app = TestApp::new();
    let leo = app.store.user("leo");
    let post = app.store.post(&leo, "draft", None);

    let form_page = app
        .get(&format!("/posts/{}/edit/", post.id), Some("leo"))
        .await;
    assert_eq!(form_page.status(), StatusCode::OK);
    let body = body_text(form_page).await;
    assert!(body.contains("Edit post"));
    assert!(body.contains("draft"));

    let response = app
        .post_form(
            &format!("/posts/{}/edit/", post.id),
            Some("leo"),
            "text=final&group=",
        )
        .await;
    assert_redirect(&response, &format!("/posts/{}/", post.id));
    let stored = app.store.post_by_id(post.id).expect("post exists");
    assert_eq!(stored.text, "final");
    assert!(stored.updated_at > stored.created_at);
}

#[tokio::test]
async fn non_author_edit_is_redirected_and_leaves_post_unchanged() {
    let app = TestApp::new();
    let leo = app.store.user("leo");
    let post = app.store.post(&leo, "mine", None);
    let detail = format!("/posts/{}/", post.id);

    let response = app
        .get(&format!("/posts/{}/edit/", post.id), Some("ann"))
        .await;
    assert_redirect(&response, &detail);

    let response = app
        .post_form(
            &format!("/posts/{}/edit/", post.id),
            Some("ann"),
            "text=hijacked&group=",
        )
        .await;
    assert_redirect(&response, &detail);
    assert_eq!(
        app.store.post_by_id(post.id).expect("post exists").text,
        "mine"
    );
}

#[tokio::test]
async fn edit_link_is_only_shown_to_the_author() {
    let app = TestApp::new();
    let leo = app.store.user("leo");
    let post = app.store.post(&leo, "mine", None);
    let edit_href = format!("/posts/{}/edit/", post.id);

    let as_author = body_text(app.get("/", Some("leo")).await).await;
    assert!(as_author.contains(&edit_href));

    let as_other = body_text(app.get("/profile/leo/", Some("ann")).await).await;
    assert!(!as_other.contains(&edit_href));
}

#[tokio::test]
async fn multipart_create_stores_and_serves_image() {
    let app = TestApp::new();
    let png = b"\x89PNG\r\n\x1a\nnot-really-a-png";

    let response = app
        .send(multipart_request(
            "/create/",
            "leo",
            multipart_body("With a picture", "", Some(("cat.png", png.as_slice()))),
        ))
        .await;
    assert_redirect(&response, "/profile/leo/");

    let posts = app.store.posts();
    let image = posts[0].image.clone().expect("image stored");

    let body = body_text(app.get("/profile/leo/", None).await).await;
    assert!(body.contains(&format!("/media/{image}")));

    let media = app.get(&format!("/media/{image}"), None).await;
    assert_eq!(media.status(), StatusCode::OK);
    assert_eq!(
        media
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some("image/png")
    );
    assert_eq!(body_bytes(media).await.as_ref(), png.as_slice());
}

#[tokio::test]
async fn non_image_upload_is_rejected() {
    let app = TestApp::new();

    let response = app
        .send(multipart_request(
            "/create/",
            "leo",
            multipart_body("Attachment", "", Some(("notes.txt", b"plain text".as_slice()))),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Upload a valid image."));
    assert!(app.store.posts().is_empty());
}

#[tokio::test]
async fn missing_media_is_not_found() {
    let app = TestApp::new();

    let response = app.get("/media/posts/absent.png", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn comment_is_added_and_listed_oldest_first() {
    let app = TestApp::new();
    let leo = app.store.user("leo");
    let post = app.store.post(&leo, "discuss", None);
    let comment_uri = format!("/posts/{}/comment/", post.id);

    let response = app.post_form(&comment_uri, Some("ann"), "text=first!").await;
    assert_redirect(&response, &format!("/posts/{}/", post.id));
    app.post_form(&comment_uri, Some("max"), "text=second").await;

    let body = body_text(app.get(&format!("/posts/{}/", post.id), None).await).await;
    let first = body.find("first!").expect("first comment shown");
    let second = body.find("second").expect("second comment shown");
    assert!(first < second);
    assert_eq!(app.store.comments().len(), 2);
}

#[tokio::test]
async fn blank_comment_redisplays_detail_with_error() {
    let app = TestApp::new();
    let leo = app.store.user("leo");
    let post = app.store.post(&leo, "discuss", None);

    let response = app
        .post_form(&format!("/posts/{}/comment/", post.id), Some("ann"), "text=+")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert!(body.contains("Comment text must not be empty."));
    assert!(app.store.comments().is_empty());
}

#[tokio::test]
async fn anonymous_comment_redirects_to_login_and_writes_nothing() {
    let app = TestApp::new();
    let leo = app.store.user("leo");
    let post = app.store.post(&leo, "discuss", None);
    let comment_uri = format!("/posts/{}/comment/", post.id);

    let response = app.post_form(&comment_uri, None, "text=hello").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(
        location(&response)
            .is_some_and(|target| target.starts_with("/auth/login/?next=%2Fposts%2F"))
    );
    assert!(app.store.comments().is_empty());
}

#[tokio::test]
async fn comment_on_unknown_post_is_not_found() {
    let app = TestApp::new();

    let response = app
        .post_form(
            &format!("/posts/{}/comment/", uuid::Uuid::new_v4()),
            Some("ann"),
            "text=hello",
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
