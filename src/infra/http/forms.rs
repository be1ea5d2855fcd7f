//! Post and comment form decoding.
//!
//! Browsers submit the post form as `multipart/form-data` so an image can be
//! attached; plain `application/x-www-form-urlencoded` bodies are accepted too.
//! Both decode into the same [`PostInput`].

use axum::{
    Form,
    extract::{FromRequest, Request},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
};
use axum_extra::extract::Multipart;
use axum_extra::extract::multipart::MultipartError;
use serde::Deserialize;
use tracing::warn;

use crate::application::error::HttpError;
use crate::application::posts::{ImageUpload, PostInput};

const SOURCE: &str = "infra::http::forms";

#[derive(Debug, Default, Deserialize)]
struct UrlEncodedFields {
    #[serde(default)]
    text: String,
    #[serde(default)]
    group: String,
}

/// A decoded post or comment form.
#[derive(Debug, Clone)]
pub struct SubmittedForm(pub PostInput);

impl<S> FromRequest<S> for SubmittedForm
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_multipart(request.headers()) {
            let mut multipart = Multipart::from_request(request, state)
                .await
                .map_err(|err| invalid_form(err.to_string()))?;
            read_multipart(&mut multipart).await.map(SubmittedForm)
        } else {
            let Form(fields) = Form::<UrlEncodedFields>::from_request(request, state)
                .await
                .map_err(|err| invalid_form(err.to_string()))?;
            Ok(SubmittedForm(PostInput {
                text: fields.text,
                group: fields.group,
                image: None,
            }))
        }
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

async fn read_multipart(multipart: &mut Multipart) -> Result<PostInput, HttpError> {
    let mut input = PostInput::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(multipart_error(err)),
        };

        match field.name() {
            Some("text") => {
                input.text = field.text().await.map_err(multipart_error)?;
            }
            Some("group") => {
                input.group = field.text().await.map_err(multipart_error)?;
            }
            Some("image") => {
                let file_name = field
                    .file_name()
                    .map(|value| value.trim().to_string())
                    .unwrap_or_default();
                let data = field.bytes().await.map_err(multipart_error)?;
                // An unselected file input still submits an empty part.
                if !file_name.is_empty() && !data.is_empty() {
                    input.image = Some(ImageUpload { file_name, data });
                }
            }
            _ => continue,
        }
    }
    Ok(input)
}

fn multipart_error(err: MultipartError) -> HttpError {
    let status = err.status();
    warn!(
        target = SOURCE,
        status = status.as_u16(),
        error = %err,
        "failed to read multipart payload"
    );
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        HttpError::new(
            SOURCE,
            StatusCode::PAYLOAD_TOO_LARGE,
            "Upload exceeds the size limit",
            err.to_string(),
        )
    } else {
        invalid_form(err.to_string())
    }
}

fn invalid_form(detail: String) -> HttpError {
    HttpError::new(
        SOURCE,
        StatusCode::BAD_REQUEST,
        "Invalid form submission",
        detail,
    )
}
