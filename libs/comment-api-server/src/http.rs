use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde::Deserialize;

use comment_store::NewComment;

use super::AppState;
use crate::error::ApiError;

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/comments
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state.store.list().await?;
    Ok(json_response(body))
}

// ═══════════════════════════════════════════════════════════════
//  REST: POST /api/comments  (form: author, text)
// ═══════════════════════════════════════════════════════════════

/// `author` / `text` as submitted; `None` when the field is absent.
#[derive(Debug, Default, Deserialize)]
struct CommentFields {
    author: Option<String>,
    text: Option<String>,
}

impl CommentFields {
    /// Fill fields missing here from `fallback`.
    fn or(self, fallback: CommentFields) -> CommentFields {
        CommentFields {
            author: self.author.or(fallback.author),
            text: self.text.or(fallback.text),
        }
    }

    fn into_new_comment(self) -> NewComment {
        NewComment::new(self.author.unwrap_or_default(), self.text.unwrap_or_default())
    }
}

/// Fields come from the body (urlencoded or multipart) and the query string;
/// the body wins when both carry a field. Anything unreadable counts as absent.
pub(crate) async fn handle_append(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let query = match Query::<CommentFields>::try_from_uri(request.uri()) {
        Ok(Query(fields)) => fields,
        Err(e) => {
            tracing::debug!(error = %e, "unreadable query string, ignoring");
            CommentFields::default()
        }
    };
    let form = body_fields(request).await;

    let new = form.or(query).into_new_comment();
    let body = state.store.append(new).await?;
    Ok(json_response(body))
}

async fn body_fields(request: Request) -> CommentFields {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    if is_multipart {
        return match Multipart::from_request(request, &()).await {
            Ok(multipart) => multipart_fields(multipart).await,
            Err(e) => {
                tracing::debug!(error = %e, "unreadable multipart body, ignoring");
                CommentFields::default()
            }
        };
    }

    match Form::<CommentFields>::from_request(request, &()).await {
        Ok(Form(fields)) => fields,
        Err(e) => {
            tracing::debug!(error = %e, "no usable form body, ignoring");
            CommentFields::default()
        }
    }
}

/// First value of each known field; stops at the first malformed part.
async fn multipart_fields(mut multipart: Multipart) -> CommentFields {
    let mut fields = CommentFields::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "malformed multipart part, ignoring the rest");
                break;
            }
        };

        let name = field.name().map(str::to_owned);
        let slot = match name.as_deref() {
            Some("author") => &mut fields.author,
            Some("text") => &mut fields.text,
            _ => continue,
        };
        if slot.is_some() {
            continue;
        }
        match field.text().await {
            Ok(value) => *slot = Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "unreadable multipart field, ignoring the rest");
                break;
            }
        }
    }
    fields
}

// ═══════════════════════════════════════════════════════════════
//  Any other verb on /api/comments
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_unsupported(State(state): State<AppState>, method: Method) -> ApiError {
    // The data file is created by the first request of any verb.
    match state.store.ensure_initialized().await {
        Ok(()) => ApiError::UnsupportedMethod(method),
        Err(e) => e.into(),
    }
}

fn json_response(body: Vec<u8>) -> Response {
    (
        [
            (CONTENT_TYPE, "application/json"),
            (CACHE_CONTROL, "no-cache"),
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}
