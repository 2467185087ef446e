use axum::{
    extract::{FromRequest, FromRequestParts, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;

use crate::{error::HttpError, images::Upload};

pub mod auth;
pub mod booking;
pub mod factory;
pub mod review;
pub mod tour;
pub mod users;
pub mod views;

/// JSON body extractor whose rejections go through [`HttpError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(HttpError))]
pub struct AppJson<T>(pub T);

/// Query string extractor, rejections rendered like any other 400.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(HttpError))]
pub struct AppQuery<T>(pub T);

/// URL-encoded form extractor for the HTML views.
#[derive(FromRequest)]
#[from_request(via(axum::Form), rejection(HttpError))]
pub struct AppForm<T>(pub T);

/// Body of routes that take either a JSON document or a multipart form
/// with files, chosen by `Content-Type`.
pub enum JsonOrMultipart<T> {
    Json(T),
    Multipart(Multipart),
}

impl<S, T> FromRequest<S> for JsonOrMultipart<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        if multipart {
            Ok(JsonOrMultipart::Multipart(Multipart::from_request(req, state).await?))
        } else {
            let axum::Json(body) = axum::Json::<T>::from_request(req, state).await?;
            Ok(JsonOrMultipart::Json(body))
        }
    }
}

/// A fully read multipart body. Parts with a file name are files.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub text: Vec<(String, String)>,
    pub files: Vec<(String, Upload)>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, HttpError> {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() {
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await?;
                form.files.push((name, Upload { content_type, bytes }));
            } else {
                let value = field.text().await?;
                form.text.push((name, value));
            }
        }
        Ok(form)
    }

    /// Last value of a text part.
    pub fn text(&self, name: &str) -> Option<String> {
        self.text
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    /// Take every file sent under `name`, in order.
    pub fn take_files(&mut self, name: &str) -> Vec<Upload> {
        let (taken, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(key, _)| key == name);
        self.files = rest;
        taken.into_iter().map(|(_, upload)| upload).collect()
    }
}
