//! CRUD operations shared by every resource.
//!
//! Each operation exists twice: a core function returning the typed model,
//! for handlers that need to adjust input or output, and a ready-made axum
//! handler for routes that need nothing special.
use std::future::Future;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::{
    AppState,
    db::{DBClient, Document, StoreError, parse_id, query::Filter},
    dtos::{ListResponseDto, ResponseDto},
    error::{ErrorMessage, HttpError},
    handler::{AppJson, AppQuery},
    query_features::QueryFeatures,
};

/// How much related data a rendered document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    Listing,
    Detail,
}

/// What the generic handlers need to know about a model.
pub trait Resource: Document + Clone {
    type Input: DeserializeOwned + Validate + Send + 'static;
    type Patch: DeserializeOwned + Validate + Send + 'static;

    /// Turn validated input into a new document.
    fn build(input: Self::Input) -> Result<Self, HttpError>;

    /// Merge a validated patch, re-checking cross-field rules.
    fn apply(&mut self, patch: Self::Patch) -> Result<(), HttpError>;

    /// Client-facing rendering without related documents.
    fn view(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Filters every query on this resource is confined to.
    fn visibility() -> Vec<Filter> {
        Vec::new()
    }

    fn populate(
        &self,
        _db: &DBClient,
        _expand: Expand,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send {
        let view = self.view();
        async move { view }
    }

    /// Runs after every successful create, update and delete.
    fn after_write(&self, _db: &DBClient) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Ok(()) }
    }
}

fn not_found() -> HttpError {
    HttpError::not_found(ErrorMessage::DocumentNotFound)
}

fn scoped<R: Resource>(scope: Vec<Filter>) -> Vec<Filter> {
    let mut filters = R::visibility();
    filters.extend(scope);
    filters
}

pub async fn create_one<R: Resource>(db: &DBClient, input: R::Input) -> Result<R, HttpError> {
    input.validate()?;
    let doc = R::build(input)?;
    let saved = db.insert(&doc).await?;
    saved.after_write(db).await?;
    tracing::info!(collection = R::COLLECTION, id = %saved.id(), "document created");
    Ok(saved)
}

pub async fn get_one<R: Resource>(db: &DBClient, id: &str, scope: Vec<Filter>) -> Result<R, HttpError> {
    let id = parse_id(id)?;
    db.find_by_id::<R>(id, &scoped::<R>(scope))
        .await?
        .ok_or_else(not_found)
}

/// Run a list query. `scope` narrows the collection (reviews of one tour,
/// bookings of one user) on top of the resource's visibility.
pub async fn get_all<R: Resource>(
    db: &DBClient,
    scope: Vec<Filter>,
    params: Vec<(String, String)>,
) -> Result<Vec<Value>, HttpError> {
    let prepared = QueryFeatures::new(scoped::<R>(scope), params, R::FIELDS)
        .filter()?
        .sort()?
        .limit_fields()
        .paginate()
        .finish();

    if prepared.page_requested {
        let total = db.count::<R>(&prepared.find.filters).await?;
        if prepared.find.skip as u64 >= total {
            return Err(HttpError::not_found(ErrorMessage::PageNotFound));
        }
    }

    let docs: Vec<R> = db.find(&prepared.find).await?;
    let mut views = Vec::with_capacity(docs.len());
    for doc in &docs {
        let view = doc.populate(db, Expand::Listing).await?;
        views.push(prepared.projection.apply(view));
    }
    Ok(views)
}

pub async fn update_one<R: Resource>(db: &DBClient, id: &str, patch: R::Patch) -> Result<R, HttpError> {
    patch.validate()?;
    let mut doc = get_one::<R>(db, id, Vec::new()).await?;
    doc.apply(patch)?;
    let saved = db.replace(&doc).await?.ok_or_else(not_found)?;
    saved.after_write(db).await?;
    tracing::info!(collection = R::COLLECTION, id = %saved.id(), "document updated");
    Ok(saved)
}

pub async fn delete_one<R: Resource>(db: &DBClient, id: &str) -> Result<(), HttpError> {
    let doc = get_one::<R>(db, id, Vec::new()).await?;
    let removed = db.delete::<R>(doc.id()).await?.ok_or_else(not_found)?;
    removed.after_write(db).await?;
    tracing::info!(collection = R::COLLECTION, id = %removed.id(), "document deleted");
    Ok(())
}

pub fn respond_created(view: Value) -> impl IntoResponse {
    (StatusCode::CREATED, Json(ResponseDto::success(view)))
}

pub fn respond_one(view: Value) -> impl IntoResponse {
    Json(ResponseDto::success(view))
}

pub fn respond_list(views: Vec<Value>) -> impl IntoResponse {
    Json(ListResponseDto::success(views))
}

pub async fn create_handler<R: Resource>(
    State(app_state): State<AppState>,
    AppJson(input): AppJson<R::Input>,
) -> Result<impl IntoResponse, HttpError> {
    let doc = create_one::<R>(&app_state.db_client, input).await?;
    Ok(respond_created(doc.view()?))
}

pub async fn get_handler<R: Resource>(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let doc = get_one::<R>(&app_state.db_client, &id, Vec::new()).await?;
    let view = doc.populate(&app_state.db_client, Expand::Detail).await?;
    Ok(respond_one(view))
}

pub async fn list_handler<R: Resource>(
    State(app_state): State<AppState>,
    AppQuery(params): AppQuery<Vec<(String, String)>>,
) -> Result<impl IntoResponse, HttpError> {
    let views = get_all::<R>(&app_state.db_client, Vec::new(), params).await?;
    Ok(respond_list(views))
}

pub async fn update_handler<R: Resource>(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    AppJson(patch): AppJson<R::Patch>,
) -> Result<impl IntoResponse, HttpError> {
    let doc = update_one::<R>(&app_state.db_client, &id, patch).await?;
    Ok(respond_one(doc.view()?))
}

pub async fn delete_handler<R: Resource>(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    delete_one::<R>(&app_state.db_client, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
