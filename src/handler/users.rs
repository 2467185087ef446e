use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch},
};
use chrono::Utc;
use serde_json::Value;
use tracing::instrument;
use validator::Validate;

use crate::{
    AppState,
    db::{StoreError, UserExt, active_scope, query::Filter},
    dtos::{FilterUserDto, SignupUserDto, UpdateMeDto, UpdateUserDto, UserData, UserResponseDto},
    error::{ErrorMessage, HttpError},
    handler::{
        JsonOrMultipart, MultipartForm, auth,
        factory::{self, Resource},
    },
    images::{UPLOAD_LIMIT, USER_PHOTO},
    middleware::{JWTAuthMiddleware, protect, restrict_to},
    models::{User, UserRole},
    utils::password,
};

const ADMINS: &[UserRole] = &[UserRole::Admin];

/// Router for the session-bound part of `/api/v1/users`.
///
/// Everything here runs behind `protect`; the CRUD routes are for admins.
pub fn users_handler(app_state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route(
            "/",
            get(factory::list_handler::<User>).post(create_user),
        )
        .route(
            "/{id}",
            get(factory::get_handler::<User>)
                .patch(factory::update_handler::<User>)
                .delete(factory::delete_handler::<User>),
        )
        .route_layer(middleware::from_fn(|req, next| restrict_to(req, next, ADMINS)));

    Router::new()
        .route("/updateMyPassword", patch(auth::update_password))
        .route("/me", get(get_me))
        .route(
            "/updateMe",
            patch(update_me).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/deleteMe", delete(delete_me))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(app_state, protect))
}

impl Resource for User {
    type Input = SignupUserDto;
    type Patch = UpdateUserDto;

    /// New account with the default role. The password is hashed here.
    fn build(input: SignupUserDto) -> Result<Self, HttpError> {
        let missing = |message: &str| HttpError::bad_request(format!("Invalid input data. {}.", message));

        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| missing("Please tell us your name!"))?;
        let email = input.email.ok_or_else(|| missing("Please provide your email"))?;
        let plain = input.password.ok_or_else(|| missing("Please provide a password"))?;

        let hashed = password::hash(plain).map_err(|e| {
            tracing::error!("Password hashing error: {}", e);
            HttpError::internal(e)
        })?;

        Ok(User::new(name, &email, hashed))
    }

    fn apply(&mut self, patch: UpdateUserDto) -> Result<(), HttpError> {
        if let Some(name) = patch.name {
            self.name = user_name(&name)?;
        }
        if let Some(email) = patch.email {
            self.email = email.trim().to_lowercase();
        }
        if let Some(photo) = patch.photo {
            self.photo = photo;
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        Ok(())
    }

    fn view(&self) -> Result<Value, StoreError> {
        Ok(serde_json::to_value(FilterUserDto::filter_user(self))?)
    }

    fn visibility() -> Vec<Filter> {
        active_scope()
    }
}

fn user_name(raw: &str) -> Result<String, HttpError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(HttpError::bad_request("Invalid input data. Please tell us your name!."));
    }
    Ok(name.to_string())
}

/// Accounts are only created through signup.
pub async fn create_user() -> Result<(), HttpError> {
    Err(HttpError::bad_request(
        "This route is not defined! Please use /signup instead",
    ))
}

#[instrument(skip(app_state, auth), fields(user_id = %auth.user.id))]
pub async fn get_me(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let user = factory::get_one::<User>(&app_state.db_client, &auth.user.id.to_string(), Vec::new()).await?;
    Ok(factory::respond_one(user.view()?))
}

/// Change the current user's name, email or photo. Passwords have their
/// own route.
///
/// Takes JSON, or a multipart form whose `photo` file is cropped to
/// 500x500 and stored as `user-<id>-<millis>.jpeg`. A photo that cannot be
/// processed fails the whole update.
#[instrument(skip(app_state, auth, payload), fields(user_id = %auth.user.id))]
pub async fn update_me(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
    payload: JsonOrMultipart<UpdateMeDto>,
) -> Result<impl IntoResponse, HttpError> {
    let (body, photo) = match payload {
        JsonOrMultipart::Json(body) => (body, None),
        JsonOrMultipart::Multipart(multipart) => {
            let mut form = MultipartForm::read(multipart).await?;
            let body = UpdateMeDto {
                name: form.text("name"),
                email: form.text("email"),
                password: form.text("password").map(Value::String),
                password_confirm: form.text("passwordConfirm").map(Value::String),
            };
            (body, form.take_files("photo").into_iter().next())
        }
    };

    if body.touches_password() {
        return Err(HttpError::bad_request(ErrorMessage::PasswordUpdateNotAllowed));
    }
    body.validate()?;

    let mut user = auth.user;
    if let Some(name) = body.name {
        user.name = user_name(&name)?;
    }
    if let Some(email) = body.email {
        user.email = email.trim().to_lowercase();
    }
    if let Some(upload) = photo {
        let filename = format!("user-{}-{}.jpeg", user.id, Utc::now().timestamp_millis());
        user.photo = app_state
            .images
            .save(upload, "users", filename, USER_PHOTO)
            .await?;
    }

    let updated = app_state
        .db_client
        .update_user(&user)
        .await?
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNoLongerExist))?;

    tracing::info!("profile updated");
    Ok(Json(UserResponseDto {
        status: "success",
        data: UserData {
            user: FilterUserDto::filter_user(&updated),
        },
    }))
}

/// Deactivate the current account. It disappears from every user query.
#[instrument(skip(app_state, auth), fields(user_id = %auth.user.id))]
pub async fn delete_me(
    State(app_state): State<AppState>,
    Extension(auth): Extension<JWTAuthMiddleware>,
) -> Result<impl IntoResponse, HttpError> {
    let mut user = auth.user;
    user.active = false;

    app_state.db_client.update_user(&user).await?;

    tracing::info!("account deactivated");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DBClient;

    fn signup(email: &str) -> SignupUserDto {
        SignupUserDto {
            name: Some(" Jonas ".to_string()),
            email: Some(email.to_string()),
            password: Some("pass1234".to_string()),
            password_confirm: Some("pass1234".to_string()),
        }
    }

    #[tokio::test]
    async fn build_hashes_and_normalizes() {
        let user = User::build(signup("Jonas@Example.com")).unwrap();
        assert_eq!(user.name, "Jonas");
        assert_eq!(user.email, "jonas@example.com");
        assert_eq!(user.role, UserRole::User);
        assert!(password::compare("pass1234", &user.password).unwrap());
    }

    #[tokio::test]
    async fn view_hides_credentials() {
        let user = User::build(signup("jonas@example.com")).unwrap();
        let view = user.view().unwrap();
        assert!(view.get("password").is_none());
        assert!(view.get("passwordResetToken").is_none());
        assert!(view.get("active").is_none());
        assert_eq!(view["role"], "user");
    }

    #[tokio::test]
    async fn duplicate_signup_is_a_400() {
        let db = DBClient::memory();
        factory::create_one::<User>(&db, signup("jonas@example.com")).await.unwrap();
        let err = factory::create_one::<User>(&db, signup("JONAS@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("jonas@example.com"));
    }

    #[tokio::test]
    async fn deactivated_users_are_not_listed() {
        let db = DBClient::memory();
        let mut gone = factory::create_one::<User>(&db, signup("gone@example.com")).await.unwrap();
        factory::create_one::<User>(&db, signup("here@example.com")).await.unwrap();
        gone.active = false;
        db.update_user(&gone).await.unwrap();

        let listed = factory::get_all::<User>(&db, Vec::new(), Vec::new()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["email"], "here@example.com");
    }
}
