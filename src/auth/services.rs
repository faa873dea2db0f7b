use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{LoginRequest, RegisterRequest},
    password::{hash_password, verify_password},
};
use crate::{
    error::{ApiError, ApiResult},
    mail,
    state::AppState,
    store::{invitation::InvitationToken, NewUser, StoreError, User, DEFAULT_ROLE},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

/// Creates a pending user and mails its activation link. If the mail cannot
/// be sent the user is deleted again; a failed delete is left for the
/// expired-invitation purge.
#[instrument(skip(state, req), fields(username = %req.username))]
pub async fn register(state: &AppState, req: RegisterRequest) -> ApiResult<(User, String)> {
    req.validate()?;
    let password_hash = hash_password(&req.password)?;
    let token = InvitationToken::generate();

    let user = state
        .storage
        .users
        .create_and_invite(
            NewUser {
                username: req.username,
                email: req.email,
                password_hash,
                role: DEFAULT_ROLE.to_string(),
            },
            &token.digest,
            state.config.invitation_ttl(),
        )
        .await?;

    let url = mail::activation_url(&state.config.frontend_url, &token.plain);
    if let Err(mail_err) = state
        .mailer
        .send_welcome(&user.username, &user.email, &url)
        .await
    {
        error!(user_id = user.id, error = %mail_err, "activation mail failed");
        if let Err(del_err) = state.storage.users.delete(user.id).await {
            error!(user_id = user.id, error = %del_err, "compensating delete failed");
        }
        return Err(ApiError::Internal(mail_err.to_string()));
    }

    info!(user_id = user.id, "user registered");
    Ok((user, token.plain))
}

#[instrument(skip(state, req))]
pub async fn authenticate(state: &AppState, req: LoginRequest) -> ApiResult<String> {
    req.validate()?;
    let user = match state.storage.users.get_by_email(&req.email).await {
        Ok(u) => u,
        Err(StoreError::NotFound) => {
            warn!("login for unknown or inactive email");
            return Err(ApiError::Unauthorized("invalid credentials"));
        }
        Err(e) => return Err(e.into()),
    };

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::Unauthorized("invalid credentials"));
    }

    let token = state.tokens.issue(user.id).map_err(|e| ApiError::Internal(e.to_string()))?;
    info!(user_id = user.id, "user logged in");
    Ok(token)
}

#[instrument(skip_all)]
pub async fn activate(state: &AppState, plain_token: &str) -> ApiResult<()> {
    state.storage.users.activate(plain_token).await?;
    info!("user activated");
    Ok(())
}
