use std::collections::BTreeMap;

use serde_json::json;

use super::{form_value, identity_json, is_local_path, validate_required, Context, HandlerResult, Outcome};
use crate::auth::{AccountUpdate, AuthError, SignUp, SignUpOutcome};
use crate::security::{validate_email, validate_password};
use crate::session::FormData;

pub async fn show_login(ctx: &mut Context<'_>) -> HandlerResult {
    if ctx.session.is_logged_in() {
        return Ok(Outcome::redirect("/dashboard"));
    }
    Ok(Outcome::render("auth/login", json!({ "title": "Login" })))
}

pub async fn login(ctx: &mut Context<'_>) -> HandlerResult {
    let form = ctx.sanitized_form();
    let errors = validate_required(&form, &["username", "password"]);
    if !errors.is_empty() {
        ctx.reject_form(errors, &form);
        return Ok(Outcome::redirect("/login"));
    }

    let identifier = form_value(&form, "username").to_string();
    let password = form.get("password").cloned().unwrap_or_default();
    let limiter = ctx.state.rate_limiter;

    if !limiter.check_rate_limit(ctx.session, &identifier) {
        tracing::warn!("Login attempts exhausted for this session");
        ctx.session.set_flash("error", "Too many login attempts. Please try again later.");
        return Ok(Outcome::redirect("/login"));
    }

    match ctx.state.auth.sign_in(&identifier, &password).await {
        Ok(identity) => {
            let first_name = identity.first_name.clone();
            let redirect = ctx.session.take_redirect().filter(|path| is_local_path(path));

            ctx.session.login(identity);
            limiter.clear_rate_limit(ctx.session, &identifier);
            tracing::info!("User signed in");

            ctx.session.set_flash("success", format!("Welcome back, {}!", first_name));
            Ok(Outcome::redirect(redirect.unwrap_or_else(|| "/dashboard".to_string())))
        }
        Err(AuthError::InvalidCredentials) => {
            limiter.record_failed_attempt(ctx.session, &identifier);
            ctx.session.set_flash("error", AuthError::InvalidCredentials.to_string());
            ctx.session.set_form_data(FormData::from([("username".to_string(), identifier)]));
            Ok(Outcome::redirect("/login"))
        }
        Err(e @ AuthError::AccountDisabled) | Err(e @ AuthError::Rejected(_)) => {
            ctx.session.set_flash("error", e.to_string());
            Ok(Outcome::redirect("/login"))
        }
        Err(e) => {
            tracing::error!("Sign-in failed: {}", e);
            ctx.session.set_flash("error", "Login is temporarily unavailable. Please try again later.");
            Ok(Outcome::redirect("/login"))
        }
    }
}

pub async fn show_register(ctx: &mut Context<'_>) -> HandlerResult {
    if ctx.session.is_logged_in() {
        return Ok(Outcome::redirect("/dashboard"));
    }
    Ok(Outcome::render("auth/register", json!({ "title": "Register" })))
}

pub async fn register(ctx: &mut Context<'_>) -> HandlerResult {
    let form = ctx.sanitized_form();
    let mut errors = validate_required(
        &form,
        &["username", "email", "password", "confirm_password", "first_name", "last_name"],
    );

    let email = form_value(&form, "email");
    if !email.is_empty() && !validate_email(email) {
        errors.insert("email".into(), "Please enter a valid email address".into());
    }
    check_new_password(&form, "password", &mut errors);

    if !errors.is_empty() {
        ctx.reject_form(errors, &form);
        return Ok(Outcome::redirect("/register"));
    }

    let request = SignUp {
        username: form_value(&form, "username").to_string(),
        email: email.to_string(),
        password: form.get("password").cloned().unwrap_or_default(),
        first_name: form_value(&form, "first_name").to_string(),
        last_name: form_value(&form, "last_name").to_string(),
    };

    match ctx.state.auth.sign_up(&request).await {
        Ok(SignUpOutcome::SignedIn(identity)) => {
            let first_name = identity.first_name.clone();
            ctx.session.login(identity);
            tracing::info!("New account registered");
            ctx.session.set_flash(
                "success",
                format!("Welcome to {}, {}!", ctx.state.config.app.name, first_name),
            );
            Ok(Outcome::redirect("/dashboard"))
        }
        Ok(SignUpOutcome::ConfirmationRequired) => {
            ctx.session.set_flash(
                "success",
                "Registration successful! Please check your email to confirm your account, then log in.",
            );
            Ok(Outcome::redirect("/login"))
        }
        Err(AuthError::UsernameTaken) => {
            let errors = BTreeMap::from([("username".to_string(), AuthError::UsernameTaken.to_string())]);
            ctx.reject_form(errors, &form);
            Ok(Outcome::redirect("/register"))
        }
        Err(AuthError::EmailTaken) => {
            let errors = BTreeMap::from([("email".to_string(), AuthError::EmailTaken.to_string())]);
            ctx.reject_form(errors, &form);
            Ok(Outcome::redirect("/register"))
        }
        Err(AuthError::Rejected(message)) => {
            ctx.session.set_flash("error", message);
            ctx.keep_form(&form);
            Ok(Outcome::redirect("/register"))
        }
        Err(e) => {
            tracing::error!("Registration failed: {}", e);
            ctx.session.set_flash("error", "Registration failed. Please try again later.");
            Ok(Outcome::redirect("/register"))
        }
    }
}

/// Always lands on the home page, signed in or not.
pub async fn logout(ctx: &mut Context<'_>) -> HandlerResult {
    ctx.session.logout(ctx.state.auth.as_ref()).await;
    ctx.session.set_flash("success", "You have been logged out successfully.");
    Ok(Outcome::redirect("/"))
}

pub async fn show_profile(ctx: &mut Context<'_>) -> HandlerResult {
    let identity = ctx.identity()?;
    Ok(Outcome::render(
        "auth/profile",
        json!({ "title": "My Profile", "user": identity_json(&identity) }),
    ))
}

pub async fn update_profile(ctx: &mut Context<'_>) -> HandlerResult {
    let identity = ctx.identity()?;
    let form = ctx.sanitized_form();
    let mut errors = validate_required(&form, &["first_name", "last_name", "email"]);

    let email = form_value(&form, "email");
    if !email.is_empty() && !validate_email(email) {
        errors.insert("email".into(), "Please enter a valid email address".into());
    }

    let current = form.get("current_password").map(String::as_str).unwrap_or("");
    let new_password = form.get("new_password").map(String::as_str).unwrap_or("");
    let changing_password = !current.is_empty() || !new_password.is_empty();

    if changing_password {
        errors.extend(validate_required(&form, &["current_password", "new_password", "confirm_password"]));

        if !current.is_empty() {
            match ctx.state.auth.verify_password(&identity, current).await {
                Ok(true) => {}
                Ok(false) => {
                    errors.insert("current_password".into(), "Current password is incorrect".into());
                }
                Err(e) => {
                    tracing::error!("Password re-check failed: {}", e);
                    errors.insert("current_password".into(), "Current password could not be verified".into());
                }
            }
        }
        check_new_password(&form, "new_password", &mut errors);
    }

    if !errors.is_empty() {
        ctx.reject_form(errors, &form);
        return Ok(Outcome::redirect("/profile"));
    }

    let update = AccountUpdate {
        first_name: form_value(&form, "first_name").to_string(),
        last_name: form_value(&form, "last_name").to_string(),
        email: email.to_string(),
        new_password: changing_password.then(|| new_password.to_string()),
    };

    match ctx.state.auth.update_account(&identity, &update).await {
        Ok(updated) => {
            ctx.session.update_identity(updated);
            ctx.session.set_flash("success", "Profile updated successfully!");
        }
        Err(AuthError::EmailTaken) => {
            let errors = BTreeMap::from([("email".to_string(), AuthError::EmailTaken.to_string())]);
            ctx.reject_form(errors, &form);
        }
        Err(AuthError::Rejected(message)) => {
            ctx.session.set_flash("error", message);
        }
        Err(e) => {
            tracing::error!("Profile update failed: {}", e);
            ctx.session.set_flash("error", "Profile could not be updated. Please try again later.");
        }
    }
    Ok(Outcome::redirect("/profile"))
}

/// Strength rules on `field`, then agreement with `confirm_password`.
fn check_new_password(form: &FormData, field: &str, errors: &mut BTreeMap<String, String>) {
    let password = form.get(field).map(String::as_str).unwrap_or("");
    if password.is_empty() {
        return;
    }
    let problems = validate_password(password);
    if !problems.is_empty() {
        errors.insert(field.to_string(), problems.join(". "));
    }
    let confirm = form.get("confirm_password").map(String::as_str).unwrap_or("");
    if password != confirm {
        errors.insert("confirm_password".into(), "Passwords do not match".into());
    }
}
