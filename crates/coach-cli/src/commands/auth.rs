//! Authentication commands.

use super::{describe_phase, App};
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use coach_auth::{token_expiry, AuthError, LogoutOptions, RefreshError, RegisterRequest};
use serde_json::json;
use std::io::{self, Write};

fn prompt_email() -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;
    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    Ok(email.trim().to_string())
}

/// Login with email and password.
pub async fn login(app: &App, email: Option<String>, format: &OutputFormat) -> Result<()> {
    if let Some(user) = app.controller.initialize().await.user() {
        let label = user.email.as_deref().unwrap_or(user.id.as_str());
        output::print_success(&format!("Already logged in as {}", label), format);
        return Ok(());
    }

    let email = match email {
        Some(email) => email,
        None => prompt_email()?,
    };
    if email.is_empty() {
        output::print_error("Email is required", format);
        return Ok(());
    }

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        output::print_error("Password is required", format);
        return Ok(());
    }

    match app.controller.login(&email, &password).await {
        Ok(user) => {
            let label = user.email.as_deref().unwrap_or(user.id.as_str());
            output::print_success(&format!("Logged in as {}", label), format);
            Ok(())
        }
        Err(AuthError::InvalidCredentials) => {
            output::print_error("Invalid email or password", format);
            Ok(())
        }
        Err(e) => bail!("Login failed: {}", e),
    }
}

/// Create an account and sign in.
pub async fn register(
    app: &App,
    email: String,
    name: String,
    role: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password.is_empty() {
        output::print_error("Password is required", format);
        return Ok(());
    }
    if password != confirm {
        output::print_error("Passwords do not match", format);
        return Ok(());
    }

    let registration = RegisterRequest {
        email,
        password,
        name,
        role,
    };
    let user = app.controller.register(&registration).await?;
    output::print_success(&format!("Account created for {}", user.id), format);
    Ok(())
}

/// Logout and clear the stored session.
pub async fn logout(app: &App, format: &OutputFormat) -> Result<()> {
    app.controller.logout(LogoutOptions::default()).await;
    output::print_success("Logged out successfully", format);
    Ok(())
}

/// Check authentication status.
pub async fn status(app: &App, format: &OutputFormat) -> Result<()> {
    let phase = app.controller.initialize().await;
    let (mut value, text) = describe_phase(&phase);

    let expires_at = app
        .store
        .access_token()
        .and_then(|token| token_expiry(&token).ok())
        .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0));
    if let Some(expires_at) = expires_at {
        value["expires_at"] = json!(expires_at.to_rfc3339());
    }

    match format {
        OutputFormat::Text => {
            println!("{}", text);
            if let Some(user) = phase.user() {
                output::print_row("User ID", &user.id);
                output::print_row("Role", user.role.as_deref().unwrap_or("unknown"));
                if let Some(name) = &user.name {
                    output::print_row("Name", name);
                }
                if let Some(expires_at) = expires_at {
                    output::print_row("Token expires", &expires_at.to_rfc3339());
                }
            }
        }
        OutputFormat::Json => output::print_value(&value, &text, format),
    }
    Ok(())
}

/// Print a valid access token.
pub async fn token(app: &App, format: &OutputFormat) -> Result<()> {
    if !app.controller.initialize().await.is_authenticated() {
        bail!("Not logged in. Run 'coach login' first");
    }
    match app.controller.current_token().await {
        Some(token) => {
            output::print_value(&json!({ "access_token": token }), &token, format);
            Ok(())
        }
        None => bail!("No valid access token. Run 'coach login' again"),
    }
}

/// Force a refresh cycle.
pub async fn refresh(app: &App, format: &OutputFormat) -> Result<()> {
    match app.reconciler.refresh().await {
        Ok(_) => {
            output::print_success("Token refreshed", format);
            Ok(())
        }
        Err(RefreshError::Terminal(_)) | Err(RefreshError::NoSession) => {
            bail!("Session expired. Run 'coach login' to sign in again")
        }
        Err(e) => bail!("Refresh failed: {}", e),
    }
}
