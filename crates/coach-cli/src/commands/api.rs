//! API access and session watching.

use super::{describe_phase, App};
use crate::output::{self, OutputFormat};
use anyhow::{bail, Context, Result};
use coach_auth::{ApiError, ApiRequest, Method};
use serde_json::Value;

/// Send one authenticated request and print the response body.
pub async fn request(
    app: &App,
    method: &str,
    path: &str,
    data: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let mut request = ApiRequest::new(method, path);
    if let Some(data) = data {
        let body: Value = serde_json::from_str(data).context("Request body is not valid JSON")?;
        request = request.with_body(body);
    }

    let response = match app.client().send(request).await {
        Ok(response) => response,
        Err(ApiError::Unauthorized { .. }) => {
            bail!("Unauthorized. Run 'coach login' to sign in again")
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str::<Value>(&response.body) {
        Ok(value) => {
            let pretty = serde_json::to_string_pretty(&value).unwrap_or(response.body.clone());
            output::print_value(&value, &pretty, format);
        }
        Err(_) => println!("{}", response.body),
    }
    Ok(())
}

/// Keep the session alive until interrupted, printing phase changes.
pub async fn watch(app: &App, format: &OutputFormat) -> Result<()> {
    let phase = app.controller.initialize().await;
    let (value, text) = describe_phase(&phase);
    output::print_value(&value, &text, format);

    let mut phases = app.controller.subscribe_phase();

    let _guard = app.controller.start();
    loop {
        tokio::select! {
            changed = phases.changed() => {
                if changed.is_err() {
                    break;
                }
                let (value, text) = describe_phase(&phases.borrow_and_update());
                output::print_value(&value, &text, format);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
