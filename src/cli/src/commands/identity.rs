//! Identity command: show who the server thinks this participant is.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityView {
    pub id: String,
    pub account: Option<String>,
    pub authenticated: bool,
    pub decision: serde_json::Value,
}

pub async fn whoami(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let identity: IdentityView = client.post_empty("/api/v1/identity").await?;

    match format {
        OutputFormat::Table => {
            let decision = identity
                .decision
                .get("decision")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("Identity");
            output::print_detail("Identity", &identity.id);
            output::print_detail("Account", identity.account.as_deref().unwrap_or("(anonymous)"));
            output::print_detail("Device key", &client.keys().device);
            output::print_detail("Resolution", decision);
        }
        _ => output::print_item(&identity, format)?,
    }
    Ok(())
}
