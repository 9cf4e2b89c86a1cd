use anyhow::{Context, Result};
use async_trait::async_trait;
use client_core::{AuthOutcome, Authoriser};
use shared::protocol::AuthResultMessage;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Terminal stand-in for the login popup: the user signs in at `login_url`
/// and pastes the result message the page shows. An empty line or end of
/// input counts as closing the window.
pub struct TerminalAuthoriser {
    login_url: String,
}

impl TerminalAuthoriser {
    pub fn new(api_base_url: &str) -> Self {
        Self {
            login_url: format!("{}/api/login", api_base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Authoriser for TerminalAuthoriser {
    async fn authorise(&self) -> Result<AuthOutcome> {
        println!("Sign in at {} and paste the result message:", self.login_url);

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .context("failed to read authorisation result")?;
        parse_reply(&line)
    }
}

fn parse_reply(line: &str) -> Result<AuthOutcome> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(AuthOutcome::WindowClosed);
    }
    let message: AuthResultMessage =
        serde_json::from_str(line).context("result message is not valid json")?;
    Ok(message.into())
}
