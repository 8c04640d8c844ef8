use async_trait::async_trait;
use connect_sdk::ApprovalLauncher;
use tokio::process::Command;

/// Fresh per-run secret the approval UI must present in its hello.
pub fn generate_ui_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Opens approval UI routes by handing `{base}?token=..#/{route}` to an
/// external program (a browser, `xdg-open`, ...). Without a program the URL
/// is only logged, for UIs that poll or are opened by hand.
pub struct CommandLauncher {
    base_url: String,
    opener: Option<String>,
    ui_token: String,
}

impl CommandLauncher {
    pub fn new(base_url: impl Into<String>, opener: Option<String>, ui_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            opener,
            ui_token: ui_token.into(),
        }
    }

    pub fn url_for(&self, route: &str) -> String {
        format!(
            "{}?token={}#/{route}",
            self.base_url.trim_end_matches('/'),
            self.ui_token
        )
    }
}

#[async_trait]
impl ApprovalLauncher for CommandLauncher {
    async fn open(&self, route: &str) -> connect_sdk::Result<()> {
        let url = self.url_for(route);
        log::info!("approval required: {url}");
        let Some(opener) = &self.opener else {
            return Ok(());
        };

        // The child is not awaited: the decision comes back over the transport.
        Command::new(opener)
            .arg(&url)
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| connect_sdk::Error::Launcher(format!("{opener}: {e}")))?;
        Ok(())
    }
}
