use tokio::sync::Notify;
use url::Url;

use pigo_core::handoff::HandoffHost;

/// Hands URIs to the OS default handler.
///
/// A terminal has no page visibility, so a successful hand-off to the OS
/// handler is taken as the visibility-loss signal.
pub struct SystemHost {
    app_base: Url,
    switched: Notify,
}

impl SystemHost {
    pub fn new(app_base: Url) -> Self {
        Self {
            app_base,
            switched: Notify::new(),
        }
    }
}

impl HandoffHost for SystemHost {
    type Error = std::io::Error;

    async fn open_uri(&self, uri: &str) -> Result<(), std::io::Error> {
        let uri = uri.to_string();
        tokio::task::spawn_blocking(move || open::that(uri))
            .await
            .map_err(std::io::Error::other)??;
        self.switched.notify_one();
        Ok(())
    }

    async fn visibility_lost(&self) {
        self.switched.notified().await;
    }

    fn redirect(&self, page: &str) {
        let target = self
            .app_base
            .join(page)
            .map(String::from)
            .unwrap_or_else(|_| page.to_string());
        tracing::info!(%target, "redirecting to install page");
        eprintln!("Companion app not detected. Install it from: {target}");
    }
}
