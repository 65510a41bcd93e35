//! Outbound notification transport seam.
//!
//! The wire protocol is an external collaborator: the core only needs
//! "send these photo bytes" and "send these video bytes" with best-effort
//! semantics. Delivery is always invoked from the single dispatch thread,
//! so implementations do not need internal synchronization beyond `Sync`.

use anyhow::Result;

/// Fire-and-forget delivery of alert payloads to one destination.
pub trait Notifier: Send + Sync {
    fn send_photo(&self, destination: &str, image: &[u8], caption: &str) -> Result<()>;
    fn send_video(&self, destination: &str, video: &[u8], caption: &str) -> Result<()>;
}

/// Default transport: logs deliveries instead of sending them. Used when no
/// webhook is configured, and handy in demos.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LogNotifier {
    fn send_photo(&self, destination: &str, image: &[u8], caption: &str) -> Result<()> {
        log::info!(
            "photo alert for {}: {} ({} bytes)",
            destination,
            caption,
            image.len()
        );
        Ok(())
    }

    fn send_video(&self, destination: &str, video: &[u8], caption: &str) -> Result<()> {
        log::info!(
            "video alert for {}: {} ({} bytes)",
            destination,
            caption,
            video.len()
        );
        Ok(())
    }
}

#[cfg(feature = "notify-http")]
pub use self::http::HttpNotifier;

#[cfg(feature = "notify-http")]
mod http {
    use super::Notifier;
    use anyhow::{Context, Result};
    use url::Url;

    /// HTTP webhook transport: POSTs raw payload bytes to
    /// `<base>/photo` and `<base>/video` with destination and caption as
    /// query parameters. One attempt per call; retries are the caller's
    /// policy (and the dispatcher's policy is "none").
    pub struct HttpNotifier {
        base: Url,
        agent: ureq::Agent,
    }

    impl HttpNotifier {
        pub fn new(base_url: &str) -> Result<Self> {
            let base = Url::parse(base_url)
                .with_context(|| format!("invalid webhook url '{}'", base_url))?;
            Ok(Self {
                base,
                agent: ureq::AgentBuilder::new()
                    .timeout(std::time::Duration::from_secs(30))
                    .build(),
            })
        }

        fn post(
            &self,
            endpoint: &str,
            content_type: &str,
            destination: &str,
            payload: &[u8],
            caption: &str,
        ) -> Result<()> {
            let url = self
                .base
                .join(endpoint)
                .with_context(|| format!("invalid webhook endpoint '{}'", endpoint))?;
            self.agent
                .post(url.as_str())
                .query("destination", destination)
                .query("caption", caption)
                .set("Content-Type", content_type)
                .send_bytes(payload)
                .with_context(|| format!("webhook delivery to {} failed", endpoint))?;
            Ok(())
        }
    }

    impl Notifier for HttpNotifier {
        fn send_photo(&self, destination: &str, image: &[u8], caption: &str) -> Result<()> {
            self.post("photo", "image/jpeg", destination, image, caption)
        }

        fn send_video(&self, destination: &str, video: &[u8], caption: &str) -> Result<()> {
            self.post("video", "video/x-motion-jpeg", destination, video, caption)
        }
    }
}
