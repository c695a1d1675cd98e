use std::fmt::Write;

/// Outgoing mail. Delivery goes to the log; the link is what a real
/// transport would put in the message body.
#[derive(Debug, Clone)]
pub struct Mailer {
    frontend_url: String,
}

pub const VERIFY_SUBJECT: &str = "Verify your TechXO Newsletter subscription";

impl Mailer {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        Mailer {
            frontend_url: frontend_url.into(),
        }
    }

    pub fn verification_link(&self, token: &str) -> String {
        format!("{}/verify-email?token={token}", self.frontend_url)
    }

    pub fn send_verification(&self, to: &str, token: &str) {
        let link = self.verification_link(token);
        tracing::info!(to, subject = VERIFY_SUBJECT, %link, "mail");
    }
}

/// 32 random bytes, hex encoded.
pub fn verification_token() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().fold(String::with_capacity(64), |mut token, byte| {
        let _ = write!(token, "{byte:02x}");
        token
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_point_at_the_frontend() {
        let mailer = Mailer::new("https://techxo.example");
        assert_eq!(
            mailer.verification_link("abc"),
            "https://techxo.example/verify-email?token=abc"
        );
    }

    #[test]
    fn tokens_are_long_and_unique() {
        let token = verification_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, verification_token());
    }
}
