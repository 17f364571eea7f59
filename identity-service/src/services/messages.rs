//! Rendered emails carrying one-time token links.

use crate::events::EmailNotification;
use crate::models::TokenPurpose;

/// Which flow a one-time token message belongs to. Decides the subject,
/// the landing page and the stored token purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    PasswordSetup,
    Invitation,
    PasswordReset,
    EmailVerification,
}

impl MessageKind {
    pub fn purpose(&self) -> TokenPurpose {
        match self {
            MessageKind::PasswordSetup | MessageKind::PasswordReset => TokenPurpose::PasswordReset,
            MessageKind::Invitation => TokenPurpose::Invitation,
            MessageKind::EmailVerification => TokenPurpose::EmailVerification,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            MessageKind::PasswordSetup => "Set Your Password - Welcome to the Platform",
            MessageKind::Invitation => "You're Invited - Complete Your Registration",
            MessageKind::PasswordReset => "Reset Your Password",
            MessageKind::EmailVerification => "Verify Your Email Address",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            MessageKind::PasswordSetup => "/auth/setup-password",
            MessageKind::Invitation => "/auth/accept-invite",
            MessageKind::PasswordReset => "/auth/reset-password",
            MessageKind::EmailVerification => "/auth/verify-email",
        }
    }

    fn intro(&self) -> &'static str {
        match self {
            MessageKind::PasswordSetup => {
                "Welcome! Please use the link below to set your password and activate your account:"
            }
            MessageKind::Invitation => {
                "You have been invited to join your team. Use the link below to choose a password and complete your registration:"
            }
            MessageKind::PasswordReset => {
                "We received a request to reset your password. Use the link below to choose a new one:"
            }
            MessageKind::EmailVerification => {
                "Please confirm your email address by opening the link below:"
            }
        }
    }
}

pub fn token_link(base_url: &str, kind: MessageKind, plaintext: &str) -> String {
    format!(
        "{}{}?token={}",
        base_url.trim_end_matches('/'),
        kind.path(),
        urlencoding::encode(plaintext)
    )
}

fn describe_lifetime(ttl: chrono::Duration) -> String {
    let minutes = ttl.num_minutes();
    if minutes % (60 * 24) == 0 && minutes >= 60 * 24 {
        let days = minutes / (60 * 24);
        if days == 1 {
            "24 hours".to_string()
        } else {
            format!("{} days", days)
        }
    } else if minutes % 60 == 0 && minutes >= 60 {
        let hours = minutes / 60;
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{} hours", hours)
        }
    } else {
        format!("{} minutes", minutes)
    }
}

/// Build the email for a freshly issued token.
pub fn render(
    kind: MessageKind,
    to: &str,
    base_url: &str,
    plaintext: &str,
    ttl: chrono::Duration,
) -> EmailNotification {
    let body = format!(
        "Hello,\n\n{}\n\n{}\n\nThis link will expire in {}.\n\nIf you didn't request this, please ignore this email.\n\nBest regards,\nYour Platform Team\n",
        kind.intro(),
        token_link(base_url, kind, plaintext),
        describe_lifetime(ttl),
    );

    EmailNotification {
        to: to.to_string(),
        subject: kind.subject().to_string(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn link_escapes_base64_padding() {
        let link = token_link("https://app.example.com/", MessageKind::PasswordSetup, "ab-_c=");
        assert_eq!(link, "https://app.example.com/auth/setup-password?token=ab-_c%3D");
    }

    #[test]
    fn setup_message_uses_setup_subject_and_lifetime() {
        let msg = render(
            MessageKind::PasswordSetup,
            "a@x.com",
            "https://app.example.com",
            "tok",
            Duration::hours(24),
        );
        assert_eq!(msg.to, "a@x.com");
        assert_eq!(msg.subject, "Set Your Password - Welcome to the Platform");
        assert!(msg.body.contains("https://app.example.com/auth/setup-password?token=tok"));
        assert!(msg.body.contains("expire in 24 hours"));
    }

    #[test]
    fn lifetimes_are_described_in_natural_units() {
        assert_eq!(describe_lifetime(Duration::minutes(60)), "1 hour");
        assert_eq!(describe_lifetime(Duration::minutes(30)), "30 minutes");
        assert_eq!(describe_lifetime(Duration::hours(72)), "3 days");
    }

    #[test]
    fn invitation_has_its_own_purpose() {
        assert_eq!(MessageKind::Invitation.purpose(), TokenPurpose::Invitation);
        assert_eq!(MessageKind::PasswordSetup.purpose(), TokenPurpose::PasswordReset);
        assert_eq!(MessageKind::PasswordReset.purpose(), TokenPurpose::PasswordReset);
    }
}
