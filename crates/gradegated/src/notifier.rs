use gradegate_core::Notifier;

const SUBJECT_PREFIX: &str = "[gradegate security alert]";

/// Operator alerts written to the log under the `gradegate::alert` target.
///
/// Mail delivery is left to whatever ships the journal; this notifier never
/// fails and never blocks a login decision.
pub struct AlertNotifier {
    admin_contact: String,
}

impl AlertNotifier {
    pub fn new(admin_contact: &str) -> Self {
        let admin_contact = admin_contact.trim();
        if !admin_contact.is_empty() && !admin_contact.contains('@') {
            tracing::warn!(admin_contact, "admin contact does not look like an address");
        }
        Self {
            admin_contact: admin_contact.to_string(),
        }
    }

    fn subject(subject: &str) -> String {
        format!("{SUBJECT_PREFIX} {subject}")
    }
}

impl Notifier for AlertNotifier {
    fn notify(&self, subject: &str, detail: &str) {
        let subject = Self::subject(subject);
        if self.admin_contact.is_empty() {
            tracing::warn!(target: "gradegate::alert", subject = %subject, detail, "alert");
        } else {
            tracing::warn!(
                target: "gradegate::alert",
                to = %self.admin_contact,
                subject = %subject,
                detail,
                "alert"
            );
        }
    }
}
