//! User-facing notices
//!
//! Toasts are rendered by the embedding application. The client only
//! decides when to show one and how severe it is.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Info,
    Success,
    Warning,
    Error,
}

impl ToastKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToastKind::Info => "info",
            ToastKind::Success => "success",
            ToastKind::Warning => "warning",
            ToastKind::Error => "error",
        }
    }
}

/// Sink for user-facing notices
pub trait Notifier: Send + Sync {
    fn show(&self, message: &str, kind: ToastKind);
}

/// Notifier that writes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show(&self, message: &str, kind: ToastKind) {
        match kind {
            ToastKind::Info | ToastKind::Success => {
                tracing::info!(toast = kind.as_str(), "{}", message)
            }
            ToastKind::Warning => tracing::warn!(toast = kind.as_str(), "{}", message),
            ToastKind::Error => tracing::error!(toast = kind.as_str(), "{}", message),
        }
    }
}
