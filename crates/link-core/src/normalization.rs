use crate::{
    error::{CloseKind, LinkErrorCategory, classify_close_code},
    types::{ConnectionEvent, NotificationKind},
};

/// Notice a host should raise for a connection event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeRequest {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

impl NoticeRequest {
    fn new(kind: NotificationKind, title: &str, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.to_owned(),
            body: body.into(),
        }
    }
}

/// Map a connection event to a user-visible notice.
///
/// Drops that are still being retried stay silent; only the outcomes a user
/// can act on produce a notice.
pub fn notice_for_event(event: &ConnectionEvent) -> Option<NoticeRequest> {
    match event {
        ConnectionEvent::Open { .. } => Some(NoticeRequest::new(
            NotificationKind::Success,
            "Connected",
            "Live updates are on.",
        )),
        ConnectionEvent::Close { code, .. } => match classify_close_code(*code) {
            CloseKind::Normal => Some(NoticeRequest::new(
                NotificationKind::Info,
                "Disconnected",
                "Live updates are paused.",
            )),
            CloseKind::Abnormal => None,
        },
        ConnectionEvent::Error(err) if err.category == LinkErrorCategory::BudgetExhausted => {
            Some(NoticeRequest::new(
                NotificationKind::Error,
                "Unable to reconnect",
                err.message.clone(),
            ))
        }
        ConnectionEvent::Error(_)
        | ConnectionEvent::Message { .. }
        | ConnectionEvent::StateChanged { .. } => None,
    }
}
