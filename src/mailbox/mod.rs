mod inbox;
mod outbox;

pub(crate) use inbox::Inbox;
pub(crate) use outbox::Outbox;
