//! Single-identity capability gate for privileged commands.
//!
//! Denial is silent: the gate only answers yes/no, and [`guard`] simply does
//! not run the wrapped handler, so unauthorized callers get no output at all.

use std::future::Future;

use crate::domain::{ChatId, ChatKind, UserId};

/// How strict a privileged command is about where it is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatePolicy {
    AnyChat,
    PrivateOnly,
}

/// Proof that an actor passed the gate. Only [`AdminGate::authorize`] makes one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdminCapability {
    admin: UserId,
}

impl AdminCapability {
    pub fn admin(&self) -> UserId {
        self.admin
    }

    /// The admin's private chat (same numeric id on Telegram).
    pub fn chat(&self) -> ChatId {
        ChatId(self.admin.0)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AdminGate {
    admin_id: i64,
}

impl AdminGate {
    /// `0` means no admin is configured.
    pub fn new(admin_id: i64) -> Self {
        Self { admin_id }
    }

    pub fn is_configured(&self) -> bool {
        self.admin_id != 0
    }

    /// The admin's private chat, if an admin is configured.
    pub fn admin_chat(&self) -> Option<ChatId> {
        self.is_configured().then_some(ChatId(self.admin_id))
    }

    pub fn is_admin(&self, actor: Option<UserId>) -> bool {
        match actor {
            Some(UserId(id)) => id != 0 && id == self.admin_id,
            None => false,
        }
    }

    pub fn is_authorized(&self, actor: Option<UserId>, chat: ChatKind, policy: GatePolicy) -> bool {
        if !self.is_admin(actor) {
            return false;
        }
        match policy {
            GatePolicy::AnyChat => true,
            GatePolicy::PrivateOnly => chat == ChatKind::Private,
        }
    }

    pub fn authorize(
        &self,
        actor: Option<UserId>,
        chat: ChatKind,
        policy: GatePolicy,
    ) -> Option<AdminCapability> {
        if !self.is_authorized(actor, chat, policy) {
            return None;
        }
        actor.map(|admin| AdminCapability { admin })
    }
}

/// Run `handler` only if the actor is authorized; `None` means silently denied.
pub async fn guard<F, Fut, T>(
    gate: &AdminGate,
    actor: Option<UserId>,
    chat: ChatKind,
    policy: GatePolicy,
    handler: F,
) -> Option<T>
where
    F: FnOnce(AdminCapability) -> Fut,
    Fut: Future<Output = T>,
{
    let cap = gate.authorize(actor, chat, policy)?;
    Some(handler(cap).await)
}
