//! User-supplied callbacks, configured at build time.
//!
//! Every slot is optional; an absent handler means "drop the event".
//! Handlers run synchronously inside the read pipeline's task — callers
//! who need to do real work should hand off to their own task.

use crate::error::HandlerPanic;
use crate::event::{ChatMessage, ClearChat, ClearMessage, GlobalUserState, Notice, RoomState,
    UserNotice, UserState, Whisper};

pub(crate) type Callback<T> = Box<dyn Fn(T) + Send + Sync>;
pub(crate) type NullaryCallback = Box<dyn Fn() + Send + Sync>;

/// Record-of-closures holding every handler slot the builder exposes.
#[derive(Default)]
pub struct Handlers {
    pub(crate) on_message: Option<Callback<ChatMessage>>,
    pub(crate) on_whisper: Option<Callback<Whisper>>,
    pub(crate) on_user_notice: Option<Callback<UserNotice>>,
    pub(crate) on_notice: Option<Callback<Notice>>,
    pub(crate) on_room_state: Option<Callback<RoomState>>,
    pub(crate) on_clear_chat: Option<Callback<ClearChat>>,
    pub(crate) on_clear_message: Option<Callback<ClearMessage>>,
    pub(crate) on_global_user_state: Option<Callback<GlobalUserState>>,
    pub(crate) on_user_state: Option<Callback<UserState>>,
    pub(crate) on_join: Option<Callback<(String, String)>>,
    pub(crate) on_part: Option<Callback<(String, String)>>,
    pub(crate) on_connect: Option<NullaryCallback>,
    pub(crate) on_disconnect: Option<NullaryCallback>,
    pub(crate) on_reconnect: Option<NullaryCallback>,
    pub(crate) on_error: Option<Callback<String>>,
    pub(crate) on_raw_message: Option<Callback<String>>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

macro_rules! setter {
    ($name:ident, $field:ident, $ty:ty) => {
        #[must_use]
        pub fn $name(mut self, f: impl Fn($ty) + Send + Sync + 'static) -> Self {
            self.$field = Some(Box::new(f));
            self
        }
    };
}

macro_rules! nullary_setter {
    ($name:ident, $field:ident) => {
        #[must_use]
        pub fn $name(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
            self.$field = Some(Box::new(f));
            self
        }
    };
}

/// Builder for [`Handlers`]. Chain the slots you care about, then pass the
/// result to [`crate::client::ClientBuilder::handlers`].
#[derive(Default)]
pub struct HandlersBuilder(Handlers);

impl HandlersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    setter!(on_message, on_message, ChatMessage);
    setter!(on_whisper, on_whisper, Whisper);
    setter!(on_user_notice, on_user_notice, UserNotice);
    setter!(on_notice, on_notice, Notice);
    setter!(on_room_state, on_room_state, RoomState);
    setter!(on_clear_chat, on_clear_chat, ClearChat);
    setter!(on_clear_message, on_clear_message, ClearMessage);
    setter!(on_global_user_state, on_global_user_state, GlobalUserState);
    setter!(on_user_state, on_user_state, UserState);
    setter!(on_error, on_error, String);
    setter!(on_raw_message, on_raw_message, String);

    #[must_use]
    pub fn on_join(mut self, f: impl Fn(String, String) + Send + Sync + 'static) -> Self {
        self.0.on_join = Some(Box::new(move |(channel, user)| f(channel, user)));
        self
    }

    #[must_use]
    pub fn on_part(mut self, f: impl Fn(String, String) + Send + Sync + 'static) -> Self {
        self.0.on_part = Some(Box::new(move |(channel, user)| f(channel, user)));
        self
    }

    nullary_setter!(on_connect, on_connect);
    nullary_setter!(on_disconnect, on_disconnect);
    nullary_setter!(on_reconnect, on_reconnect);

    pub fn build(self) -> Handlers {
        self.0
    }
}

/// Invoke `handler` with `value`, catching a panic and turning it into a
/// [`HandlerPanic`] detail string for `on_error` instead of unwinding out of
/// the read pipeline.
pub(crate) fn invoke_guarded<T>(handler: &Callback<T>, value: T) -> Result<(), String>
where
    T: std::panic::UnwindSafe,
{
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || handler(value)))
        .map_err(|payload| HandlerPanic(panic_message(&payload)).to_string())
}

pub(crate) fn invoke_guarded_nullary(handler: &NullaryCallback) -> Result<(), String> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler()))
        .map_err(|payload| HandlerPanic(panic_message(&payload)).to_string())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn builder_collects_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let handlers = HandlersBuilder::new()
            .on_connect(move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        invoke_guarded_nullary(handlers.on_connect.as_ref().unwrap()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unset_handler_is_none() {
        let handlers = HandlersBuilder::new().build();
        assert!(handlers.on_message.is_none());
    }

    #[test]
    fn panicking_handler_is_caught_and_reported() {
        let handlers = HandlersBuilder::new()
            .on_error(|_| {})
            .build();
        let boom: Callback<()> = Box::new(|_| panic!("boom"));
        let result = invoke_guarded(&boom, ());
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("boom"));
        drop(handlers);
    }
}
