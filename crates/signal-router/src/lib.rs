//! Command matching, access control, and middleware composition.
//!
//! Generic over the handler argument type `C` (the `Context` façade lives in
//! the root crate, which depends on this one — not the other way round).

use regex::Regex;
use signal_protocol::Message;
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Result of a handler or middleware invocation. `terminal` mirrors the
/// spec's `Handler.Internal` classification: `false` means the Worker should
/// treat a failure as `Transient.Network` and retry; `true` forces a
/// terminal disposition regardless of the underlying cause.
#[derive(Debug)]
pub struct HandlerError {
    pub terminal: bool,
    pub message: String,
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            terminal: false,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            terminal: true,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerResult = Result<(), HandlerError>;

/// A command handler: takes ownership of the context and returns a result.
pub trait Handler<C>: Send + Sync {
    fn call(&self, ctx: C) -> BoxFuture<HandlerResult>;
}

impl<C, F, Fut> Handler<C> for F
where
    F: Fn(C) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, ctx: C) -> BoxFuture<HandlerResult> {
        Box::pin(self(ctx))
    }
}

/// The remaining middleware chain, callable once.
pub struct Next<C> {
    inner: Arc<dyn Handler<C>>,
}

impl<C: 'static> Next<C> {
    pub fn call(self, ctx: C) -> BoxFuture<HandlerResult> {
        self.inner.call(ctx)
    }
}

/// A middleware wraps the remaining chain: it decides whether, when, and
/// with what context to invoke `next`.
pub trait Middleware<C>: Send + Sync {
    fn call(&self, ctx: C, next: Next<C>) -> BoxFuture<HandlerResult>;
}

struct ComposedHandler<C> {
    middleware: Arc<dyn Middleware<C>>,
    next: Arc<dyn Handler<C>>,
}

impl<C: 'static> Handler<C> for ComposedHandler<C> {
    fn call(&self, ctx: C) -> BoxFuture<HandlerResult> {
        self.middleware.call(
            ctx,
            Next {
                inner: self.next.clone(),
            },
        )
    }
}

/// Compose `middlewares` (outermost first) around `handler` into a single
/// callable: `mw1(mw2(...mwN(handler)))`.
pub fn compose<C: 'static>(
    middlewares: &[Arc<dyn Middleware<C>>],
    handler: Arc<dyn Handler<C>>,
) -> Arc<dyn Handler<C>> {
    middlewares
        .iter()
        .rev()
        .fold(handler, |next, mw| {
            Arc::new(ComposedHandler {
                middleware: mw.clone(),
                next,
            }) as Arc<dyn Handler<C>>
        })
}

/// How a command's trigger is matched against message text.
pub enum Trigger {
    Literal { text: String, case_sensitive: bool },
    Regex(Regex),
}

impl Trigger {
    fn matches(&self, text: &str) -> bool {
        match self {
            Trigger::Literal {
                text: literal,
                case_sensitive,
            } => {
                if *case_sensitive {
                    text == literal
                } else {
                    text.eq_ignore_ascii_case(literal)
                }
            }
            Trigger::Regex(re) => re.is_match(text),
        }
    }
}

/// An immutable command registration: triggers, optional whitelist, and a
/// handler. At least one trigger is required.
pub struct Command<C> {
    pub name: String,
    triggers: Vec<Trigger>,
    whitelist: Option<HashSet<String>>,
    handler: Arc<dyn Handler<C>>,
}

impl<C: 'static> Command<C> {
    pub fn new(
        name: impl Into<String>,
        triggers: Vec<Trigger>,
        whitelist: Option<HashSet<String>>,
        handler: impl Handler<C> + 'static,
    ) -> Self {
        assert!(!triggers.is_empty(), "a command needs at least one trigger");
        Self {
            name: name.into(),
            triggers,
            whitelist,
            handler: Arc::new(handler),
        }
    }

    fn matches(&self, message: &Message) -> bool {
        let Some(text) = message.text.as_deref() else {
            return false;
        };
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(&message.source) {
                return false;
            }
        }
        self.triggers.iter().any(|t| t.matches(text))
    }

    pub fn handler(&self) -> Arc<dyn Handler<C>> {
        self.handler.clone()
    }
}

/// Matches messages against an ordered, immutable set of commands.
///
/// Registration order is the match priority: the first command (in
/// registration order) whose trigger matches and whose whitelist (if any)
/// admits the sender wins.
pub struct CommandRouter<C> {
    commands: Vec<Command<C>>,
}

impl<C: 'static> CommandRouter<C> {
    pub fn new(commands: Vec<Command<C>>) -> Self {
        Self { commands }
    }

    pub fn route(&self, message: &Message) -> Option<&Command<C>> {
        self.commands.iter().find(|c| c.matches(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_protocol::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(text: &str, source: &str) -> Message {
        Message {
            source: source.to_string(),
            timestamp: 0,
            group_id: None,
            text: Some(text.to_string()),
            attachments: vec![],
            quote: None,
            reaction: None,
        }
    }

    async fn noop(_ctx: ()) -> HandlerResult {
        Ok(())
    }

    #[test]
    fn literal_trigger_is_case_insensitive_by_default() {
        let cmd = Command::new(
            "ping",
            vec![Trigger::Literal {
                text: "!ping".into(),
                case_sensitive: false,
            }],
            None,
            noop,
        );
        assert!(cmd.matches(&message("!PING", "+1")));
    }

    #[test]
    fn whitelist_excludes_non_members() {
        let mut allowed = HashSet::new();
        allowed.insert("+15550002".to_string());
        let cmd = Command::new(
            "admin",
            vec![Trigger::Literal {
                text: "!admin".into(),
                case_sensitive: false,
            }],
            Some(allowed),
            noop,
        );
        assert!(!cmd.matches(&message("!admin", "+15550001")));
        assert!(cmd.matches(&message("!admin", "+15550002")));
    }

    #[test]
    fn router_respects_registration_order() {
        let commands = vec![
            Command::new(
                "first",
                vec![Trigger::Regex(Regex::new("^hello").unwrap())],
                None,
                noop,
            ),
            Command::new(
                "second",
                vec![Trigger::Regex(Regex::new("^hello").unwrap())],
                None,
                noop,
            ),
        ];
        let router = CommandRouter::new(commands);
        let matched = router.route(&message("hello world", "+1")).unwrap();
        assert_eq!(matched.name, "first");
    }

    #[test]
    fn router_returns_none_when_nothing_matches() {
        let commands = vec![Command::new(
            "ping",
            vec![Trigger::Literal {
                text: "!ping".into(),
                case_sensitive: false,
            }],
            None,
            noop,
        )];
        let router = CommandRouter::new(commands);
        assert!(router.route(&message("hello", "+1")).is_none());
    }

    #[tokio::test]
    async fn compose_applies_middleware_outermost_first() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        struct Record {
            label: &'static str,
            order: Arc<std::sync::Mutex<Vec<&'static str>>>,
        }
        impl Middleware<()> for Record {
            fn call(&self, ctx: (), next: Next<()>) -> BoxFuture<HandlerResult> {
                self.order.lock().unwrap().push(self.label);
                next.call(ctx)
            }
        }

        let mw1: Arc<dyn Middleware<()>> = Arc::new(Record {
            label: "mw1",
            order: order.clone(),
        });
        let mw2: Arc<dyn Middleware<()>> = Arc::new(Record {
            label: "mw2",
            order: order.clone(),
        });
        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked2 = invoked.clone();
        let handler: Arc<dyn Handler<()>> = Arc::new(move |_ctx: ()| {
            invoked2.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let composed = compose(&[mw1, mw2], handler);
        composed.call(()).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["mw1", "mw2"]);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }
}
