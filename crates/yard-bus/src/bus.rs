//! Topic registry and dispatch loop.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::message::Message;

/// A subscriber to one or more bus topics.
///
/// Handlers on the same topic are invoked in ascending [`priority`]
/// order; equal priorities keep installation order. Returning `true`
/// claims the message and stops the walk.
///
/// [`priority`]: Handler::priority
pub trait Handler: Send + Sync {
    fn priority(&self) -> i32 {
        100
    }

    /// Inspect and possibly mutate the message. Return `true` to claim it.
    fn handle(&self, msg: &mut Message) -> bool;
}

struct FnHandler<F> {
    priority: i32,
    f: F,
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Message) -> bool + Send + Sync,
{
    fn priority(&self) -> i32 {
        self.priority
    }

    fn handle(&self, msg: &mut Message) -> bool {
        (self.f)(msg)
    }
}

/// Process-wide registry mapping topic names to priority-ordered handler
/// lists.
///
/// The registry lock is only held while the handler list is copied out,
/// never across handler invocations, so a handler may install further
/// handlers or dispatch nested messages.
#[derive(Default)]
pub struct Bus {
    topics: RwLock<FxHashMap<String, Vec<Arc<dyn Handler>>>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`, keeping the list priority-sorted.
    pub fn install(&self, topic: &str, handler: Arc<dyn Handler>) {
        let mut topics = self.topics.write();
        let list = topics.entry(topic.to_string()).or_default();
        // stable insertion point: after every handler of equal priority
        let at = list.partition_point(|h| h.priority() <= handler.priority());
        list.insert(at, handler);
    }

    /// Subscribe a closure to `topic` at the given priority.
    pub fn install_fn<F>(&self, topic: &str, priority: i32, f: F)
    where
        F: Fn(&mut Message) -> bool + Send + Sync + 'static,
    {
        self.install(topic, Arc::new(FnHandler { priority, f }));
    }

    /// Walk the handlers subscribed to the message's topic in priority
    /// order until one claims it. Returns whether anyone did.
    pub fn dispatch(&self, msg: &mut Message) -> bool {
        let list = match self.topics.read().get(msg.name()) {
            Some(list) => list.clone(),
            None => return false,
        };
        for handler in &list {
            if handler.handle(msg) {
                return true;
            }
        }
        false
    }

    /// Whether any handler is subscribed to `topic`.
    pub fn has_handlers(&self, topic: &str) -> bool {
        self.topics
            .read()
            .get(topic)
            .is_some_and(|l| !l.is_empty())
    }
}
