//! The dispatched message bag.

use std::any::Any;

use rustc_hash::FxHashMap;

use crate::params::Params;

/// A mutable message traveling through the bus.
///
/// A message is named after the topic it is dispatched on, carries an
/// ordered parameter map and a string return value, and can hold typed
/// capability slots. Slots are how handlers exchange things that are not
/// strings: a socket, a body stream, a runnable session. A slot is looked
/// up by capability name and downcast to the expected type, so producers
/// and consumers only need to agree on the `(name, type)` pair.
#[derive(Default)]
pub struct Message {
    name: String,
    /// Ordered parameter map; mutated freely by handlers.
    pub params: Params,
    /// Handler-set return value; meaning is topic-specific.
    pub ret_value: String,
    slots: FxHashMap<String, Box<dyn Any + Send>>,
}

impl Message {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retarget the message at another topic, keeping parameters, return
    /// value and slots. Used when one request flows through a chain of
    /// related dispatches.
    pub fn retarget(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Store `value` under the capability `name`, replacing any previous
    /// occupant of the slot.
    pub fn set_slot<T: Any + Send>(&mut self, name: &str, value: T) {
        self.slots.insert(name.to_string(), Box::new(value));
    }

    /// Take the slot `name` out of the message if it holds a `T`.
    ///
    /// A slot holding a different type is left in place and `None` is
    /// returned, so a mismatched taker cannot destroy another handler's
    /// payload.
    pub fn take_slot<T: Any + Send>(&mut self, name: &str) -> Option<T> {
        let boxed = self.slots.remove(name)?;
        match boxed.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(other) => {
                self.slots.insert(name.to_string(), other);
                None
            }
        }
    }

    /// Whether any value occupies the slot `name`.
    pub fn has_slot(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret_value", &self.ret_value)
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_roundtrip() {
        let mut m = Message::new("test.topic");
        m.set_slot("Counter", 41u64);
        assert!(m.has_slot("Counter"));
        assert_eq!(m.take_slot::<u64>("Counter"), Some(41));
        assert!(!m.has_slot("Counter"));
    }

    #[test]
    fn slot_type_mismatch_is_preserved() {
        let mut m = Message::new("test.topic");
        m.set_slot("Socket", String::from("not a socket"));
        assert_eq!(m.take_slot::<u64>("Socket"), None);
        // the wrongly-typed take must not have consumed the value
        assert_eq!(m.take_slot::<String>("Socket").as_deref(), Some("not a socket"));
    }

    #[test]
    fn retarget_keeps_state() {
        let mut m = Message::new("http.route");
        m.params.set("uri", "/index");
        m.ret_value = "handler".into();
        m.retarget("http.serve");
        assert_eq!(m.name(), "http.serve");
        assert_eq!(m.params.get("uri"), Some("/index"));
        assert_eq!(m.ret_value, "handler");
    }
}
