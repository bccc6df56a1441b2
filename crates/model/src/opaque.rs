use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A provider-native history message that agents carry around without
/// looking inside.
///
/// Converting a streamed response back into [`crate::ModelMessage`]
/// variants loses information some providers need on the next request
/// (tool call ids, reasoning content and so on). A provider wraps its own
/// message type in an `OpaqueMessage`, and unwraps it again with
/// [`OpaqueMessage::downcast_ref`] when serializing history.
///
/// Two opaque messages are equal iff their ids are equal.
#[derive(Clone)]
pub struct OpaqueMessage {
    id: Arc<str>,
    value: Arc<dyn Any + Send + Sync>,
}

impl OpaqueMessage {
    /// Wraps `value` under `id`, which must be unique within a conversation.
    #[inline]
    pub fn new<ID, T>(id: ID, value: T) -> Self
    where
        ID: AsRef<str>,
        T: Send + Sync + 'static,
    {
        Self {
            id: Arc::from(id.as_ref()),
            value: Arc::new(value),
        }
    }

    /// Returns the id of this message.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the wrapped value if it has type `T`.
    #[inline]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
}

impl Debug for OpaqueMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueMessage").field(&&*self.id).finish()
    }
}

impl PartialEq for OpaqueMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OpaqueMessage {}

impl Hash for OpaqueMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct NativeMessage {
        role: &'static str,
        text: String,
    }

    #[test]
    fn test_downcast() {
        let opaque = OpaqueMessage::new(
            "chatcmpl-1",
            NativeMessage {
                role: "assistant",
                text: "Photosynthesis overview".to_owned(),
            },
        );
        let native = opaque.downcast_ref::<NativeMessage>().unwrap();
        assert_eq!(native.role, "assistant");
        assert!(opaque.downcast_ref::<String>().is_none());
        assert_eq!(opaque.id(), "chatcmpl-1");
    }

    #[test]
    fn test_identity_is_id() {
        let a = OpaqueMessage::new("msg:0", 1u32);
        let b = OpaqueMessage::new("msg:0", "different payload");
        let c = OpaqueMessage::new("msg:1", 1u32);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }
}
