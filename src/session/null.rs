//! Session store for servers without session storage.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::http::{RequestParts, ResponseWriter};
use crate::session::{BoxError, Session, SessionError, SessionStore};

/// Hands out a fresh ephemeral session for every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSessionStore;

/// Session living only for the current request. Saving is a no-op.
#[derive(Debug, Default)]
pub struct EphemeralSession {
    values: HashMap<String, Value>,
}

#[async_trait]
impl Session for EphemeralSession {
    fn set_value(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    fn get_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    async fn save(&mut self, _: &RequestParts, _: &ResponseWriter) -> Result<(), SessionError> {
        Ok(())
    }
}

#[async_trait]
impl SessionStore for NullSessionStore {
    async fn get(&self, _: &RequestParts) -> Result<Box<dyn Session>, BoxError> {
        Ok(Box::<EphemeralSession>::default())
    }

    fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_sessions_are_not_shared() {
        let store = NullSessionStore;
        let (request, _) = Request::new(()).into_parts();

        let mut first = store.get(&request).await.unwrap();
        first.set_value("user", Value::from(1));
        first.set_value("user", Value::from(2));
        assert_eq!(first.get_value("user"), Some(Value::from(2)));
        first.save(&request, &ResponseWriter::new()).await.unwrap();

        let second = store.get(&request).await.unwrap();
        assert_eq!(second.get_value("user"), None);
    }
}
