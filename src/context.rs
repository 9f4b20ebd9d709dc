//! Request-scoped key/value context.
//!
//! Middleware talk to later middleware and to the handler only through the
//! [`Context`] owned by each [`Req`](crate::Req). Values are typed: a getter
//! asked for the wrong variant returns `None` instead of guessing.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// A single context value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Time(SystemTime),
    Duration(Duration),
}

impl From<String> for Value {
    fn from(v: String) -> Self { Self::Str(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::Str(v.to_owned()) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<SystemTime> for Value {
    fn from(v: SystemTime) -> Self { Self::Time(v) }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self { Self::Duration(v) }
}

/// Case-insensitive store of [`Value`]s for one request.
#[derive(Clone, Debug, Default)]
pub struct Context {
    entries: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overrides `key`. Keys are lower-cased.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(key.to_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&key.to_lowercase())
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(&key.to_lowercase())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn get_time(&self, key: &str) -> Option<SystemTime> {
        match self.get(key)? {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn get_duration(&self, key: &str) -> Option<Duration> {
        match self.get(key)? {
            Value::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_case_insensitive() {
        let mut ctx = Context::new();
        ctx.set("UserID", "1");
        assert_eq!(ctx.get_str("userid"), Some("1"));
        assert!(ctx.has("USERID"));
        assert_eq!(ctx.remove("userId"), Some(Value::Str("1".into())));
        assert!(ctx.is_empty());
    }

    #[test]
    fn typed_getters_do_not_coerce() {
        let mut ctx = Context::new();
        ctx.set("n", 42_i64);
        ctx.set("flag", "true");
        assert_eq!(ctx.get_int("n"), Some(42));
        assert_eq!(ctx.get_str("n"), None);
        assert_eq!(ctx.get_bool("flag"), None);
        assert_eq!(ctx.get_duration("n"), None);
    }

    #[test]
    fn later_set_overrides() {
        let mut ctx = Context::new();
        ctx.set("ttl", Duration::from_secs(1));
        ctx.set("TTL", Duration::from_secs(5));
        assert_eq!(ctx.get_duration("ttl"), Some(Duration::from_secs(5)));
        assert_eq!(ctx.len(), 1);
    }
}
