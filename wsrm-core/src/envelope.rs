//! Message envelope model shared by the codecs and the runtime

use bytes::Bytes;

/// One namespace-qualified header block. The payload is codec-defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub namespace: String,
    pub local_name: String,
    pub payload: Bytes,
}

impl Header {
    pub fn new(
        namespace: impl Into<String>,
        local_name: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
            payload,
        }
    }

    fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace == namespace && self.local_name == local_name
    }
}

/// Ordered set of headers; at most one header per qualified name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: Vec<Header>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn get(&self, namespace: &str, local_name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.is(namespace, local_name))
    }

    pub fn contains(&self, namespace: &str, local_name: &str) -> bool {
        self.get(namespace, local_name).is_some()
    }

    /// Insert `header`, replacing a header with the same qualified name in place.
    pub fn insert(&mut self, header: Header) {
        match self
            .headers
            .iter_mut()
            .find(|h| h.is(&header.namespace, &header.local_name))
        {
            Some(existing) => *existing = header,
            None => self.headers.push(header),
        }
    }

    pub fn remove(&mut self, namespace: &str, local_name: &str) -> Option<Header> {
        let pos = self.headers.iter().position(|h| h.is(namespace, local_name))?;
        Some(self.headers.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.headers.iter()
    }

    /// Qualified names in insertion order, handy for asserting decoration order.
    pub fn names(&self) -> Vec<&str> {
        self.headers.iter().map(|h| h.local_name.as_str()).collect()
    }
}

/// A fault reported by the peer in place of a regular response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: String,
    pub reason: String,
}

impl Fault {
    pub fn new(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            reason: reason.into(),
        }
    }
}

/// A message envelope: addressing action, header blocks, and opaque body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub action: Option<String>,
    pub headers: HeaderSet,
    pub body: Bytes,
    pub fault: Option<Fault>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Application message with the given action and payload.
    pub fn with_body(action: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            action: Some(action.into()),
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = Some(action.into());
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub fn fault(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            fault: Some(Fault::new(code, reason)),
            ..Self::default()
        }
    }
}
